//! Configuration types for document-to-Markdown conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across document tasks, print them for logging,
//! and diff two runs to understand why their outputs differ.

use crate::error::Ocr2MdError;
use serde::{Deserialize, Serialize};

/// Configuration for a conversion run.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_ocr2md::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .ocr_language("deu")
///     .page_concurrency(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.ocr_language, "deu");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Tesseract language code passed to the OCR engine. Default: "eng".
    pub ocr_language: String,

    /// OCR engine executable. Default: "ocrmypdf".
    pub ocr_program: String,

    /// Per-page OCR timeout in seconds. Default: 300.
    ///
    /// A page that exceeds it is killed, marked failed, and never retried.
    pub ocr_timeout_secs: u64,

    /// Exit code meaning "the page already had text; nothing was OCR'd".
    /// Default: 6 (ocrmypdf's `PriorOcrFoundError`).
    ///
    /// Treated as success under the skip-text policy.
    pub prior_ocr_exit_code: i32,

    /// Office/text converter executable. Default: "soffice".
    pub office_program: String,

    /// Timeout for the office converter in seconds. Default: 120.
    pub conversion_timeout_secs: u64,

    /// Upper bound on pages of one document OCR'd at the same time. Default: 8.
    ///
    /// The effective pool is `min(page_count, page_concurrency)`. Each worker
    /// holds one OCR child process, so this is really a cap on how many
    /// tesseract instances a single document may run at once.
    pub page_concurrency: usize,

    /// Upper bound on documents converted at the same time. Default: 4.
    pub document_concurrency: usize,

    /// How each page is introduced in the assembled Markdown. Default: heading.
    pub page_marker: PageMarker,

    /// Drop non-ASCII characters from every fragment. Default: false.
    ///
    /// OCR of low-quality scans produces stray glyphs; some downstream indexers
    /// only accept ASCII.
    pub strip_non_ascii: bool,

    /// Number of characters kept in [`crate::output::DocumentReport::content_preview`]. Default: 100.
    pub preview_chars: usize,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            ocr_language: "eng".to_string(),
            ocr_program: "ocrmypdf".to_string(),
            ocr_timeout_secs: 300,
            prior_ocr_exit_code: 6,
            office_program: "soffice".to_string(),
            conversion_timeout_secs: 120,
            page_concurrency: 8,
            document_concurrency: 4,
            page_marker: PageMarker::default(),
            strip_non_ascii: false,
            preview_chars: 100,
            download_timeout_secs: 120,
        }
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Worker-pool size for a document with `page_count` pages.
    pub fn page_pool_size(&self, page_count: usize) -> usize {
        page_count.min(self.page_concurrency).max(1)
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn ocr_program(mut self, program: impl Into<String>) -> Self {
        self.config.ocr_program = program.into();
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs.max(1);
        self
    }

    pub fn prior_ocr_exit_code(mut self, code: i32) -> Self {
        self.config.prior_ocr_exit_code = code;
        self
    }

    pub fn office_program(mut self, program: impl Into<String>) -> Self {
        self.config.office_program = program.into();
        self
    }

    pub fn conversion_timeout_secs(mut self, secs: u64) -> Self {
        self.config.conversion_timeout_secs = secs.max(1);
        self
    }

    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.config.page_concurrency = n.max(1);
        self
    }

    pub fn document_concurrency(mut self, n: usize) -> Self {
        self.config.document_concurrency = n.max(1);
        self
    }

    pub fn page_marker(mut self, marker: PageMarker) -> Self {
        self.config.page_marker = marker;
        self
    }

    pub fn strip_non_ascii(mut self, v: bool) -> Self {
        self.config.strip_non_ascii = v;
        self
    }

    pub fn preview_chars(mut self, n: usize) -> Self {
        self.config.preview_chars = n;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Ocr2MdError> {
        let c = &self.config;
        if c.ocr_language.trim().is_empty() {
            return Err(Ocr2MdError::InvalidConfig(
                "OCR language must not be empty".into(),
            ));
        }
        if c.ocr_program.trim().is_empty() || c.office_program.trim().is_empty() {
            return Err(Ocr2MdError::InvalidConfig(
                "Converter program names must not be empty".into(),
            ));
        }
        if c.page_concurrency == 0 || c.document_concurrency == 0 {
            return Err(Ocr2MdError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.prior_ocr_exit_code == 0 {
            return Err(Ocr2MdError::InvalidConfig(
                "prior_ocr_exit_code must be non-zero".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How each page is introduced in the assembled Markdown.
///
/// Every page gets a marker, including failed pages whose fragment is empty,
/// so the output's page numbering matches the source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageMarker {
    /// `## Page N` heading. (default)
    #[default]
    Heading,
    /// HTML comment: `<!-- page N -->`
    Comment,
    /// Horizontal rule between pages (none before the first).
    HorizontalRule,
    /// Fragments joined with a blank line only.
    None,
}

impl PageMarker {
    /// Render the marker for the given page number (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageMarker::Heading => format!("## Page {}\n\n", page_num),
            PageMarker::Comment => format!("<!-- page {} -->\n\n", page_num),
            PageMarker::HorizontalRule if page_num > 1 => "---\n\n".to_string(),
            PageMarker::HorizontalRule | PageMarker::None => String::new(),
        }
    }
}

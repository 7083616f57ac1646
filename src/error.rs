//! Error types for the edgequake-ocr2md library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Ocr2MdError`] is **fatal**: the document cannot be converted at all
//!   (unsupported extension, office converter crashed, PDF cannot be split).
//!   Returned as `Err(Ocr2MdError)` from the pipeline and recorded as the
//!   document's status in [`crate::output::DocumentReport`].
//!
//! * [`PageError`] is **non-fatal**: a single page failed (OCR engine error,
//!   OCR timeout, unreadable page) but every other page is fine. Stored inside
//!   [`crate::output::PageResult::Failed`] so the assembled Markdown keeps the
//!   remaining pages instead of losing the whole document to one bad page.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-ocr2md library.
///
/// Page-level failures use [`PageError`] and never abort sibling pages.
#[derive(Debug, Error)]
pub enum Ocr2MdError {
    // ── Normalisation errors ──────────────────────────────────────────────
    /// The file extension is not one the normaliser knows how to turn into a PDF.
    #[error("Unsupported file type '{extension}' for '{filename}'")]
    UnsupportedFormat { filename: String, extension: String },

    /// The converter exited successfully but the expected PDF never appeared.
    #[error("Converted PDF not found: '{expected}'")]
    ConversionIncomplete { expected: PathBuf },

    /// The converter process reported failure (non-zero exit or spawn error).
    #[error("Conversion of '{filename}' failed: {detail}")]
    ConversionProcessFailed { filename: String, detail: String },

    /// The converter process exceeded its timeout and was killed.
    #[error("Conversion of '{filename}' timed out after {secs}s")]
    ConversionTimeout { filename: String, secs: u64 },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// The normalised PDF cannot be opened.
    #[error("PDF is corrupt: {detail}")]
    CorruptPdf { detail: String },

    /// A single page could not be copied out of the source document.
    #[error("Splitting failed on page {page}: {detail}")]
    SplitFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium on the library search path, or set PDFIUM_LIB_PATH to the\n\
directory that contains it.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Input errors ──────────────────────────────────────────────────────
    /// HTTP download of a URL input failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// HTTP download exceeded its timeout.
    #[error("Download of '{url}' timed out after {secs}s")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Store errors ──────────────────────────────────────────────────────
    /// The artifact id is unknown (never stored, or already deleted).
    #[error("Artifact '{id}' not found")]
    ArtifactNotFound { id: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Working-directory I/O failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Unexpected(String),
}

impl Ocr2MdError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal error for a single page.
///
/// The page still contributes an empty fragment to the assembled Markdown so
/// page numbering stays aligned with the source document.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The OCR engine failed, including after the force-OCR retry if one ran.
    #[error("Page {page}: OCR failed after {attempts} attempt(s): {detail}")]
    OcrFailed {
        page: usize,
        attempts: u8,
        detail: String,
    },

    /// The OCR engine exceeded its timeout. Never retried.
    #[error("Page {page}: OCR timed out after {secs}s")]
    OcrTimeout { page: usize, secs: u64 },

    /// Neither the primary extractor nor the layout fallback could read the page.
    #[error("Page {page}: text extraction failed: {detail}")]
    ExtractionFailed { page: usize, detail: String },
}

impl PageError {
    /// 1-indexed page number the error refers to.
    pub fn page(&self) -> usize {
        match self {
            PageError::OcrFailed { page, .. }
            | PageError::OcrTimeout { page, .. }
            | PageError::ExtractionFailed { page, .. } => *page,
        }
    }
}

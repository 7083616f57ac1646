//! Result types returned by the conversion pipeline.

use crate::error::PageError;
use crate::store::ArtifactId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque identifier of a submitted document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for DocumentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// One input file awaiting conversion.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl DocumentInput {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }
}

/// Outcome of processing a single page: a fragment or an error, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PageResult {
    /// Markdown for the page. May be empty when the page holds no text.
    Fragment { index: usize, markdown: String },
    /// Terminal page-level failure; contributes an empty fragment on assembly.
    Failed { index: usize, error: PageError },
}

impl PageResult {
    /// 0-indexed page position in the source document.
    pub fn index(&self) -> usize {
        match self {
            PageResult::Fragment { index, .. } | PageResult::Failed { index, .. } => *index,
        }
    }

    /// The fragment, or `""` for a failed page.
    pub fn markdown(&self) -> &str {
        match self {
            PageResult::Fragment { markdown, .. } => markdown,
            PageResult::Failed { .. } => "",
        }
    }

    pub fn error(&self) -> Option<&PageError> {
        match self {
            PageResult::Failed { error, .. } => Some(error),
            PageResult::Fragment { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PageResult::Failed { .. })
    }
}

/// Coarse status shown to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error")]
pub enum DocumentStatus {
    Success,
    /// Fatal error message, or the summary of failed pages.
    Error(String),
}

impl DocumentStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, DocumentStatus::Success)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            DocumentStatus::Success => None,
            DocumentStatus::Error(e) => Some(e),
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentStatus::Success => f.write_str("Success"),
            DocumentStatus::Error(e) => write!(f, "Error: {}", e),
        }
    }
}

/// User-visible record for one converted (or rejected) document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentReport {
    pub document_id: DocumentId,
    pub file_name: String,
    /// 0 when the document failed before its page count was known.
    pub page_count: usize,
    pub processing_time_seconds: f64,
    pub status: DocumentStatus,
    /// First characters of the Markdown, newlines flattened, or `No content`.
    pub content_preview: String,
    /// Full Markdown whenever any content was assembled, even with failed pages.
    pub markdown_content: Option<String>,
    pub markdown_id: Option<ArtifactId>,
    pub ocr_pdf_id: Option<ArtifactId>,
    /// Per-page outcomes in page order.
    pub pages: Vec<PageResult>,
    pub failed_pages: usize,
}

impl DocumentReport {
    /// A report for a document that never produced pages.
    pub(crate) fn fatal(
        document_id: DocumentId,
        file_name: &str,
        page_count: usize,
        elapsed_secs: f64,
        error: String,
    ) -> Self {
        Self {
            document_id,
            file_name: file_name.to_string(),
            page_count,
            processing_time_seconds: round2(elapsed_secs),
            status: DocumentStatus::Error(error),
            content_preview: NO_CONTENT.to_string(),
            markdown_content: None,
            markdown_id: None,
            ocr_pdf_id: None,
            pages: Vec::new(),
            failed_pages: 0,
        }
    }
}

/// Result of a batch conversion, in submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub total_processing_time_seconds: f64,
    pub results: Vec<DocumentReport>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.status.is_success()).count()
    }
}

/// What [`crate::convert::Converter::retrieve`] returns for a finished document.
#[derive(Debug, Clone)]
pub struct RetrievedDocument {
    pub markdown: Option<String>,
    pub ocr_pdf: Option<Arc<[u8]>>,
    pub error: Option<String>,
}

pub(crate) const NO_CONTENT: &str = "No content";

/// Build the content preview: first `max_chars` characters, newlines flattened.
pub(crate) fn content_preview(markdown: Option<&str>, max_chars: usize) -> String {
    match markdown {
        Some(md) if !md.trim().is_empty() => {
            let head: String = md.chars().take(max_chars).collect();
            format!("{}...", head.replace('\n', " "))
        }
        _ => NO_CONTENT.to_string(),
    }
}

pub(crate) fn round2(secs: f64) -> f64 {
    (secs * 100.0).round() / 100.0
}

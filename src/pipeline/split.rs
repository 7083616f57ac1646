//! Page splitting: one normalised PDF → N independently OCR-able pages.

use crate::error::Ocr2MdError;
use crate::pipeline::pdf::PdfBackend;
use tracing::debug;

/// One page of a document, carried through OCR and extraction.
#[derive(Debug, Clone)]
pub struct Page {
    /// 0-indexed position in the source document.
    pub index: usize,
    /// Single-page PDF before OCR.
    pub pdf: Vec<u8>,
}

impl Page {
    /// 1-indexed page number for messages.
    pub fn number(&self) -> usize {
        self.index + 1
    }
}

/// Split `pdf` into exactly `page_count` pages with indices `0..page_count`.
///
/// Any failure is fatal for the document: extraction is meaningless for a
/// page that cannot be materialised.
pub async fn split_pages(
    pdf: &[u8],
    page_count: usize,
    backend: &dyn PdfBackend,
) -> Result<Vec<Page>, Ocr2MdError> {
    let parts = backend.split_pages(pdf).await?;
    if parts.len() != page_count {
        return Err(Ocr2MdError::SplitFailed {
            page: parts.len().min(page_count) + 1,
            detail: format!(
                "expected {} pages, splitter produced {}",
                page_count,
                parts.len()
            ),
        });
    }
    debug!("Split into {} pages", parts.len());
    Ok(parts
        .into_iter()
        .enumerate()
        .map(|(index, pdf)| Page { index, pdf })
        .collect())
}

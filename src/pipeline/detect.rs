//! Embedded-text detection used to pick the OCR policy.

use crate::pipeline::pdf::PdfBackend;
use tracing::warn;

/// `true` when any page of `pdf` already carries extractable text.
///
/// Errors never propagate: an unreadable PDF counts as "no text", which
/// steers the pipeline toward forcing OCR. That is always safe because the
/// OCR engine copes with pages that turn out to contain text after all.
pub async fn has_embedded_text(pdf: &[u8], backend: &dyn PdfBackend) -> bool {
    match backend.has_text(pdf).await {
        Ok(found) => found,
        Err(e) => {
            warn!("Text detection failed, assuming no embedded text: {}", e);
            false
        }
    }
}

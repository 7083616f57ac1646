//! PDF access: page counting, text, text spans, splitting, merging.
//!
//! The pipeline talks to PDFs only through the [`PdfBackend`] trait so the
//! coordinator can be exercised in tests without a pdfium library on the
//! machine. [`PdfiumBackend`] is the production implementation.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is not async-safe.
//! Every call runs on tokio's blocking pool with its own binding, so the
//! async workers driving OCR child processes never stall behind a large
//! document being parsed.

use crate::error::Ocr2MdError;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};

/// A run of text on a page with its bounding box.
///
/// Coordinates are in PDF points with a **top-left** origin: `top < bottom`.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub text: String,
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl TextSpan {
    pub fn center_y(&self) -> f32 {
        (self.top + self.bottom) / 2.0
    }
}

/// Everything the pipeline needs from a PDF library.
///
/// Single-page operations (`page_text`, `text_spans`) receive a one-page PDF
/// produced by [`PdfBackend::split_pages`] or by the OCR engine.
#[async_trait]
pub trait PdfBackend: Send + Sync {
    /// Number of pages in the document.
    async fn page_count(&self, pdf: &[u8]) -> Result<usize, Ocr2MdError>;

    /// `true` as soon as one page has non-whitespace extractable text.
    async fn has_text(&self, pdf: &[u8]) -> Result<bool, Ocr2MdError>;

    /// One single-page PDF per page, in page order.
    async fn split_pages(&self, pdf: &[u8]) -> Result<Vec<Vec<u8>>, Ocr2MdError>;

    /// Concatenate single- or multi-page PDFs into one document.
    async fn merge_pages(&self, pages: &[Vec<u8>]) -> Result<Vec<u8>, Ocr2MdError>;

    /// Plain text of the first page.
    async fn page_text(&self, pdf: &[u8]) -> Result<String, Ocr2MdError>;

    /// Positioned text runs of the first page.
    async fn text_spans(&self, pdf: &[u8]) -> Result<Vec<TextSpan>, Ocr2MdError>;

    /// Package one raster image as a one-page PDF sized to the image.
    async fn image_to_pdf(&self, image: &[u8]) -> Result<Vec<u8>, Ocr2MdError>;
}

/// [`PdfBackend`] backed by pdfium.
///
/// The library is located through `PDFIUM_LIB_PATH` (a file or the directory
/// holding it), then the system library search path, then the working
/// directory.
#[derive(Debug, Clone, Default)]
pub struct PdfiumBackend {
    library_path: Option<PathBuf>,
}

impl PdfiumBackend {
    pub fn new() -> Self {
        Self {
            library_path: std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from),
        }
    }

    /// Use the pdfium library at `path` (file or containing directory).
    pub fn with_library_path(path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: Some(path.into()),
        }
    }

    /// Fail fast when no pdfium library can be bound.
    pub async fn check(&self) -> Result<(), Ocr2MdError> {
        let backend = self.clone();
        run_blocking(move || backend.bind().map(|_| ())).await
    }

    fn bind(&self) -> Result<Pdfium, Ocr2MdError> {
        let bindings = match &self.library_path {
            Some(path) if path.is_file() => Pdfium::bind_to_library(path),
            Some(dir) => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
            }
            None => Pdfium::bind_to_system_library().or_else(|_| {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            }),
        }
        .map_err(|e| Ocr2MdError::PdfiumBindingFailed(format!("{:?}", e)))?;
        Ok(Pdfium::new(bindings))
    }
}

/// Move a pdfium job onto the blocking pool.
async fn run_blocking<T, F>(job: F) -> Result<T, Ocr2MdError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, Ocr2MdError> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| Ocr2MdError::Unexpected(format!("PDF task panicked: {}", e)))?
}

fn corrupt(e: PdfiumError) -> Ocr2MdError {
    Ocr2MdError::CorruptPdf {
        detail: format!("{:?}", e),
    }
}

#[async_trait]
impl PdfBackend for PdfiumBackend {
    async fn page_count(&self, pdf: &[u8]) -> Result<usize, Ocr2MdError> {
        let backend = self.clone();
        let bytes = pdf.to_vec();
        run_blocking(move || {
            let pdfium = backend.bind()?;
            let document = pdfium.load_pdf_from_byte_slice(&bytes, None).map_err(corrupt)?;
            Ok(document.pages().len() as usize)
        })
        .await
    }

    async fn has_text(&self, pdf: &[u8]) -> Result<bool, Ocr2MdError> {
        let backend = self.clone();
        let bytes = pdf.to_vec();
        run_blocking(move || {
            let pdfium = backend.bind()?;
            let document = pdfium.load_pdf_from_byte_slice(&bytes, None).map_err(corrupt)?;
            for (idx, page) in document.pages().iter().enumerate() {
                let text = page.text().map_err(corrupt)?.all();
                if !text.trim().is_empty() {
                    debug!("Embedded text found on page {}", idx + 1);
                    return Ok(true);
                }
            }
            Ok(false)
        })
        .await
    }

    async fn split_pages(&self, pdf: &[u8]) -> Result<Vec<Vec<u8>>, Ocr2MdError> {
        let backend = self.clone();
        let bytes = pdf.to_vec();
        run_blocking(move || {
            let pdfium = backend.bind()?;
            let source = pdfium.load_pdf_from_byte_slice(&bytes, None).map_err(corrupt)?;
            let total = source.pages().len() as usize;
            let mut pages = Vec::with_capacity(total);

            for idx in 0..total {
                let split_failed = |e: PdfiumError| Ocr2MdError::SplitFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                };
                let mut single = pdfium.create_new_pdf().map_err(split_failed)?;
                single
                    .pages_mut()
                    .copy_page_from_document(&source, idx as PdfPageIndex, 0)
                    .map_err(split_failed)?;
                pages.push(single.save_to_bytes().map_err(split_failed)?);
            }

            info!("Split PDF into {} single-page documents", pages.len());
            Ok(pages)
        })
        .await
    }

    async fn merge_pages(&self, pages: &[Vec<u8>]) -> Result<Vec<u8>, Ocr2MdError> {
        let backend = self.clone();
        let parts = pages.to_vec();
        run_blocking(move || {
            let pdfium = backend.bind()?;
            let mut merged = pdfium.create_new_pdf().map_err(corrupt)?;
            for part in &parts {
                let document = pdfium.load_pdf_from_byte_slice(part, None).map_err(corrupt)?;
                merged.pages_mut().append(&document).map_err(corrupt)?;
            }
            merged.save_to_bytes().map_err(corrupt)
        })
        .await
    }

    async fn page_text(&self, pdf: &[u8]) -> Result<String, Ocr2MdError> {
        let backend = self.clone();
        let bytes = pdf.to_vec();
        run_blocking(move || {
            let pdfium = backend.bind()?;
            let document = pdfium.load_pdf_from_byte_slice(&bytes, None).map_err(corrupt)?;
            let page = document.pages().get(0).map_err(corrupt)?;
            let text = page.text().map_err(corrupt)?.all();
            Ok(text)
        })
        .await
    }

    async fn text_spans(&self, pdf: &[u8]) -> Result<Vec<TextSpan>, Ocr2MdError> {
        let backend = self.clone();
        let bytes = pdf.to_vec();
        run_blocking(move || {
            let pdfium = backend.bind()?;
            let document = pdfium.load_pdf_from_byte_slice(&bytes, None).map_err(corrupt)?;
            let page = document.pages().get(0).map_err(corrupt)?;
            let page_height = page.height().value;
            let text = page.text().map_err(corrupt)?;

            let mut spans = Vec::new();
            for segment in text.segments().iter() {
                let content = segment.text();
                if content.trim().is_empty() {
                    continue;
                }
                let bounds = segment.bounds();
                // pdfium uses a bottom-left origin; flip to top-left
                let top = page_height - bounds.top().value;
                let bottom = page_height - bounds.bottom().value;
                spans.push(TextSpan {
                    text: content.trim().to_string(),
                    left: bounds.left().value,
                    top: top.min(bottom),
                    right: bounds.right().value,
                    bottom: top.max(bottom),
                });
            }
            debug!("Extracted {} text spans", spans.len());
            Ok(spans)
        })
        .await
    }

    async fn image_to_pdf(&self, image: &[u8]) -> Result<Vec<u8>, Ocr2MdError> {
        let backend = self.clone();
        let bytes = image.to_vec();
        run_blocking(move || {
            let decoded = image::load_from_memory(&bytes).map_err(|e| {
                Ocr2MdError::ConversionProcessFailed {
                    filename: "image".into(),
                    detail: format!("cannot decode image: {}", e),
                }
            })?;
            // One pixel per point keeps the page at the image's native size
            let width = PdfPoints::new(decoded.width() as f32);
            let height = PdfPoints::new(decoded.height() as f32);

            let pdfium = backend.bind()?;
            let mut document = pdfium.create_new_pdf().map_err(corrupt)?;
            {
                let mut page = document
                    .pages_mut()
                    .create_page_at_end(PdfPagePaperSize::from_points(width, height))
                    .map_err(corrupt)?;
                page.objects_mut()
                    .create_image_object(
                        PdfPoints::ZERO,
                        PdfPoints::ZERO,
                        &decoded,
                        Some(width),
                        Some(height),
                    )
                    .map_err(corrupt)?;
            }
            document.save_to_bytes().map_err(corrupt)
        })
        .await
    }
}

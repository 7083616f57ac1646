//! # edgequake-ocr2md
//!
//! Turn PDFs, scanned images and office documents into searchable Markdown
//! through per-page OCR.
//!
//! ## Why per-page OCR?
//!
//! Running an OCR engine over a whole 200-page scan is slow and brittle: one
//! bad page (a skewed photo, a corrupt image stream) takes the document down
//! and nothing runs in parallel. This crate splits every document into
//! single-page PDFs, OCRs them on a bounded worker pool, and reassembles the
//! per-page Markdown in page order. A failed page costs one empty section,
//! not the document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! file (pdf / image / office)
//!  │
//!  ├─ 1. Normalise  image → PDF in-process, office → PDF via LibreOffice
//!  ├─ 2. Detect     already has text? → skip-text, otherwise force OCR
//!  ├─ 3. Split      one single-page PDF per page (pdfium, spawn_blocking)
//!  ├─ 4. OCR        ocrmypdf per page, bounded pool, one policy fallback
//!  ├─ 5. Extract    page text → Markdown, span-layout table fallback
//!  ├─ 6. Assemble   fragments in page order under page markers, cleanup
//!  └─ 7. Store      Markdown + OCR'd PDF as artifacts, report + progress
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_ocr2md::{ConversionConfig, Converter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let converter = Converter::new(ConversionConfig::default());
//!     let bytes = std::fs::read("scan.pdf")?;
//!     let report = converter.convert_document(bytes, "scan.pdf", false).await;
//!     println!("{}: {}", report.file_name, report.status);
//!     if let Some(md) = report.markdown_content {
//!         println!("{md}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## External programs
//!
//! | Program | Needed for | Config field |
//! |---------|-----------|--------------|
//! | `ocrmypdf` (with tesseract) | every document | `ocr_program` |
//! | `soffice` | `.txt .csv .doc .docx .odt .rtf` | `office_program` |
//! | libpdfium | every document | `PDFIUM_LIB_PATH` |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ocr2md` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-ocr2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, PageMarker};
pub use convert::{markdown_zip, output_stems, Converter};
pub use error::{Ocr2MdError, PageError};
pub use output::{
    BatchReport, DocumentId, DocumentInput, DocumentReport, DocumentStatus, PageResult,
    RetrievedDocument,
};
pub use progress::{ProgressSnapshot, ProgressTracker, Stage};
pub use store::{ArtifactId, ArtifactStore};

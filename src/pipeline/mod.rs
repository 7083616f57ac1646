//! Pipeline stages for document-to-Markdown conversion.
//!
//! Each submodule implements exactly one transformation step. The
//! coordinator in [`crate::convert`] strings them together.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ normalize ──▶ detect ──▶ split ──▶ ocr ──▶ extract ──▶ postprocess
//! (URL/path)  (→ PDF)     (text?)   (pages)  (per page, pooled)    (cleanup)
//! ```
//!
//! 1. [`input`]: read a local file or download a URL into memory
//! 2. [`normalize`]: images and office files become a single PDF
//! 3. [`detect`]: does any page already carry text? picks the OCR policy
//! 4. [`split`]: one single-page PDF per page, indices `0..n`
//! 5. [`ocr`]: run the OCR engine on a page with one policy fallback
//! 6. [`extract`]: OCR'd page → Markdown, with a table-aware fallback
//! 7. [`postprocess`]: deterministic cleanup of the assembled document
//!
//! All PDF access goes through [`pdf::PdfBackend`].

pub mod detect;
pub mod extract;
pub mod input;
pub mod normalize;
pub mod ocr;
pub mod pdf;
pub mod postprocess;
pub mod split;

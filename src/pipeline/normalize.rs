//! Format normalisation: turn any supported input file into one PDF.
//!
//! | Extension | Route |
//! |-----------|-------|
//! | `.pdf` | bytes pass through unchanged |
//! | `.jpg .jpeg .png .tif .tiff .bmp` | packaged in-process, one image → one page |
//! | `.txt .csv .doc .docx .odt .rtf` | [`DocumentConverter`] child process |
//!
//! Anything else is [`Ocr2MdError::UnsupportedFormat`].
//!
//! Office conversion is judged by its *output*, not just its exit status:
//! LibreOffice happily exits 0 without writing anything when another
//! instance holds its profile lock, so a missing `<stem>.pdf` after a
//! reported success is [`Ocr2MdError::ConversionIncomplete`].

use crate::error::Ocr2MdError;
use crate::pipeline::pdf::PdfBackend;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff", "bmp"];
const OFFICE_EXTENSIONS: &[&str] = &["txt", "csv", "doc", "docx", "odt", "rtf"];

/// How an input file reaches PDF form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Pdf,
    Image,
    Office,
}

impl SourceKind {
    /// Classify by extension (case-insensitive). `None` means unsupported.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = extension_of(filename)?.to_ascii_lowercase();
        if ext == "pdf" {
            Some(SourceKind::Pdf)
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(SourceKind::Image)
        } else if OFFICE_EXTENSIONS.contains(&ext.as_str()) {
            Some(SourceKind::Office)
        } else {
            None
        }
    }
}

fn extension_of(filename: &str) -> Option<&str> {
    Path::new(filename).extension().and_then(|e| e.to_str())
}

/// Converts office and text documents to PDF in an output directory.
///
/// Implementations report whether the *process* succeeded; the normaliser
/// separately checks that `<stem>.pdf` was written.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn convert(&self, input: &Path, out_dir: &Path) -> Result<(), Ocr2MdError>;
}

/// [`DocumentConverter`] that shells out to headless LibreOffice.
#[derive(Debug, Clone)]
pub struct LibreOfficeConverter {
    program: String,
    timeout: Duration,
}

impl LibreOfficeConverter {
    pub fn new(program: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl DocumentConverter for LibreOfficeConverter {
    async fn convert(&self, input: &Path, out_dir: &Path) -> Result<(), Ocr2MdError> {
        let filename = input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        debug!("Running {} on {}", self.program, input.display());

        let child = Command::new(&self.program)
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(out_dir)
            .arg(input)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| Ocr2MdError::ConversionTimeout {
                filename: filename.clone(),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| Ocr2MdError::ConversionProcessFailed {
                filename: filename.clone(),
                detail: format!("failed to run '{}': {}", self.program, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Ocr2MdError::ConversionProcessFailed {
                filename,
                detail: format!("{} ({})", stderr.trim(), output.status),
            });
        }
        Ok(())
    }
}

/// Bare file name of `filename`, stripped of any directory components.
pub(crate) fn safe_file_name(filename: &str) -> String {
    Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "input".to_string())
}

/// Produce a single PDF from `bytes`, using `workdir` for converter I/O.
pub async fn normalize(
    bytes: &[u8],
    filename: &str,
    workdir: &Path,
    pdf: &dyn PdfBackend,
    office: &dyn DocumentConverter,
) -> Result<Vec<u8>, Ocr2MdError> {
    let kind =
        SourceKind::from_filename(filename).ok_or_else(|| Ocr2MdError::UnsupportedFormat {
            filename: filename.to_string(),
            extension: extension_of(filename)
                .map(|e| format!(".{}", e.to_ascii_lowercase()))
                .unwrap_or_default(),
        })?;

    match kind {
        SourceKind::Pdf => Ok(bytes.to_vec()),
        SourceKind::Image => {
            info!("Packaging image '{}' as a single-page PDF", filename);
            pdf.image_to_pdf(bytes).await
        }
        SourceKind::Office => {
            let name = safe_file_name(filename);
            let input = workdir.join(&name);
            tokio::fs::write(&input, bytes)
                .await
                .map_err(|e| Ocr2MdError::io(&input, e))?;

            info!("Converting '{}' to PDF", name);
            office.convert(&input, workdir).await?;

            let expected = expected_output(workdir, &name);
            match tokio::fs::read(&expected).await {
                Ok(pdf_bytes) => Ok(pdf_bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(Ocr2MdError::ConversionIncomplete { expected })
                }
                Err(e) => Err(Ocr2MdError::io(&expected, e)),
            }
        }
    }
}

/// The deterministic path a converter writes `<stem>.pdf` to.
fn expected_output(out_dir: &Path, file_name: &str) -> PathBuf {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "input".to_string());
    out_dir.join(format!("{}.pdf", stem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::pdf::TextSpan;

    /// PDF backend that only knows how to package images.
    struct ImageOnly;

    #[async_trait]
    impl PdfBackend for ImageOnly {
        async fn page_count(&self, _: &[u8]) -> Result<usize, Ocr2MdError> {
            unreachable!()
        }
        async fn has_text(&self, _: &[u8]) -> Result<bool, Ocr2MdError> {
            unreachable!()
        }
        async fn split_pages(&self, _: &[u8]) -> Result<Vec<Vec<u8>>, Ocr2MdError> {
            unreachable!()
        }
        async fn merge_pages(&self, _: &[Vec<u8>]) -> Result<Vec<u8>, Ocr2MdError> {
            unreachable!()
        }
        async fn page_text(&self, _: &[u8]) -> Result<String, Ocr2MdError> {
            unreachable!()
        }
        async fn text_spans(&self, _: &[u8]) -> Result<Vec<TextSpan>, Ocr2MdError> {
            unreachable!()
        }
        async fn image_to_pdf(&self, image: &[u8]) -> Result<Vec<u8>, Ocr2MdError> {
            let mut out = b"%PDF-image:".to_vec();
            out.extend_from_slice(image);
            Ok(out)
        }
    }

    /// Converter that reports success and optionally writes the PDF.
    struct FakeOffice {
        write_output: bool,
    }

    #[async_trait]
    impl DocumentConverter for FakeOffice {
        async fn convert(&self, input: &Path, out_dir: &Path) -> Result<(), Ocr2MdError> {
            if self.write_output {
                let stem = input.file_stem().unwrap().to_string_lossy();
                std::fs::write(out_dir.join(format!("{stem}.pdf")), b"%PDF-office").unwrap();
            }
            Ok(())
        }
    }

    struct FailingOffice;

    #[async_trait]
    impl DocumentConverter for FailingOffice {
        async fn convert(&self, input: &Path, _: &Path) -> Result<(), Ocr2MdError> {
            Err(Ocr2MdError::ConversionProcessFailed {
                filename: input.display().to_string(),
                detail: "exit status 1".into(),
            })
        }
    }

    #[test]
    fn classifies_extensions_case_insensitively() {
        assert_eq!(SourceKind::from_filename("a.PDF"), Some(SourceKind::Pdf));
        assert_eq!(SourceKind::from_filename("scan.JpEg"), Some(SourceKind::Image));
        assert_eq!(SourceKind::from_filename("data.csv"), Some(SourceKind::Office));
        assert_eq!(SourceKind::from_filename("setup.exe"), None);
        assert_eq!(SourceKind::from_filename("README"), None);
    }

    #[test]
    fn pdf_passes_through_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let out = tokio_test::block_on(normalize(
            b"%PDF-1.7 raw",
            "doc.pdf",
            dir.path(),
            &ImageOnly,
            &FakeOffice { write_output: false },
        ))
        .unwrap();
        assert_eq!(out, b"%PDF-1.7 raw");
    }

    #[tokio::test]
    async fn images_go_through_the_packager() {
        let dir = tempfile::tempdir().unwrap();
        let out = normalize(
            b"PNGDATA",
            "photo.png",
            dir.path(),
            &ImageOnly,
            &FakeOffice { write_output: false },
        )
        .await
        .unwrap();
        assert_eq!(out, b"%PDF-image:PNGDATA");
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = normalize(
            b"MZ",
            "setup.exe",
            dir.path(),
            &ImageOnly,
            &FakeOffice { write_output: true },
        )
        .await
        .unwrap_err();
        match err {
            Ocr2MdError::UnsupportedFormat { extension, .. } => assert_eq!(extension, ".exe"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn office_output_is_read_from_expected_path() {
        let dir = tempfile::tempdir().unwrap();
        let out = normalize(
            b"hello",
            "notes.txt",
            dir.path(),
            &ImageOnly,
            &FakeOffice { write_output: true },
        )
        .await
        .unwrap();
        assert_eq!(out, b"%PDF-office");
    }

    #[tokio::test]
    async fn missing_office_output_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let err = normalize(
            b"hello",
            "notes.docx",
            dir.path(),
            &ImageOnly,
            &FakeOffice { write_output: false },
        )
        .await
        .unwrap_err();
        match err {
            Ocr2MdError::ConversionIncomplete { expected } => {
                assert!(expected.ends_with("notes.pdf"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn converter_failure_is_distinct_from_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let err = normalize(b"x", "a.doc", dir.path(), &ImageOnly, &FailingOffice)
            .await
            .unwrap_err();
        assert!(matches!(err, Ocr2MdError::ConversionProcessFailed { .. }));
    }

    #[test]
    fn file_names_are_stripped_of_directories() {
        assert_eq!(safe_file_name("../../etc/passwd.txt"), "passwd.txt");
        assert_eq!(safe_file_name(""), "input");
    }

    #[tokio::test]
    async fn missing_office_binary_is_process_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.txt");
        std::fs::write(&input, b"x").unwrap();
        let converter = LibreOfficeConverter::new("definitely-not-an-office-suite-xyz", 5);
        let err = converter.convert(&input, dir.path()).await.unwrap_err();
        assert!(matches!(err, Ocr2MdError::ConversionProcessFailed { .. }));
    }
}

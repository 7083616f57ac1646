//! Pipeline integration tests with in-memory collaborators.
//!
//! No pdfium, ocrmypdf or LibreOffice is needed: the fake PDF format is the
//! page texts joined by form feeds, the fake OCR engine prefixes each page
//! with `ocr:`, and the fake office converter copies its input verbatim.
//! Pages containing `unreadable` cannot be extracted at all.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use edgequake_ocr2md::pipeline::normalize::DocumentConverter;
use edgequake_ocr2md::pipeline::ocr::{EngineOutcome, OcrEngine, OcrPolicy, OcrRequest};
use edgequake_ocr2md::pipeline::pdf::{PdfBackend, TextSpan};
use edgequake_ocr2md::{
    markdown_zip, ArtifactStore, ConversionConfig, Converter, DocumentInput, Ocr2MdError,
    ProgressTracker, Stage,
};
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Fakes ────────────────────────────────────────────────────────────────────

const PAGE_BREAK: u8 = 0x0c;

fn fake_pdf(pages: &[&str]) -> Vec<u8> {
    pages.join("\x0c").into_bytes()
}

#[derive(Default)]
struct FakePdf {
    has_text: bool,
    /// Drop the last page when splitting.
    split_short: bool,
}

fn pages_of(pdf: &[u8]) -> Vec<Vec<u8>> {
    if pdf.is_empty() {
        return Vec::new();
    }
    pdf.split(|b| *b == PAGE_BREAK).map(<[u8]>::to_vec).collect()
}

fn readable(pdf: &[u8]) -> Result<(), Ocr2MdError> {
    if pdf.windows(10).any(|w| w == b"unreadable") {
        return Err(Ocr2MdError::CorruptPdf {
            detail: "no text layer".into(),
        });
    }
    Ok(())
}

#[async_trait]
impl PdfBackend for FakePdf {
    async fn page_count(&self, pdf: &[u8]) -> Result<usize, Ocr2MdError> {
        Ok(pages_of(pdf).len())
    }

    async fn has_text(&self, _: &[u8]) -> Result<bool, Ocr2MdError> {
        Ok(self.has_text)
    }

    async fn split_pages(&self, pdf: &[u8]) -> Result<Vec<Vec<u8>>, Ocr2MdError> {
        let mut pages = pages_of(pdf);
        if self.split_short {
            pages.pop();
        }
        Ok(pages)
    }

    async fn merge_pages(&self, pages: &[Vec<u8>]) -> Result<Vec<u8>, Ocr2MdError> {
        Ok(pages.join(&PAGE_BREAK))
    }

    async fn page_text(&self, pdf: &[u8]) -> Result<String, Ocr2MdError> {
        readable(pdf)?;
        Ok(String::from_utf8_lossy(pdf).into_owned())
    }

    async fn text_spans(&self, pdf: &[u8]) -> Result<Vec<TextSpan>, Ocr2MdError> {
        readable(pdf)?;
        Ok(Vec::new())
    }

    async fn image_to_pdf(&self, image: &[u8]) -> Result<Vec<u8>, Ocr2MdError> {
        Ok(image.to_vec())
    }
}

#[derive(Default)]
struct FakeOcr {
    timeouts: HashSet<usize>,
    delays_ms: HashMap<usize, u64>,
    /// Exit code returned for skip-text runs, without writing output.
    skip_text_exit: Option<i32>,
    calls: Mutex<Vec<(usize, OcrPolicy)>>,
}

impl FakeOcr {
    fn calls(&self) -> Vec<(usize, OcrPolicy)> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort_by_key(|(index, _)| *index);
        calls
    }
}

fn page_index(path: &Path) -> usize {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix("page-"))
        .and_then(|n| n.strip_suffix(".pdf"))
        .and_then(|n| n.parse().ok())
        .expect("page file name")
}

#[async_trait]
impl OcrEngine for FakeOcr {
    async fn run(&self, request: &OcrRequest) -> EngineOutcome {
        let index = page_index(&request.input);
        self.calls.lock().unwrap().push((index, request.policy));

        if let Some(ms) = self.delays_ms.get(&index) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        if self.timeouts.contains(&index) {
            return EngineOutcome::TimedOut;
        }
        if request.policy == OcrPolicy::SkipText {
            if let Some(code) = self.skip_text_exit {
                return EngineOutcome::Exited {
                    code: Some(code),
                    stderr: "page already has text".into(),
                };
            }
        }

        let mut out = b"ocr:".to_vec();
        out.extend(tokio::fs::read(&request.input).await.unwrap());
        tokio::fs::write(&request.output, out).await.unwrap();
        EngineOutcome::Exited {
            code: Some(0),
            stderr: String::new(),
        }
    }
}

struct FakeOffice;

#[async_trait]
impl DocumentConverter for FakeOffice {
    async fn convert(&self, input: &Path, out_dir: &Path) -> Result<(), Ocr2MdError> {
        let stem = input.file_stem().unwrap().to_string_lossy();
        let bytes = std::fs::read(input).unwrap();
        std::fs::write(out_dir.join(format!("{stem}.pdf")), bytes).unwrap();
        Ok(())
    }
}

/// Route library logs to the test harness; `RUST_LOG=debug` shows them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn converter_with(config: ConversionConfig, pdf: FakePdf, ocr: Arc<FakeOcr>) -> Converter {
    init_tracing();
    Converter::with_components(
        config,
        Arc::new(pdf),
        Arc::new(FakeOffice),
        ocr,
        Arc::new(ProgressTracker::new()),
        Arc::new(ArtifactStore::new()),
    )
}

fn converter(pdf: FakePdf, ocr: Arc<FakeOcr>) -> Converter {
    converter_with(ConversionConfig::default(), pdf, ocr)
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn timed_out_page_leaves_a_gap_but_keeps_siblings() {
    let ocr = Arc::new(FakeOcr {
        timeouts: HashSet::from([1]),
        ..Default::default()
    });
    let conv = converter(FakePdf::default(), ocr.clone());

    let id = conv.submit(fake_pdf(&["alpha", "beta", "gamma"]), "three.pdf", false);
    let report = conv.report(&id).await.unwrap();

    assert_eq!(report.page_count, 3);
    assert_eq!(report.failed_pages, 1);
    let summary = report.status.error().expect("status should carry an error");
    assert!(summary.contains("Page 2") && summary.contains("timed out"));
    assert!(!summary.contains("; "));

    assert_eq!(report.pages.len(), 3);
    assert_eq!(report.pages[0].markdown(), "ocr:alpha");
    assert!(report.pages[1].is_failed());
    assert_eq!(report.pages[1].markdown(), "");
    assert_eq!(report.pages[2].markdown(), "ocr:gamma");
    assert_eq!(
        report.markdown_content.as_deref(),
        Some("## Page 1\n\nocr:alpha\n\n## Page 2\n\n## Page 3\n\nocr:gamma\n")
    );

    let snap = conv.poll(&id);
    assert_eq!(snap.pages_processed, 3);
    assert_eq!(snap.failed_pages, vec![1]);
    assert_eq!(snap.stage, Stage::Completed);

    // Timeouts are never retried.
    assert_eq!(ocr.calls().len(), 3);
    assert!(ocr
        .calls()
        .iter()
        .all(|(_, p)| *p == OcrPolicy::ForceWithPreprocess));
}

#[tokio::test]
async fn ocr_pdf_falls_back_to_the_original_page_for_failures() {
    let ocr = Arc::new(FakeOcr {
        timeouts: HashSet::from([1]),
        ..Default::default()
    });
    let conv = converter(FakePdf::default(), ocr);

    let id = conv.submit(fake_pdf(&["alpha", "beta", "gamma"]), "three.pdf", false);
    let doc = conv.retrieve(&id).await.unwrap();
    assert_eq!(
        doc.ocr_pdf.as_deref(),
        Some(&b"ocr:alpha\x0cbeta\x0cocr:gamma"[..])
    );
    assert!(doc.error.is_some());
}

#[tokio::test]
async fn forced_single_image_runs_ocr_once() {
    let ocr = Arc::new(FakeOcr::default());
    let conv = converter(FakePdf::default(), ocr.clone());

    let report = conv
        .convert_document(b"scanned words".to_vec(), "scan.PNG", true)
        .await;

    assert!(report.status.is_success(), "{}", report.status);
    assert_eq!(report.page_count, 1);
    assert_eq!(ocr.calls(), vec![(0, OcrPolicy::Force)]);
    assert!(OcrPolicy::Force.flags().contains(&"--force-ocr"));

    let md = report.markdown_content.unwrap();
    assert_eq!(md.matches("## Page").count(), 1);
    assert!(md.contains("ocr:scanned words"));
    assert_eq!(report.content_preview, "## Page 1  ocr:scanned words ...");
}

#[tokio::test]
async fn unsupported_extension_is_rejected_before_any_page_work() {
    let ocr = Arc::new(FakeOcr::default());
    let conv = converter(FakePdf::default(), ocr.clone());

    let report = conv.convert_document(b"MZ".to_vec(), "setup.exe", false).await;

    assert_eq!(report.page_count, 0);
    assert!(report.status.error().unwrap().contains("Unsupported"));
    assert_eq!(report.content_preview, "No content");
    assert!(report.markdown_content.is_none());
    assert!(!conv.tracker().contains(&report.document_id));
    assert_eq!(conv.poll(&report.document_id).stage, Stage::Pending);
    assert!(ocr.calls().is_empty());
}

#[tokio::test]
async fn fragments_follow_page_order_not_completion_order() {
    let ocr = Arc::new(FakeOcr {
        delays_ms: HashMap::from([(0, 80), (1, 60), (2, 40), (3, 0)]),
        ..Default::default()
    });
    let conv = converter(FakePdf::default(), ocr);

    let report = conv
        .convert_document(fake_pdf(&["p0", "p1", "p2", "p3"]), "order.pdf", false)
        .await;

    let indices: Vec<usize> = report.pages.iter().map(|p| p.index()).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
    let md = report.markdown_content.unwrap();
    let positions: Vec<usize> = ["ocr:p0", "ocr:p1", "ocr:p2", "ocr:p3"]
        .iter()
        .map(|needle| md.find(needle).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn prior_text_exit_is_success_without_retry() {
    let ocr = Arc::new(FakeOcr {
        skip_text_exit: Some(6),
        ..Default::default()
    });
    let pdf = FakePdf {
        has_text: true,
        ..Default::default()
    };
    let conv = converter(pdf, ocr.clone());

    let report = conv
        .convert_document(fake_pdf(&["typed one", "typed two"]), "born-digital.pdf", false)
        .await;

    assert!(report.status.is_success(), "{}", report.status);
    assert_eq!(
        ocr.calls(),
        vec![(0, OcrPolicy::SkipText), (1, OcrPolicy::SkipText)]
    );
    // No OCR output was written, so the untouched page is used.
    assert_eq!(report.pages[0].markdown(), "typed one");
}

#[tokio::test]
async fn skip_text_failure_retries_once_with_force() {
    let ocr = Arc::new(FakeOcr {
        skip_text_exit: Some(2),
        ..Default::default()
    });
    let pdf = FakePdf {
        has_text: true,
        ..Default::default()
    };
    let conv = converter(pdf, ocr.clone());

    let report = conv
        .convert_document(fake_pdf(&["mixed"]), "mixed.pdf", false)
        .await;

    assert!(report.status.is_success(), "{}", report.status);
    assert_eq!(
        ocr.calls(),
        vec![(0, OcrPolicy::SkipText), (0, OcrPolicy::Force)]
    );
    assert_eq!(report.pages[0].markdown(), "ocr:mixed");
}

#[tokio::test]
async fn cleanup_is_idempotent_and_frees_artifacts() {
    let conv = converter(FakePdf::default(), Arc::new(FakeOcr::default()));

    let id = conv.submit(fake_pdf(&["a", "b"]), "two.pdf", false);
    let doc = conv.retrieve(&id).await.unwrap();
    assert_eq!(
        doc.markdown.as_deref(),
        Some("## Page 1\n\nocr:a\n\n## Page 2\n\nocr:b\n")
    );
    assert_eq!(conv.store().len(), 2);

    conv.cleanup(&id);
    conv.cleanup(&id);

    assert!(conv.store().is_empty());
    assert_eq!(conv.poll(&id).stage, Stage::Pending);
    assert!(conv.retrieve(&id).await.is_none());
}

#[tokio::test]
async fn cleanup_during_a_run_discards_its_artifacts() {
    let ocr = Arc::new(FakeOcr {
        delays_ms: HashMap::from([(0, 100)]),
        ..Default::default()
    });
    let conv = converter(FakePdf::default(), ocr.clone());

    let id = conv.submit(fake_pdf(&["slow", "fast"]), "slow.pdf", false);
    while ocr.calls().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    conv.cleanup(&id);

    // Let the run finish and store its Markdown and OCR'd PDF.
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(conv.store().is_empty(), "{} artifacts leaked", conv.store().len());
    assert!(!conv.tracker().contains(&id));
    assert!(conv.retrieve(&id).await.is_none());
}

#[tokio::test]
async fn unreadable_page_is_counted_as_failed() {
    let conv = converter(FakePdf::default(), Arc::new(FakeOcr::default()));

    let id = conv.submit(fake_pdf(&["fine", "unreadable scan"]), "mixed.pdf", false);
    let report = conv.report(&id).await.unwrap();

    assert_eq!(report.failed_pages, 1);
    assert!(report.pages[1].is_failed());
    assert_eq!(report.pages[0].markdown(), "ocr:fine");
    let summary = report.status.error().unwrap();
    assert!(summary.contains("Page 2") && summary.contains("text extraction failed"));
    assert_eq!(conv.poll(&id).failed_pages, vec![1]);
    assert_eq!(conv.poll(&id).pages_processed, 2);
}

#[tokio::test]
async fn stored_artifacts_round_trip_byte_identical() {
    let conv = converter(FakePdf::default(), Arc::new(FakeOcr::default()));

    let report = conv
        .convert_document(fake_pdf(&["x"]), "x.pdf", false)
        .await;
    let md_id = report.markdown_id.unwrap();
    let stored = conv.store().get(&md_id).unwrap();
    assert_eq!(&stored[..], report.markdown_content.unwrap().as_bytes());
}

#[tokio::test]
async fn office_documents_go_through_the_converter() {
    let conv = converter(FakePdf::default(), Arc::new(FakeOcr::default()));

    let report = conv
        .convert_document(b"hello office".to_vec(), "notes.txt", false)
        .await;

    assert!(report.status.is_success(), "{}", report.status);
    assert_eq!(report.pages[0].markdown(), "ocr:hello office");
}

#[tokio::test]
async fn split_mismatch_is_fatal_after_initialisation() {
    let pdf = FakePdf {
        split_short: true,
        ..Default::default()
    };
    let conv = converter(pdf, Arc::new(FakeOcr::default()));

    let report = conv
        .convert_document(fake_pdf(&["a", "b", "c"]), "short.pdf", false)
        .await;

    assert_eq!(report.page_count, 3);
    assert!(report.status.error().unwrap().contains("Splitting failed"));
    assert_eq!(conv.poll(&report.document_id).stage, Stage::Error);
}

#[tokio::test]
async fn zero_page_document_completes_empty() {
    let conv = converter(FakePdf::default(), Arc::new(FakeOcr::default()));

    let report = conv.convert_document(Vec::new(), "empty.pdf", false).await;

    assert!(report.status.is_success());
    assert_eq!(report.page_count, 0);
    assert_eq!(report.markdown_content.as_deref(), Some(""));
    assert_eq!(report.content_preview, "No content");
    assert_eq!(conv.poll(&report.document_id).stage, Stage::Completed);
}

#[tokio::test]
async fn batch_keeps_submission_order_and_bundles_markdown() {
    let config = ConversionConfig::builder()
        .document_concurrency(2)
        .build()
        .unwrap();
    let ocr = Arc::new(FakeOcr {
        delays_ms: HashMap::from([(0, 30)]),
        ..Default::default()
    });
    let conv = converter_with(config, FakePdf::default(), ocr);

    let batch = conv
        .convert_batch(
            vec![
                DocumentInput::new("first.pdf", fake_pdf(&["one"])),
                DocumentInput::new("bad.exe", b"MZ".to_vec()),
                DocumentInput::new("third.pdf", fake_pdf(&["three"])),
            ],
            false,
        )
        .await;

    let names: Vec<&str> = batch.results.iter().map(|r| r.file_name.as_str()).collect();
    assert_eq!(names, vec!["first.pdf", "bad.exe", "third.pdf"]);
    assert_eq!(batch.succeeded(), 2);

    let zip = markdown_zip(&batch.results).unwrap();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(zip)).unwrap();
    assert_eq!(archive.len(), 2);
    let mut first = String::new();
    archive
        .by_name("first.md")
        .unwrap()
        .read_to_string(&mut first)
        .unwrap();
    assert_eq!(first, "## Page 1\n\nocr:one\n");
}

#[tokio::test]
async fn unknown_ids_are_harmless() {
    let conv = converter(FakePdf::default(), Arc::new(FakeOcr::default()));
    let id = edgequake_ocr2md::DocumentId::new();

    assert_eq!(conv.poll(&id).stage, Stage::Pending);
    assert!(conv.report(&id).await.is_none());
    conv.cleanup(&id);
}

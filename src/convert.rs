//! Document conversion runtime and pipeline coordinator.
//!
//! [`Converter`] owns the configuration, the external collaborators (PDF
//! library, office converter, OCR engine) and the two shared registries
//! ([`ProgressTracker`], [`ArtifactStore`]). Nothing is global: tests build a
//! converter around mock collaborators and fresh registries.
//!
//! ## Two ways to call it
//!
//! - **Background**: [`Converter::submit`] returns a [`DocumentId`] at once;
//!   [`Converter::poll`] reads live progress, [`Converter::retrieve`] waits
//!   for the result, [`Converter::cleanup`] frees everything.
//! - **Eager**: [`Converter::convert_document`] and
//!   [`Converter::convert_batch`] wait and hand back [`DocumentReport`]s.
//!
//! Both paths run documents on a pool bounded by
//! [`ConversionConfig::document_concurrency`]; pages within one document fan
//! out to a second pool of [`ConversionConfig::page_pool_size`] workers.

use crate::config::ConversionConfig;
use crate::error::{Ocr2MdError, PageError};
use crate::output::{
    content_preview, round2, BatchReport, DocumentId, DocumentInput, DocumentReport,
    DocumentStatus, PageResult, RetrievedDocument,
};
use crate::pipeline::detect::has_embedded_text;
use crate::pipeline::extract::extract_page;
use crate::pipeline::normalize::{normalize, DocumentConverter, LibreOfficeConverter};
use crate::pipeline::ocr::{ocr_page, OcrEngine, OcrMyPdf, OcrPolicy, OcrSettings};
use crate::pipeline::pdf::{PdfBackend, PdfiumBackend};
use crate::pipeline::postprocess::clean_markdown;
use crate::pipeline::split::{split_pages, Page};
use crate::progress::{ProgressSnapshot, ProgressTracker, Stage};
use crate::store::ArtifactStore;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

/// How many page errors are spelled out in a document's error summary.
const SUMMARY_ERRORS: usize = 3;

/// Converts documents to Markdown. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Converter {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConversionConfig,
    pdf: Arc<dyn PdfBackend>,
    office: Arc<dyn DocumentConverter>,
    ocr: Arc<dyn OcrEngine>,
    tracker: Arc<ProgressTracker>,
    store: Arc<ArtifactStore>,
    documents: Arc<Semaphore>,
    runs: Mutex<HashMap<DocumentId, watch::Receiver<Option<DocumentReport>>>>,
}

impl Converter {
    /// A converter using pdfium, headless LibreOffice and ocrmypdf.
    pub fn new(config: ConversionConfig) -> Self {
        let office = LibreOfficeConverter::new(
            config.office_program.clone(),
            config.conversion_timeout_secs,
        );
        let ocr = OcrMyPdf::new(config.ocr_program.clone());
        Self::with_components(
            config,
            Arc::new(PdfiumBackend::new()),
            Arc::new(office),
            Arc::new(ocr),
            Arc::new(ProgressTracker::new()),
            Arc::new(ArtifactStore::new()),
        )
    }

    /// A converter around explicit collaborators and registries.
    pub fn with_components(
        config: ConversionConfig,
        pdf: Arc<dyn PdfBackend>,
        office: Arc<dyn DocumentConverter>,
        ocr: Arc<dyn OcrEngine>,
        tracker: Arc<ProgressTracker>,
        store: Arc<ArtifactStore>,
    ) -> Self {
        let documents = Arc::new(Semaphore::new(config.document_concurrency.max(1)));
        Self {
            inner: Arc::new(Inner {
                config,
                pdf,
                office,
                ocr,
                tracker,
                store,
                documents,
                runs: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.inner.config
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.inner.tracker
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.inner.store
    }

    // ── Background API ──────────────────────────────────────────────────────

    /// Start converting a document and return its id immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, bytes: Vec<u8>, filename: impl Into<String>, force_ocr: bool) -> DocumentId {
        let id = DocumentId::new();
        let input = DocumentInput::new(filename, bytes);
        let (tx, rx) = watch::channel(None);
        self.inner.lock_runs().insert(id, rx);
        info!("Document {}: submitted '{}'", id, input.filename);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let report = match Arc::clone(&inner.documents).acquire_owned().await {
                Ok(_permit) => inner.run_pipeline(id, input, force_ocr).await,
                Err(e) => DocumentReport::fatal(
                    id,
                    &input.filename,
                    0,
                    0.0,
                    Ocr2MdError::Unexpected(format!("document pool closed: {}", e)).to_string(),
                ),
            };
            // Publish under the runs lock so `cleanup` either sees the report
            // or has already removed the run.
            let runs = inner.lock_runs();
            if runs.contains_key(&id) {
                let _ = tx.send(Some(report));
                return;
            }
            drop(runs);
            debug!("Document {}: finished after cleanup, discarding", id);
            inner.release(&report);
            inner.tracker.remove(&id);
        });
        id
    }

    /// Live progress for `id`; a zeroed `pending` snapshot when unknown.
    pub fn poll(&self, id: &DocumentId) -> ProgressSnapshot {
        self.inner.tracker.snapshot(id)
    }

    /// Wait for `id` to finish and return its report. `None` when unknown.
    pub async fn report(&self, id: &DocumentId) -> Option<DocumentReport> {
        let mut rx = self.inner.lock_runs().get(id)?.clone();
        let report = match rx.wait_for(|r| r.is_some()).await {
            Ok(report) => (*report).clone(),
            Err(_) => {
                warn!("Document {}: pipeline task ended without a report", id);
                None
            }
        };
        report
    }

    /// Wait for `id` to finish and fetch its Markdown and OCR'd PDF.
    pub async fn retrieve(&self, id: &DocumentId) -> Option<RetrievedDocument> {
        let report = self.report(id).await?;
        let markdown = match report.markdown_id {
            Some(ref artifact) => self
                .inner
                .store
                .get(artifact)
                .ok()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
            None => None,
        };
        let ocr_pdf = report
            .ocr_pdf_id
            .and_then(|artifact| self.inner.store.get(&artifact).ok());
        Some(RetrievedDocument {
            markdown,
            ocr_pdf,
            error: report.status.error().map(str::to_string),
        })
    }

    /// Drop progress, artifacts and the report for `id`. Safe to repeat.
    pub fn cleanup(&self, id: &DocumentId) {
        let run = self.inner.lock_runs().remove(id);
        if let Some(rx) = run {
            if let Some(report) = rx.borrow().as_ref() {
                self.inner.release(report);
            }
        }
        if self.inner.tracker.remove(id) {
            debug!("Document {}: cleaned up", id);
        }
    }

    // ── Eager API ───────────────────────────────────────────────────────────

    /// Convert one document and wait for its report.
    pub async fn convert_document(
        &self,
        bytes: Vec<u8>,
        filename: impl Into<String>,
        force_ocr: bool,
    ) -> DocumentReport {
        let filename = filename.into();
        let id = self.submit(bytes, filename.clone(), force_ocr);
        match self.report(&id).await {
            Some(report) => report,
            None => DocumentReport::fatal(
                id,
                &filename,
                0,
                0.0,
                Ocr2MdError::Unexpected("conversion task did not report".into()).to_string(),
            ),
        }
    }

    /// Convert several documents concurrently; results keep submission order.
    pub async fn convert_batch(&self, inputs: Vec<DocumentInput>, force_ocr: bool) -> BatchReport {
        let start = Instant::now();
        info!("Batch of {} documents (force_ocr={})", inputs.len(), force_ocr);

        let submitted: Vec<(DocumentId, String)> = inputs
            .into_iter()
            .map(|input| {
                let id = self.submit(input.bytes, input.filename.clone(), force_ocr);
                (id, input.filename)
            })
            .collect();

        let mut results = Vec::with_capacity(submitted.len());
        for (id, filename) in submitted {
            let report = match self.report(&id).await {
                Some(report) => report,
                None => DocumentReport::fatal(
                    id,
                    &filename,
                    0,
                    0.0,
                    Ocr2MdError::Unexpected("conversion task did not report".into()).to_string(),
                ),
            };
            results.push(report);
        }

        let batch = BatchReport {
            total_processing_time_seconds: round2(start.elapsed().as_secs_f64()),
            results,
        };
        info!(
            "Batch complete: {}/{} documents succeeded in {:.2}s",
            batch.succeeded(),
            batch.results.len(),
            batch.total_processing_time_seconds
        );
        batch
    }
}

impl Inner {
    fn lock_runs(&self) -> MutexGuard<'_, HashMap<DocumentId, watch::Receiver<Option<DocumentReport>>>> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self, report: &DocumentReport) {
        for artifact in [report.markdown_id, report.ocr_pdf_id].into_iter().flatten() {
            self.store.delete(&artifact);
        }
    }

    /// Run one document end to end. Never fails: fatal errors become an
    /// error report.
    async fn run_pipeline(&self, id: DocumentId, input: DocumentInput, force_ocr: bool) -> DocumentReport {
        let start = Instant::now();
        info!("Document {}: converting '{}'", id, input.filename);

        let mut page_count = 0;
        match self
            .process(id, &input, force_ocr, start, &mut page_count)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                warn!("Document {}: '{}' failed: {}", id, input.filename, e);
                // Rejections before the page count is known leave no record.
                self.tracker.set_stage(&id, Stage::Error);
                DocumentReport::fatal(
                    id,
                    &input.filename,
                    page_count,
                    start.elapsed().as_secs_f64(),
                    e.to_string(),
                )
            }
        }
    }

    async fn process(
        &self,
        id: DocumentId,
        input: &DocumentInput,
        force_ocr: bool,
        start: Instant,
        page_count_out: &mut usize,
    ) -> Result<DocumentReport, Ocr2MdError> {
        let config = &self.config;
        let workdir = tempfile::Builder::new()
            .prefix("ocr2md-")
            .tempdir()
            .map_err(|e| Ocr2MdError::io(std::env::temp_dir(), e))?;

        // ── Step 1: Normalise to PDF ────────────────────────────────────────
        let pdf = normalize(
            &input.bytes,
            &input.filename,
            workdir.path(),
            self.pdf.as_ref(),
            self.office.as_ref(),
        )
        .await?;

        // ── Step 2: Detect embedded text ────────────────────────────────────
        let has_text = has_embedded_text(&pdf, self.pdf.as_ref()).await;
        let policy = OcrPolicy::select(force_ocr, has_text);

        // ── Step 3: Count pages, start progress ─────────────────────────────
        let page_count = self.pdf.page_count(&pdf).await?;
        *page_count_out = page_count;
        self.tracker.initialize(&id, page_count);
        info!(
            "Document {}: {} pages, embedded text: {}, policy {:?}",
            id, page_count, has_text, policy
        );

        // ── Step 4: Split ───────────────────────────────────────────────────
        let pages = split_pages(&pdf, page_count, self.pdf.as_ref()).await?;

        // ── Step 5: OCR + extract every page ────────────────────────────────
        let settings = OcrSettings {
            language: config.ocr_language.clone(),
            timeout: Duration::from_secs(config.ocr_timeout_secs),
            prior_ocr_exit_code: config.prior_ocr_exit_code,
        };
        let pool = config.page_pool_size(page_count);
        debug!("Document {}: page pool of {}", id, pool);

        let outcomes: Vec<PageOutcome> = stream::iter(
            pages
                .into_iter()
                .map(|page| self.process_page(id, page, policy, &settings, workdir.path())),
        )
        .buffer_unordered(pool)
        .collect()
        .await;

        // ── Step 6: Reorder into index slots ────────────────────────────────
        let mut slots: Vec<Option<PageOutcome>> = (0..page_count).map(|_| None).collect();
        for outcome in outcomes {
            let index = outcome.result.index();
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(outcome);
            }
        }
        let mut results = Vec::with_capacity(page_count);
        let mut ocr_pdfs = Vec::with_capacity(page_count);
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(outcome) => {
                    results.push(outcome.result);
                    ocr_pdfs.push(outcome.pdf);
                }
                None => {
                    return Err(Ocr2MdError::Unexpected(format!(
                        "page {} produced no result",
                        index + 1
                    )))
                }
            }
        }

        // ── Step 7: Assemble Markdown ───────────────────────────────────────
        self.tracker.set_stage(&id, Stage::Converting);
        let markdown = if results.is_empty() {
            String::new()
        } else {
            let raw = assemble(&results, config);
            clean_markdown(&raw, config.strip_non_ascii)
        };

        // ── Step 8: Store artifacts ─────────────────────────────────────────
        let ocr_pdf_id = if ocr_pdfs.is_empty() {
            None
        } else {
            match self.pdf.merge_pages(&ocr_pdfs).await {
                Ok(merged) => Some(self.store.put(merged)),
                Err(e) => {
                    warn!("Document {}: could not assemble OCR'd PDF: {}", id, e);
                    None
                }
            }
        };
        let markdown_id = Some(self.store.put(markdown.clone().into_bytes()));

        // ── Step 9: Aggregate errors ────────────────────────────────────────
        let errors: Vec<&PageError> = results.iter().filter_map(PageResult::error).collect();
        let failed_pages = errors.len();
        let status = match summarize_page_errors(&errors) {
            None => DocumentStatus::Success,
            Some(summary) => DocumentStatus::Error(summary),
        };
        self.tracker.set_stage(&id, Stage::Completed);

        let elapsed = start.elapsed().as_secs_f64();
        info!(
            "Document {}: {} pages ({} failed) in {:.2}s",
            id, page_count, failed_pages, elapsed
        );

        Ok(DocumentReport {
            document_id: id,
            file_name: input.filename.clone(),
            page_count,
            processing_time_seconds: round2(elapsed),
            status,
            content_preview: content_preview(Some(&markdown), config.preview_chars),
            markdown_content: Some(markdown),
            markdown_id,
            ocr_pdf_id,
            pages: results,
            failed_pages,
        })
    }

    /// OCR then extract one page. Counts the page exactly once, after its
    /// terminal outcome.
    async fn process_page(
        &self,
        id: DocumentId,
        page: Page,
        policy: OcrPolicy,
        settings: &OcrSettings,
        workdir: &Path,
    ) -> PageOutcome {
        let index = page.index;
        let outcome = match ocr_page(&page, policy, self.ocr.as_ref(), settings, workdir).await {
            Ok(ocr_pdf) => {
                let result = match extract_page(&ocr_pdf, page.number(), self.pdf.as_ref()).await {
                    Ok(markdown) => PageResult::Fragment { index, markdown },
                    Err(error) => PageResult::Failed { index, error },
                };
                PageOutcome {
                    result,
                    pdf: ocr_pdf,
                }
            }
            Err(error) => PageOutcome {
                result: PageResult::Failed { index, error },
                pdf: page.pdf,
            },
        };
        self.tracker
            .record_page_done(&id, index, outcome.result.is_failed());
        outcome
    }
}

/// A finished page: its result and the PDF that represents it in the OCR'd
/// document (the pre-OCR page when OCR failed).
struct PageOutcome {
    result: PageResult,
    pdf: Vec<u8>,
}

/// Concatenate page fragments in index order, each under its page marker.
fn assemble(results: &[PageResult], config: &ConversionConfig) -> String {
    let mut out = String::new();
    for result in results {
        out.push_str(&config.page_marker.render(result.index() + 1));
        out.push_str(result.markdown().trim());
        out.push_str("\n\n");
    }
    out
}

/// `None` when no page failed; otherwise the first few messages joined by
/// `"; "` plus a count of the rest.
pub(crate) fn summarize_page_errors(errors: &[&PageError]) -> Option<String> {
    if errors.is_empty() {
        return None;
    }
    let mut summary = errors
        .iter()
        .take(SUMMARY_ERRORS)
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    if errors.len() > SUMMARY_ERRORS {
        summary.push_str(&format!(" (and {} more)", errors.len() - SUMMARY_ERRORS));
    }
    Some(summary)
}

/// One output file stem per report, in order.
///
/// The stem is the input file name without its extension. Among reports that
/// carry Markdown, a repeated stem gets a `-2`, `-3`… suffix so `a.pdf` and
/// `a.png` never overwrite each other.
pub fn output_stems(reports: &[DocumentReport]) -> Vec<String> {
    let mut used: HashMap<String, usize> = HashMap::new();
    reports
        .iter()
        .map(|report| {
            let stem = Path::new(&report.file_name)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "document".to_string());
            if report.markdown_content.is_none() {
                return stem;
            }
            let seen = used.entry(stem.clone()).or_insert(0);
            *seen += 1;
            if *seen == 1 {
                stem
            } else {
                format!("{}-{}", stem, seen)
            }
        })
        .collect()
}

/// Bundle every produced Markdown document into a deflated ZIP.
///
/// Entries are named after [`output_stems`]. Reports without Markdown are
/// skipped.
pub fn markdown_zip(reports: &[DocumentReport]) -> Result<Vec<u8>, Ocr2MdError> {
    let zip_err = |e: zip::result::ZipError| Ocr2MdError::Unexpected(format!("zip: {}", e));
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let names = output_stems(reports);
    for (report, stem) in reports.iter().zip(names) {
        let Some(markdown) = report.markdown_content.as_deref() else {
            continue;
        };
        let name = format!("{}.md", stem);

        writer.start_file(name, options).map_err(zip_err)?;
        writer
            .write_all(markdown.as_bytes())
            .map_err(|e| Ocr2MdError::Unexpected(format!("zip: {}", e)))?;
    }

    let cursor = writer.finish().map_err(zip_err)?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageMarker;

    fn failed(index: usize) -> PageError {
        PageError::OcrTimeout {
            page: index + 1,
            secs: 30,
        }
    }

    #[test]
    fn no_errors_means_no_summary() {
        assert_eq!(summarize_page_errors(&[]), None);
    }

    #[test]
    fn summary_lists_first_three_and_counts_the_rest() {
        let errors: Vec<PageError> = (0..5).map(failed).collect();
        let refs: Vec<&PageError> = errors.iter().collect();
        let summary = summarize_page_errors(&refs).unwrap();
        assert_eq!(summary.matches("; ").count(), 2);
        assert!(summary.contains("Page 3"));
        assert!(!summary.contains("Page 4"));
        assert!(summary.ends_with(" (and 2 more)"));
    }

    #[test]
    fn assembly_follows_index_order_with_markers() {
        let results = vec![
            PageResult::Fragment {
                index: 0,
                markdown: "first".into(),
            },
            PageResult::Failed {
                index: 1,
                error: failed(1),
            },
            PageResult::Fragment {
                index: 2,
                markdown: "third\n".into(),
            },
        ];
        let config = ConversionConfig::default();
        let md = clean_markdown(&assemble(&results, &config), false);
        assert_eq!(md, "## Page 1\n\nfirst\n\n## Page 2\n\n## Page 3\n\nthird\n");
    }

    #[test]
    fn markerless_assembly_keeps_fragments_apart() {
        let results = vec![
            PageResult::Fragment {
                index: 0,
                markdown: "a".into(),
            },
            PageResult::Fragment {
                index: 1,
                markdown: "b".into(),
            },
        ];
        let config = ConversionConfig::builder()
            .page_marker(PageMarker::None)
            .build()
            .unwrap();
        assert_eq!(assemble(&results, &config), "a\n\nb\n\n");
    }

    fn report(file_name: &str, markdown: Option<&str>) -> DocumentReport {
        let mut report = DocumentReport::fatal(DocumentId::new(), file_name, 0, 0.0, "x".into());
        report.markdown_content = markdown.map(str::to_string);
        report
    }

    #[test]
    fn repeated_stems_get_numbered_suffixes() {
        let reports = vec![
            report("a.pdf", Some("one")),
            report("a.png", Some("two")),
            report("a.exe", None),
            report("b.docx", Some("three")),
            report("dir/a.tiff", Some("four")),
        ];
        assert_eq!(output_stems(&reports), vec!["a", "a-2", "a", "b", "a-3"]);

        let zip = markdown_zip(&reports).unwrap();
        let archive = zip::ZipArchive::new(std::io::Cursor::new(zip)).unwrap();
        let mut names: Vec<&str> = archive.file_names().collect();
        names.sort_unstable();
        assert_eq!(names, vec!["a-2.md", "a-3.md", "a.md", "b.md"]);
    }
}

//! CLI binary for edgequake-ocr2md.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConversionConfig`, submits every input to one `Converter`, drives a
//! progress bar from `Converter::poll`, and writes the results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_ocr2md::pipeline::input::resolve_input;
use edgequake_ocr2md::pipeline::pdf::PdfiumBackend;
use edgequake_ocr2md::{
    markdown_zip, output_stems, BatchReport, ConversionConfig, Converter, DocumentId, DocumentReport,
    PageMarker, Stage,
};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

const AFTER_HELP: &str = r#"EXAMPLES:
  # Scanned PDF to stdout
  ocr2md scan.pdf

  # Several files, one Markdown file each, plus the OCR'd PDFs
  ocr2md a.pdf b.png letter.docx -o out/ --ocr-pdf

  # Re-OCR documents that already contain (bad) text
  ocr2md --force-ocr old-scan.pdf -o out/

  # German text, ASCII-only output, everything bundled into a ZIP
  ocr2md --lang deu --strip-non-ascii *.pdf --zip markdown.zip

  # JSON report for every document
  ocr2md --json a.pdf b.pdf > report.json

SUPPORTED INPUTS:
  .pdf                                passed through
  .jpg .jpeg .png .tif .tiff .bmp     packaged as a one-page PDF
  .txt .csv .doc .docx .odt .rtf      converted with LibreOffice (soffice)

REQUIRED PROGRAMS:
  ocrmypdf (with tesseract and the language pack for --lang)
  soffice  (only for office/text inputs)
  libpdfium (system library path, or PDFIUM_LIB_PATH)

ENVIRONMENT VARIABLES:
  PDFIUM_LIB_PATH         pdfium library file or the directory containing it
  OCR2MD_*                every option below has an OCR2MD_ override
  RUST_LOG                tracing filter, overrides -v / -q
"#;

/// Convert PDFs, scans and office documents to Markdown via per-page OCR.
#[derive(Parser, Debug)]
#[command(
    name = "ocr2md",
    version,
    about = "Convert PDFs, scans and office documents to Markdown via per-page OCR",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file paths or HTTP/HTTPS URLs.
    #[arg(required = true, num_args = 1..)]
    inputs: Vec<String>,

    /// Write `<stem>.md` per input into this directory instead of stdout.
    #[arg(short, long, env = "OCR2MD_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Also write `<stem>.ocr.pdf` (requires --output-dir).
    #[arg(long, env = "OCR2MD_OCR_PDF", requires = "output_dir")]
    ocr_pdf: bool,

    /// Bundle every produced Markdown file into this ZIP archive.
    #[arg(long, env = "OCR2MD_ZIP")]
    zip: Option<PathBuf>,

    /// OCR every page even when the document already has text.
    #[arg(long, env = "OCR2MD_FORCE_OCR")]
    force_ocr: bool,

    /// Tesseract language code(s), e.g. eng, deu, eng+fra.
    #[arg(short, long, env = "OCR2MD_LANG", default_value = "eng")]
    lang: String,

    /// Per-page OCR timeout in seconds.
    #[arg(long, env = "OCR2MD_OCR_TIMEOUT", default_value_t = 300)]
    ocr_timeout: u64,

    /// Office conversion timeout in seconds.
    #[arg(long, env = "OCR2MD_CONVERSION_TIMEOUT", default_value_t = 120)]
    conversion_timeout: u64,

    /// Pages OCR'd at the same time within one document.
    #[arg(long, env = "OCR2MD_PAGE_CONCURRENCY", default_value_t = 8)]
    page_concurrency: usize,

    /// Documents converted at the same time.
    #[arg(long, env = "OCR2MD_DOCUMENT_CONCURRENCY", default_value_t = 4)]
    document_concurrency: usize,

    /// How each page is introduced in the Markdown.
    #[arg(long, env = "OCR2MD_PAGE_MARKER", value_enum, default_value = "heading")]
    page_marker: MarkerArg,

    /// Drop every non-ASCII character from the output.
    #[arg(long, env = "OCR2MD_STRIP_NON_ASCII")]
    strip_non_ascii: bool,

    /// OCR engine executable.
    #[arg(long, env = "OCR2MD_OCR_PROGRAM", default_value = "ocrmypdf")]
    ocr_program: String,

    /// Exit code with which the OCR engine reports "page already had text".
    #[arg(long, env = "OCR2MD_PRIOR_OCR_EXIT_CODE", default_value_t = 6)]
    prior_ocr_exit_code: i32,

    /// Office converter executable.
    #[arg(long, env = "OCR2MD_OFFICE_PROGRAM", default_value = "soffice")]
    office_program: String,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "OCR2MD_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Output the batch report as JSON instead of Markdown.
    #[arg(long, env = "OCR2MD_JSON")]
    json: bool,

    /// Disable progress bars.
    #[arg(long, env = "OCR2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "OCR2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "OCR2MD_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum MarkerArg {
    Heading,
    Comment,
    Rule,
    None,
}

impl From<MarkerArg> for PageMarker {
    fn from(v: MarkerArg) -> Self {
        match v {
            MarkerArg::Heading => PageMarker::Heading,
            MarkerArg::Comment => PageMarker::Comment,
            MarkerArg::Rule => PageMarker::HorizontalRule,
            MarkerArg::None => PageMarker::None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bars carry the feedback; INFO logs would tear them.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Fail fast without pdfium ─────────────────────────────────────────
    PdfiumBackend::new()
        .check()
        .await
        .context("PDF engine unavailable")?;

    let config = build_config(&cli)?;
    let download_timeout = config.download_timeout_secs;
    let converter = Converter::new(config);
    let start = Instant::now();

    // ── Resolve and submit inputs ────────────────────────────────────────
    let mut submitted: Vec<(DocumentId, String)> = Vec::with_capacity(cli.inputs.len());
    for raw in &cli.inputs {
        let input = resolve_input(raw, download_timeout)
            .await
            .with_context(|| format!("Failed to read input '{}'", raw))?;
        let id = converter.submit(input.bytes, input.filename.clone(), cli.force_ocr);
        submitted.push((id, input.filename));
    }

    // ── Progress ─────────────────────────────────────────────────────────
    let done = Arc::new(AtomicBool::new(false));
    let poller = show_progress.then(|| {
        tokio::spawn(poll_progress(
            converter.clone(),
            submitted.clone(),
            Arc::clone(&done),
        ))
    });

    let mut results: Vec<DocumentReport> = Vec::with_capacity(submitted.len());
    for (id, filename) in &submitted {
        let report = converter
            .report(id)
            .await
            .with_context(|| format!("No result for '{}'", filename))?;
        results.push(report);
    }
    done.store(true, Ordering::SeqCst);
    if let Some(handle) = poller {
        handle.await.ok();
    }

    let batch = BatchReport {
        total_processing_time_seconds: (start.elapsed().as_secs_f64() * 100.0).round() / 100.0,
        results,
    };

    // ── Write outputs ────────────────────────────────────────────────────
    if cli.json {
        let json = serde_json::to_string_pretty(&batch).context("Failed to serialise report")?;
        println!("{json}");
    } else if let Some(ref dir) = cli.output_dir {
        write_outputs(&converter, &batch, dir, cli.ocr_pdf).await?;
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        for report in &batch.results {
            if let Some(ref md) = report.markdown_content {
                handle
                    .write_all(md.as_bytes())
                    .context("Failed to write to stdout")?;
            }
        }
    }

    if let Some(ref zip_path) = cli.zip {
        let bytes = markdown_zip(&batch.results).context("Failed to build ZIP")?;
        tokio::fs::write(zip_path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", zip_path.display()))?;
    }

    if !cli.quiet && !cli.json {
        print_summary(&batch, cli.zip.as_deref());
    }

    for (id, _) in &submitted {
        converter.cleanup(id);
    }

    if batch.results.iter().all(|r| r.markdown_content.is_none()) {
        anyhow::bail!("No document could be converted");
    }
    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli) -> Result<ConversionConfig> {
    ConversionConfig::builder()
        .ocr_language(cli.lang.clone())
        .ocr_program(cli.ocr_program.clone())
        .ocr_timeout_secs(cli.ocr_timeout)
        .prior_ocr_exit_code(cli.prior_ocr_exit_code)
        .office_program(cli.office_program.clone())
        .conversion_timeout_secs(cli.conversion_timeout)
        .page_concurrency(cli.page_concurrency)
        .document_concurrency(cli.document_concurrency)
        .page_marker(cli.page_marker.clone().into())
        .strip_non_ascii(cli.strip_non_ascii)
        .download_timeout_secs(cli.download_timeout)
        .build()
        .context("Invalid configuration")
}

/// One bar per document, refreshed from `Converter::poll` until `done`.
async fn poll_progress(
    converter: Converter,
    documents: Vec<(DocumentId, String)>,
    done: Arc<AtomicBool>,
) {
    let multi = MultiProgress::new();
    let waiting = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(TICKS);
    let running = ProgressStyle::with_template(
        "{spinner:.cyan} {prefix:.bold}  \
         [{bar:36.green/238}] {pos:>3}/{len} pages  {msg}  ⏱ {elapsed_precise}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ")
    .tick_strings(TICKS);

    let bars: Vec<(DocumentId, ProgressBar)> = documents
        .into_iter()
        .map(|(id, name)| {
            let bar = multi.add(ProgressBar::new(0));
            bar.set_style(waiting.clone());
            bar.set_prefix(name);
            bar.set_message("queued");
            bar.enable_steady_tick(Duration::from_millis(80));
            (id, bar)
        })
        .collect();

    loop {
        let finished = done.load(Ordering::SeqCst);
        for (id, bar) in &bars {
            let snap = converter.poll(id);
            if snap.stage == Stage::Pending {
                continue;
            }
            if bar.length() != Some(snap.page_count as u64) {
                bar.set_style(running.clone());
                bar.set_length(snap.page_count as u64);
            }
            bar.set_position(snap.pages_processed as u64);
            let message = match snap.stage {
                Stage::Processing if !snap.failed_pages.is_empty() => {
                    red(&format!("{} failed", snap.failed_pages.len()))
                }
                Stage::Completed if snap.failed_pages.is_empty() => green("done"),
                Stage::Completed => red(&format!("done, {} failed", snap.failed_pages.len())),
                Stage::Error => red("error"),
                other => format!("{:?}", other).to_lowercase(),
            };
            bar.set_message(message);
        }
        if finished {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    for (_, bar) in bars {
        bar.finish_and_clear();
    }
}

/// Write `<stem>.md` (and optionally `<stem>.ocr.pdf`) per document, with the
/// same de-duplicated stems as the ZIP.
async fn write_outputs(
    converter: &Converter,
    batch: &BatchReport,
    dir: &Path,
    with_pdf: bool,
) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let stems = output_stems(&batch.results);
    for (report, stem) in batch.results.iter().zip(stems) {

        if let Some(ref md) = report.markdown_content {
            let path = dir.join(format!("{stem}.md"));
            write_atomic(&path, md.as_bytes()).await?;
        }

        if with_pdf {
            let pdf = converter
                .retrieve(&report.document_id)
                .await
                .and_then(|doc| doc.ocr_pdf);
            if let Some(bytes) = pdf {
                let path = dir.join(format!("{stem}.ocr.pdf"));
                write_atomic(&path, &bytes).await?;
            }
        }
    }
    Ok(())
}

/// Write to a temp sibling, then rename, so no partial file is left behind.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move output to {}", path.display()))?;
    Ok(())
}

fn print_summary(batch: &BatchReport, zip: Option<&Path>) {
    for report in &batch.results {
        let mark = if report.status.is_success() {
            green("✔")
        } else if report.markdown_content.is_some() {
            cyan("⚠")
        } else {
            red("✘")
        };
        eprintln!(
            "{} {}  {}  {}",
            mark,
            bold(&report.file_name),
            dim(&format!(
                "{} pages, {:.2}s",
                report.page_count, report.processing_time_seconds
            )),
            if report.status.is_success() {
                String::new()
            } else {
                red(&report.status.to_string())
            }
        );
    }
    eprintln!(
        "{}/{} documents converted cleanly in {:.2}s",
        batch.succeeded(),
        batch.results.len(),
        batch.total_processing_time_seconds
    );
    if let Some(path) = zip {
        eprintln!("   bundle → {}", bold(&path.display().to_string()));
    }
}

//! Per-page OCR: policy selection, engine invocation, retry state machine.
//!
//! ## Policy
//!
//! | `force_ocr` | embedded text | policy | flags |
//! |-------------|---------------|--------|-------|
//! | true  | any   | [`OcrPolicy::Force`] | `--force-ocr` |
//! | false | yes   | [`OcrPolicy::SkipText`] | `--skip-text` |
//! | false | no    | [`OcrPolicy::ForceWithPreprocess`] | `--force-ocr --deskew --clean` |
//!
//! ## Retry
//!
//! Only a skip-text run that fails with an unexpected exit code is retried,
//! once, with `--force-ocr` substituted. Timeouts are terminal: re-running a
//! process that already blew its time budget just doubles the damage. The
//! "already had text" exit code is a success and keeps whatever the engine
//! left behind (or the untouched input page when it wrote nothing).

use crate::error::PageError;
use crate::pipeline::split::Page;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Retries allowed after the first attempt.
pub const RETRY_BUDGET: u8 = 1;

/// Which flag set the engine is invoked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrPolicy {
    /// Rasterise and OCR every page, discarding existing text.
    Force,
    /// Leave pages that already have text alone.
    SkipText,
    /// Force OCR and clean up the scan first.
    ForceWithPreprocess,
}

impl OcrPolicy {
    pub fn select(force_ocr: bool, has_embedded_text: bool) -> Self {
        match (force_ocr, has_embedded_text) {
            (true, _) => OcrPolicy::Force,
            (false, true) => OcrPolicy::SkipText,
            (false, false) => OcrPolicy::ForceWithPreprocess,
        }
    }

    /// Command-line flags for the engine.
    pub fn flags(&self) -> &'static [&'static str] {
        match self {
            OcrPolicy::Force => &["--force-ocr"],
            OcrPolicy::SkipText => &["--skip-text"],
            OcrPolicy::ForceWithPreprocess => &["--force-ocr", "--deskew", "--clean"],
        }
    }

    /// Policy for the retry after an unexpected failure, if any.
    fn retry(&self) -> Option<OcrPolicy> {
        match self {
            OcrPolicy::SkipText => Some(OcrPolicy::Force),
            OcrPolicy::Force | OcrPolicy::ForceWithPreprocess => None,
        }
    }
}

/// One engine invocation.
#[derive(Debug, Clone)]
pub struct OcrRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub language: String,
    pub policy: OcrPolicy,
    pub timeout: Duration,
}

/// What the engine process did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    /// The process ended. `code` is `None` when it was killed by a signal or
    /// could not be spawned at all.
    Exited { code: Option<i32>, stderr: String },
    /// The process exceeded `OcrRequest::timeout` and was killed.
    TimedOut,
}

/// An external OCR engine.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Run the engine on `request.input`, writing `request.output`.
    ///
    /// Must return within roughly `request.timeout`.
    async fn run(&self, request: &OcrRequest) -> EngineOutcome;
}

/// [`OcrEngine`] that shells out to `ocrmypdf`.
#[derive(Debug, Clone)]
pub struct OcrMyPdf {
    program: String,
}

impl OcrMyPdf {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for OcrMyPdf {
    fn default() -> Self {
        Self::new("ocrmypdf")
    }
}

#[async_trait]
impl OcrEngine for OcrMyPdf {
    async fn run(&self, request: &OcrRequest) -> EngineOutcome {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-l").arg(&request.language);
        cmd.args(request.policy.flags());
        cmd.arg("--tesseract-timeout")
            .arg(request.timeout.as_secs().to_string())
            .arg("--jobs")
            .arg("1")
            .arg(&request.input)
            .arg(&request.output)
            .kill_on_drop(true);

        match tokio::time::timeout(request.timeout, cmd.output()).await {
            Err(_) => EngineOutcome::TimedOut,
            Ok(Err(e)) => EngineOutcome::Exited {
                code: None,
                stderr: format!("failed to run '{}': {}", self.program, e),
            },
            Ok(Ok(output)) => EngineOutcome::Exited {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            },
        }
    }
}

/// States of a page's OCR run.
///
/// ```text
/// Pending ─▶ Running ─┬─▶ Success
///                     ├─▶ Failed
///                     └─▶ RetryPending ─▶ Running(retry) ─┬─▶ Success
///                                                         └─▶ Failed
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcrState {
    Pending,
    Running { policy: OcrPolicy, attempt: u8 },
    RetryPending { policy: OcrPolicy, attempt: u8, last_error: String },
    /// `reused_existing` is set when the engine reported "already had text".
    Success { reused_existing: bool },
    Failed(PageError),
}

/// Facts the transition function needs besides the engine outcome.
#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    pub page_num: usize,
    pub prior_ocr_exit_code: i32,
    pub timeout_secs: u64,
}

impl OcrState {
    /// `Pending → Running`, or `RetryPending → Running(retry)`.
    pub fn start(self, initial: OcrPolicy) -> Self {
        match self {
            OcrState::Pending => OcrState::Running {
                policy: initial,
                attempt: 1,
            },
            OcrState::RetryPending {
                policy, attempt, ..
            } => OcrState::Running { policy, attempt },
            other => other,
        }
    }

    /// Apply an engine outcome to a `Running` state.
    pub fn advance(self, outcome: &EngineOutcome, c: &Classifier) -> Self {
        let OcrState::Running { policy, attempt } = self else {
            return self;
        };
        match outcome {
            EngineOutcome::TimedOut => OcrState::Failed(PageError::OcrTimeout {
                page: c.page_num,
                secs: c.timeout_secs,
            }),
            EngineOutcome::Exited { code: Some(0), .. } => OcrState::Success {
                reused_existing: false,
            },
            EngineOutcome::Exited { code: Some(code), .. } if *code == c.prior_ocr_exit_code => {
                OcrState::Success {
                    reused_existing: true,
                }
            }
            EngineOutcome::Exited { code, stderr } => {
                let detail = describe_failure(*code, stderr);
                match policy.retry() {
                    Some(next) if attempt <= RETRY_BUDGET => OcrState::RetryPending {
                        policy: next,
                        attempt: attempt + 1,
                        last_error: detail,
                    },
                    _ => OcrState::Failed(PageError::OcrFailed {
                        page: c.page_num,
                        attempts: attempt,
                        detail,
                    }),
                }
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OcrState::Success { .. } | OcrState::Failed(_))
    }
}

fn describe_failure(code: Option<i32>, stderr: &str) -> String {
    let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
    if stderr.is_empty() {
        format!("exit code {}", code)
    } else {
        format!("exit code {}: {}", code, stderr)
    }
}

/// Settings for [`ocr_page`], taken from the conversion config.
#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub language: String,
    pub timeout: Duration,
    pub prior_ocr_exit_code: i32,
}

/// OCR one page, returning the OCR'd single-page PDF.
///
/// Working files go to `workdir`, which the caller owns and deletes.
pub async fn ocr_page(
    page: &Page,
    policy: OcrPolicy,
    engine: &dyn OcrEngine,
    settings: &OcrSettings,
    workdir: &Path,
) -> Result<Vec<u8>, PageError> {
    let page_num = page.number();
    let input = workdir.join(format!("page-{:04}.pdf", page.index));
    let output = workdir.join(format!("page-{:04}.ocr.pdf", page.index));

    tokio::fs::write(&input, &page.pdf)
        .await
        .map_err(|e| PageError::OcrFailed {
            page: page_num,
            attempts: 0,
            detail: format!("cannot write page to {}: {}", input.display(), e),
        })?;

    let classifier = Classifier {
        page_num,
        prior_ocr_exit_code: settings.prior_ocr_exit_code,
        timeout_secs: settings.timeout.as_secs(),
    };

    let mut state = OcrState::Pending.start(policy);
    while !state.is_terminal() {
        let OcrState::Running { policy, attempt } = state else {
            state = state.start(policy);
            continue;
        };
        debug!(
            "Page {}: OCR attempt {} with {:?}",
            page_num, attempt, policy
        );
        let request = OcrRequest {
            input: input.clone(),
            output: output.clone(),
            language: settings.language.clone(),
            policy,
            timeout: settings.timeout,
        };
        let outcome = engine.run(&request).await;
        state = state.advance(&outcome, &classifier);
        if let OcrState::RetryPending { last_error, .. } = &state {
            warn!(
                "Page {}: skip-text OCR failed ({}), retrying with --force-ocr",
                page_num, last_error
            );
        }
    }

    match state {
        OcrState::Success { reused_existing } => {
            match tokio::fs::read(&output).await {
                Ok(bytes) => Ok(bytes),
                // "already had text" may leave no output behind: the input is the result
                Err(_) if reused_existing => {
                    debug!("Page {}: already had text, keeping input as-is", page_num);
                    Ok(page.pdf.clone())
                }
                Err(e) => Err(PageError::OcrFailed {
                    page: page_num,
                    attempts: 1,
                    detail: format!("engine reported success but {}: {}", output.display(), e),
                }),
            }
        }
        OcrState::Failed(error) => {
            warn!("{}", error);
            Err(error)
        }
        // The loop only exits on terminal states.
        other => Err(PageError::OcrFailed {
            page: page_num,
            attempts: 0,
            detail: format!("OCR stopped in non-terminal state {:?}", other),
        }),
    }
}

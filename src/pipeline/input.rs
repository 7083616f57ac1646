//! Input resolution: turn a user-supplied path or URL into a [`DocumentInput`].
//!
//! The pipeline works on in-memory bytes plus the original filename (the
//! extension picks the normalisation route), so both sources end up in the
//! same shape. Format checks are left to the normaliser: a URL serving a
//! `.docx` is as valid as a local one.

use crate::error::Ocr2MdError;
use crate::output::DocumentInput;
use std::path::Path;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Read a local file or download a URL.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<DocumentInput, Ocr2MdError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

async fn read_local(path_str: &str) -> Result<DocumentInput, Ocr2MdError> {
    let path = Path::new(path_str);
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| Ocr2MdError::io(path, e))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path_str.to_string());
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok(DocumentInput::new(filename, bytes))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<DocumentInput, Ocr2MdError> {
    info!("Downloading: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Ocr2MdError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let to_error = |e: reqwest::Error| {
        if e.is_timeout() {
            Ocr2MdError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Ocr2MdError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(to_error)?;
    if !response.status().is_success() {
        return Err(Ocr2MdError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(to_error)?;
    let filename = filename_from_url(url);
    info!("Downloaded {} bytes as '{}'", bytes.len(), filename);
    Ok(DocumentInput::new(filename, bytes.to_vec()))
}

/// Last path segment of `url` when it has an extension, else `downloaded.pdf`.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}

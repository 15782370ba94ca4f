//! Streaming archive download with progress tracking.

use crate::network::client::HttpClient;
use crate::{DefsError, Result};
use futures::StreamExt;
use tracing::info;

/// Progress information for a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes downloaded so far.
    pub bytes_downloaded: u64,
    /// Total bytes (if known).
    pub total_bytes: Option<u64>,
    /// `round(loaded / total * 100)`, clamped to 100. `None` if the total is unknown.
    pub percent: Option<u8>,
}

impl DownloadProgress {
    pub fn new(bytes_downloaded: u64, total_bytes: Option<u64>) -> Self {
        let percent = total_bytes.map(|total| {
            if total > 0 {
                let exact = (bytes_downloaded as f64 / total as f64) * 100.0;
                exact.round().min(100.0) as u8
            } else {
                0
            }
        });

        Self {
            bytes_downloaded,
            total_bytes,
            percent,
        }
    }
}

/// Emits progress only when the integer percent changes.
#[derive(Debug, Default)]
pub(crate) struct PercentGate {
    last: Option<u8>,
}

impl PercentGate {
    pub(crate) fn should_emit(&mut self, progress: &DownloadProgress) -> bool {
        match progress.percent {
            Some(percent) if self.last != Some(percent) => {
                self.last = Some(percent);
                true
            }
            _ => false,
        }
    }
}

/// Download a host-relative path into memory.
pub(crate) async fn download_bytes(
    http: &HttpClient,
    path: &str,
    on_progress: &(dyn Fn(DownloadProgress) + Send + Sync),
) -> Result<Vec<u8>> {
    let failed = |message: String, retryable: bool| DefsError::DownloadFailed {
        path: path.to_string(),
        message,
        retryable,
    };

    let response = http.get_download(path).await.map_err(|e| {
        let retryable = e.is_retryable();
        failed(e.to_string(), retryable)
    })?;
    let status = response.status();
    if !status.is_success() {
        return Err(failed(
            format!("Download failed with status {}", status),
            HttpClient::is_retryable_status(status),
        ));
    }

    let total_bytes = response.content_length();
    let mut buffer = Vec::with_capacity(total_bytes.unwrap_or(0).min(256 * 1024 * 1024) as usize);
    let mut gate = PercentGate::default();
    let mut stream = response.bytes_stream();

    let initial = DownloadProgress::new(0, total_bytes);
    if gate.should_emit(&initial) {
        on_progress(initial);
    }

    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| failed(format!("Error reading download stream: {}", e), true))?;
        buffer.extend_from_slice(&chunk);

        let progress = DownloadProgress::new(buffer.len() as u64, total_bytes);
        if gate.should_emit(&progress) {
            on_progress(progress);
        }
    }

    if let Some(total) = total_bytes {
        if total != buffer.len() as u64 {
            return Err(failed(
                format!(
                    "Truncated download: expected {} bytes, got {}",
                    total,
                    buffer.len()
                ),
                true,
            ));
        }
    }

    info!("Downloaded {} bytes from {}", buffer.len(), path);
    Ok(buffer)
}

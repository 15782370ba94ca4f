//! Seam between the engine and the remote content service.

use crate::config::SyncConfig;
use crate::network::client::HttpClient;
use crate::network::download::{download_bytes, DownloadProgress};
use crate::{DefsError, Result};
use async_trait::async_trait;
use serde_json::Value;

/// Remote content service: host-relative JSON documents and binary archives.
///
/// Implementations must not cache; freshness of the manifest depends on every
/// call reaching the service.
#[async_trait]
pub trait RemoteContent: Send + Sync {
    /// Fetch and parse a JSON document.
    async fn fetch_json(&self, path: &str) -> Result<Value>;

    /// Download a binary resource, reporting progress as bytes arrive.
    async fn download(
        &self,
        path: &str,
        on_progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> Result<Vec<u8>>;
}

/// [`RemoteContent`] over HTTPS.
pub struct HttpRemoteContent {
    http: HttpClient,
}

impl HttpRemoteContent {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(config)?,
        })
    }
}

#[async_trait]
impl RemoteContent for HttpRemoteContent {
    async fn fetch_json(&self, path: &str) -> Result<Value> {
        let response = self.http.get(path).await?;
        let status = response.status();
        if !status.is_success() {
            let message = format!("GET {} returned status {}", path, status);
            return Err(if HttpClient::is_retryable_status(status) {
                DefsError::Network {
                    message,
                    source: None,
                }
            } else {
                DefsError::Other(message)
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn download(
        &self,
        path: &str,
        on_progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> Result<Vec<u8>> {
        download_bytes(&self.http, path, on_progress).await
    }
}

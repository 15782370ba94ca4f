//! HTTP client bound to the content host.
//!
//! Wraps reqwest with:
//! - Host-relative URL building (`https://<host><path>`)
//! - API key header injection
//! - Configurable timeouts
//! - User-agent management

use crate::config::{NetworkConfig, SyncConfig};
use crate::{DefsError, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// HTTP client for one content host.
pub struct HttpClient {
    client: Client,
    base_url: Url,
    request_timeout: Duration,
    download_timeout: Duration,
}

impl HttpClient {
    /// Create a client from the sync configuration.
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let base_url = config.base_url()?;

        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(key).map_err(|e| DefsError::Config {
                message: format!("Invalid API key header value: {}", e),
            })?;
            headers.insert(NetworkConfig::API_KEY_HEADER, value);
        }

        let client = Client::builder()
            .user_agent(NetworkConfig::USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| DefsError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            })?;

        Ok(Self {
            client,
            base_url,
            request_timeout: config.request_timeout,
            download_timeout: config.download_timeout,
        })
    }

    /// Absolute URL for a host-relative path.
    pub fn url_for(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(|e| DefsError::Config {
            message: format!("Invalid remote path '{}': {}", path, e),
        })
    }

    /// GET a host-relative path with the request timeout.
    pub async fn get(&self, path: &str) -> Result<Response> {
        self.send(path, self.request_timeout).await
    }

    /// GET a host-relative path with the longer download timeout.
    pub async fn get_download(&self, path: &str) -> Result<Response> {
        self.send(path, self.download_timeout).await
    }

    /// Check if an HTTP status code indicates a transient failure.
    pub fn is_retryable_status(status: StatusCode) -> bool {
        matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
    }

    async fn send(&self, path: &str, timeout: Duration) -> Result<Response> {
        let url = self.url_for(path)?;
        debug!("GET {}", url);

        self.client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DefsError::Timeout(timeout)
                } else {
                    DefsError::Network {
                        message: format!("GET {} failed: {}", url, e),
                        source: Some(e),
                    }
                }
            })
    }
}

//! Centralized configuration for the definitions engine.
//!
//! Constant groups hold compiled-in defaults; [`SyncConfig`] carries the
//! runtime values a caller may override.

use crate::error::{DefsError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Cache schema generation. Bump when the stored dataset shape changes.
pub const SCHEMA_VERSION: &str = "v1";

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const DEFAULT_HOST: &'static str = "www.bungie.net";
    pub const MANIFEST_ENDPOINT: &'static str = "/Platform/Destiny2/Manifest/";
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);
    pub const USER_AGENT: &'static str = "defsync/0.1";
    pub const API_KEY_HEADER: &'static str = "X-API-Key";
    pub const MAX_RETRIES: u32 = 3;
}

/// Persistent store configuration.
pub struct StoreConfig;

impl StoreConfig {
    pub const DATABASE_FILE_NAME: &'static str = "definitions.sqlite";
    pub const CACHE_DIR_NAME: &'static str = "defsync";
}

/// Runtime configuration for a sync engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SyncConfig {
    /// Host serving the manifest, archives and JSON components.
    pub host: String,
    /// Path of the manifest endpoint on `host`.
    pub manifest_endpoint: String,
    /// API key sent with every request, when set.
    pub api_key: Option<String>,
    /// Timeout for manifest and JSON component requests.
    pub request_timeout: Duration,
    /// Timeout for archive downloads.
    pub download_timeout: Duration,
    /// Location of the SQLite store.
    pub cache_path: PathBuf,
    /// JSON components never fetched because a binary lite variant covers them.
    pub lite_excluded: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let cache_path = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(StoreConfig::CACHE_DIR_NAME)
            .join(StoreConfig::DATABASE_FILE_NAME);

        Self {
            host: NetworkConfig::DEFAULT_HOST.to_string(),
            manifest_endpoint: NetworkConfig::MANIFEST_ENDPOINT.to_string(),
            api_key: None,
            request_timeout: NetworkConfig::REQUEST_TIMEOUT,
            download_timeout: NetworkConfig::DOWNLOAD_TIMEOUT,
            cache_path,
            lite_excluded: crate::components::DEFAULT_LITE_VARIANTS
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }
}

impl SyncConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the content host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the API key.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.trim().is_empty());
        self
    }

    /// Set the store location.
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = path.into();
        self
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Base URL for every remote path, e.g. `https://www.bungie.net`.
    pub fn base_url(&self) -> Result<url::Url> {
        let raw = if self.host.contains("://") {
            self.host.clone()
        } else {
            format!("https://{}", self.host)
        };
        url::Url::parse(&raw).map_err(|e| DefsError::Config {
            message: format!("Invalid host '{}': {}", self.host, e),
        })
    }

    /// Validate values that would otherwise fail deep inside a sync.
    pub fn validate(&self) -> Result<()> {
        self.base_url()?;
        if !self.manifest_endpoint.starts_with('/') {
            return Err(DefsError::Config {
                message: format!(
                    "Manifest endpoint must be an absolute path: {}",
                    self.manifest_endpoint
                ),
            });
        }
        if self.request_timeout.is_zero() || self.download_timeout.is_zero() {
            return Err(DefsError::Config {
                message: "Timeouts must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.base_url().unwrap().as_str(), "https://www.bungie.net/");
        assert!(config
            .lite_excluded
            .contains(&"DestinyInventoryItemLiteDefinition".to_string()));
    }

    #[test]
    fn test_host_with_scheme() {
        let config = SyncConfig::new().with_host("http://127.0.0.1:8080");
        assert_eq!(config.base_url().unwrap().as_str(), "http://127.0.0.1:8080/");
    }

    #[test]
    fn test_blank_api_key_is_dropped() {
        let config = SyncConfig::new().with_api_key(Some("  ".into()));
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_relative_endpoint_rejected() {
        let mut config = SyncConfig::new();
        config.manifest_endpoint = "Platform/Manifest".into();
        assert!(matches!(config.validate(), Err(DefsError::Config { .. })));
    }
}

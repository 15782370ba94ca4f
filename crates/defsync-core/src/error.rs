//! Error types for the definitions sync engine.
//!
//! Every stage of the pipeline maps its failures onto one variant of
//! [`DefsError`], so callers can tell a dead upstream apart from a corrupt
//! archive without string matching.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the definitions engine.
#[derive(Debug, Error)]
pub enum DefsError {
    // Pipeline errors
    /// `retryable` is false when asking again cannot change the answer,
    /// such as a manifest without the requested language.
    #[error("Manifest unavailable for language '{language}': {message}")]
    UpstreamUnavailable {
        language: String,
        message: String,
        retryable: bool,
    },

    #[error("Download failed for {path}: {message}")]
    DownloadFailed {
        path: String,
        message: String,
        retryable: bool,
    },

    #[error("Definitions archive is empty")]
    EmptyArchive,

    #[error("Corrupt archive: {message}")]
    CorruptArchive { message: String },

    #[error("Corrupt definitions database: {message}")]
    CorruptDatabase { message: String },

    #[error("Failed to fetch JSON component {table}: {message}")]
    ComponentFetchFailed { table: String, message: String },

    #[error("Table not found in database or components: {table}")]
    TableNotFound { table: String },

    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for definitions operations.
pub type Result<T> = std::result::Result<T, DefsError>;

impl From<std::io::Error> for DefsError {
    fn from(err: std::io::Error) -> Self {
        DefsError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for DefsError {
    fn from(err: serde_json::Error) -> Self {
        DefsError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for DefsError {
    fn from(err: rusqlite::Error) -> Self {
        DefsError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for DefsError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DefsError::Timeout(std::time::Duration::from_secs(0))
        } else {
            DefsError::Network {
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

impl From<tokio::task::JoinError> for DefsError {
    fn from(err: tokio::task::JoinError) -> Self {
        DefsError::Other(format!("Background task failed: {}", err))
    }
}

impl DefsError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        DefsError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Error raised when a mutex guarding a store connection was poisoned.
    pub(crate) fn lock_poisoned(what: &str) -> Self {
        DefsError::Database {
            message: format!("Failed to lock {}", what),
            source: None,
        }
    }

    /// Short machine-readable name of the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            DefsError::UpstreamUnavailable { .. } => "upstream_unavailable",
            DefsError::DownloadFailed { .. } => "download_failed",
            DefsError::EmptyArchive => "empty_archive",
            DefsError::CorruptArchive { .. } => "corrupt_archive",
            DefsError::CorruptDatabase { .. } => "corrupt_database",
            DefsError::ComponentFetchFailed { .. } => "component_fetch_failed",
            DefsError::TableNotFound { .. } => "table_not_found",
            DefsError::Network { .. } | DefsError::Timeout(_) => "network",
            DefsError::Database { .. } => "database",
            DefsError::Io { .. } => "io",
            DefsError::Json { .. } => "json",
            DefsError::Config { .. } => "config",
            DefsError::Other(_) => "other",
        }
    }

    /// Check if a caller-side retry could plausibly succeed.
    ///
    /// The engine never retries on its own; this only informs retry helpers.
    pub fn is_retryable(&self) -> bool {
        match self {
            DefsError::UpstreamUnavailable { retryable, .. }
            | DefsError::DownloadFailed { retryable, .. } => *retryable,
            DefsError::Network { .. }
            | DefsError::Timeout(_)
            | DefsError::ComponentFetchFailed { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DefsError::UpstreamUnavailable {
            language: "en".into(),
            message: "no entry".into(),
            retryable: false,
        };
        assert_eq!(
            err.to_string(),
            "Manifest unavailable for language 'en': no entry"
        );
        assert_eq!(DefsError::EmptyArchive.to_string(), "Definitions archive is empty");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(DefsError::EmptyArchive.kind(), "empty_archive");
        assert_eq!(
            DefsError::TableNotFound {
                table: "Foo".into()
            }
            .kind(),
            "table_not_found"
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(DefsError::Timeout(std::time::Duration::from_secs(5)).is_retryable());
        assert!(DefsError::DownloadFailed {
            path: "/a".into(),
            message: "reset".into(),
            retryable: true,
        }
        .is_retryable());
        assert!(!DefsError::DownloadFailed {
            path: "/a".into(),
            message: "Download failed with status 404 Not Found".into(),
            retryable: false,
        }
        .is_retryable());
        assert!(!DefsError::UpstreamUnavailable {
            language: "xx".into(),
            message: "Manifest has no content path for language".into(),
            retryable: false,
        }
        .is_retryable());
        assert!(!DefsError::EmptyArchive.is_retryable());
        assert!(!DefsError::CorruptDatabase {
            message: "bad header".into()
        }
        .is_retryable());
    }
}

//! Manifest resolution: which archive and JSON components are current.

use crate::models::ResolvedManifest;
use crate::network::RemoteContent;
use crate::{DefsError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Platform response envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Response")]
    response: Option<Value>,
    #[serde(rename = "ErrorCode")]
    error_code: Option<i64>,
    #[serde(rename = "Message")]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestBody {
    #[serde(default)]
    mobile_world_content_paths: HashMap<String, String>,
    #[serde(default)]
    json_world_component_content_paths: HashMap<String, BTreeMap<String, String>>,
}

/// Asks the remote service which dataset is current. Never caches.
#[derive(Clone)]
pub struct VersionResolver {
    remote: Arc<dyn RemoteContent>,
    endpoint: String,
}

impl VersionResolver {
    pub fn new(remote: Arc<dyn RemoteContent>, endpoint: impl Into<String>) -> Self {
        Self {
            remote,
            endpoint: endpoint.into(),
        }
    }

    /// Current manifest path and JSON component paths for `language`.
    ///
    /// Any failure, including a manifest without an entry for `language`,
    /// is [`DefsError::UpstreamUnavailable`].
    pub async fn resolve_manifest(&self, language: &str) -> Result<ResolvedManifest> {
        debug!("Requesting manifest for language {}", language);

        let body = self
            .remote
            .fetch_json(&self.endpoint)
            .await
            .map_err(|e| {
                let retryable = e.is_retryable();
                unavailable(language, e.to_string(), retryable)
            })?;

        let manifest = parse_manifest(body, language)?;
        info!(
            "Current definitions for {}: {} ({} JSON components)",
            language,
            manifest.manifest_path,
            manifest.json_component_paths.len()
        );
        Ok(manifest)
    }
}

fn unavailable(language: &str, message: impl Into<String>, retryable: bool) -> DefsError {
    DefsError::UpstreamUnavailable {
        language: language.to_string(),
        message: message.into(),
        retryable,
    }
}

/// Pull the entries for `language` out of a manifest document, with or
/// without the platform envelope.
pub(crate) fn parse_manifest(body: Value, language: &str) -> Result<ResolvedManifest> {
    let envelope: Envelope = serde_json::from_value(body.clone())
        .map_err(|e| unavailable(language, format!("Unreadable manifest: {}", e), false))?;

    if let Some(code) = envelope.error_code {
        if code != 1 {
            let message = envelope
                .message
                .unwrap_or_else(|| format!("Manifest request failed with error code {}", code));
            // Platform error codes mostly mean maintenance or throttling
            return Err(unavailable(language, message, true));
        }
    }

    let payload = envelope.response.unwrap_or(body);
    let mut manifest: ManifestBody = serde_json::from_value(payload)
        .map_err(|e| unavailable(language, format!("Unreadable manifest: {}", e), false))?;

    let manifest_path = manifest
        .mobile_world_content_paths
        .remove(language)
        .filter(|path| !path.is_empty())
        .ok_or_else(|| {
            unavailable(language, "Manifest has no content path for language", false)
        })?;

    Ok(ResolvedManifest {
        manifest_path,
        json_component_paths: manifest
            .json_world_component_content_paths
            .remove(language)
            .unwrap_or_default(),
    })
}

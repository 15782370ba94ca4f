//! Versioned dataset cache keys.

use crate::config::SCHEMA_VERSION;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key of one immutable dataset snapshot: `<schema_version>:<manifest_path>`.
///
/// Two different manifest paths never produce the same key under one schema
/// version, because the schema version contains no `:` and the manifest path
/// is carried verbatim after the first separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key from an explicit schema version.
    pub fn new(schema_version: &str, manifest_path: &str) -> Self {
        Self(format!("{}:{}", schema_version, manifest_path))
    }

    /// Build a key under the compiled-in schema version.
    pub fn current(manifest_path: &str) -> Self {
        Self::new(SCHEMA_VERSION, manifest_path)
    }

    /// Wrap a raw stored key. Returns `None` if it has no schema prefix.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.split_once(':') {
            Some((schema, _)) if !schema.is_empty() => Some(Self(raw.to_string())),
            _ => None,
        }
    }

    /// Prefix that every key of `schema_version` starts with.
    pub fn prefix(schema_version: &str) -> String {
        format!("{}:", schema_version)
    }

    pub fn schema_version(&self) -> &str {
        self.0.split_once(':').map(|(schema, _)| schema).unwrap_or("")
    }

    pub fn manifest_path(&self) -> &str {
        self.0.split_once(':').map(|(_, path)| path).unwrap_or("")
    }

    /// Whether this key was produced for `manifest_path`.
    pub fn references(&self, manifest_path: &str) -> bool {
        self.manifest_path() == manifest_path
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//! Resolved manifest descriptor.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What the remote service currently publishes for one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedManifest {
    /// Path of the archive holding the binary database payload.
    pub manifest_path: String,
    /// Table name to JSON component path.
    pub json_component_paths: BTreeMap<String, String>,
}

impl ResolvedManifest {
    pub fn new(manifest_path: impl Into<String>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            json_component_paths: BTreeMap::new(),
        }
    }

    /// Add an advertised JSON component.
    pub fn with_component(mut self, table: impl Into<String>, path: impl Into<String>) -> Self {
        self.json_component_paths.insert(table.into(), path.into());
        self
    }
}

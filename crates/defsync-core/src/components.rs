//! Tables published only as standalone JSON resources.

use crate::cache::ComponentCache;
use crate::models::TableRecords;
use crate::network::RemoteContent;
use crate::{DefsError, Result};
use futures::future::try_join_all;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// JSON components skipped by default: the binary database carries a lite
/// variant that stands in for each of them.
pub const DEFAULT_LITE_VARIANTS: &[&str] = &["DestinyInventoryItemLiteDefinition"];

/// Named set of JSON components that are never fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LitePolicy {
    excluded: BTreeSet<String>,
}

impl Default for LitePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_LITE_VARIANTS.iter().copied())
    }
}

impl LitePolicy {
    pub fn new<I, S>(excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded: excluded.into_iter().map(Into::into).collect(),
        }
    }

    /// A policy that fetches every advertised component.
    pub fn none() -> Self {
        Self {
            excluded: BTreeSet::new(),
        }
    }

    pub fn excludes(&self, table: &str) -> bool {
        self.excluded.contains(table)
    }
}

/// Downloads JSON components the binary database does not provide.
#[derive(Clone)]
pub struct RemoteComponentFetcher {
    remote: Arc<dyn RemoteContent>,
    cache: ComponentCache,
}

impl RemoteComponentFetcher {
    pub fn new(remote: Arc<dyn RemoteContent>, cache: ComponentCache) -> Self {
        Self { remote, cache }
    }

    /// Fetch every component in `component_paths` that is neither in
    /// `already_have` nor excluded by `policy`.
    ///
    /// All fetches must succeed; the first failure is returned as
    /// [`DefsError::ComponentFetchFailed`] and nothing is merged.
    pub async fn fetch_missing(
        &self,
        component_paths: &BTreeMap<String, String>,
        already_have: &BTreeSet<String>,
        policy: &LitePolicy,
    ) -> Result<BTreeMap<String, TableRecords>> {
        let wanted: Vec<(&String, &String)> = component_paths
            .iter()
            .filter(|(table, _)| !already_have.contains(*table) && !policy.excludes(table))
            .collect();

        if wanted.is_empty() {
            return Ok(BTreeMap::new());
        }
        info!(
            "Fetching {} JSON components: {:?}",
            wanted.len(),
            wanted.iter().map(|(table, _)| table.as_str()).collect::<Vec<_>>()
        );

        let fetched = try_join_all(
            wanted
                .into_iter()
                .map(|(table, path)| self.fetch_component(table, path)),
        )
        .await?;

        Ok(fetched.into_iter().collect())
    }

    async fn fetch_component(&self, table: &str, path: &str) -> Result<(String, TableRecords)> {
        let failed = |message: String| DefsError::ComponentFetchFailed {
            table: table.to_string(),
            message,
        };

        if let Some(records) = self.cached(table, path).await {
            return Ok((table.to_string(), records));
        }

        let value = self
            .remote
            .fetch_json(path)
            .await
            .map_err(|e| failed(e.to_string()))?;
        let body = serde_json::to_vec(&value).map_err(|e| failed(e.to_string()))?;
        let records = TableRecords::from_json(value)
            .ok_or_else(|| failed(format!("{} is neither an object nor an array", path)))?;

        if let Err(e) = self.cache.put(path, body).await {
            warn!("Failed to cache JSON component {}: {}", path, e);
        }
        debug!("Fetched JSON component {} ({} records)", table, records.len());
        Ok((table.to_string(), records))
    }

    /// A previously stored body for `path`, if it still parses.
    async fn cached(&self, table: &str, path: &str) -> Option<TableRecords> {
        let body = match self.cache.get(path).await {
            Ok(body) => body?,
            Err(e) => {
                warn!("Failed to read cached JSON component {}: {}", path, e);
                return None;
            }
        };
        let records = serde_json::from_slice::<Value>(&body)
            .ok()
            .and_then(TableRecords::from_json);
        match records {
            Some(records) => {
                debug!("Using cached JSON component {}", table);
                Some(records)
            }
            None => {
                warn!("Ignoring unreadable cached JSON component {}", path);
                None
            }
        }
    }
}

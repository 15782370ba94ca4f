//! Versioned dataset cache with early lookup and stale-entry cleanup.

use super::blob::BlobCache;
use super::store::{DefinitionsStore, StoreTable};
use crate::models::{CacheKey, Dataset};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One stored dataset snapshot.
#[derive(Debug, Clone)]
pub struct DatasetCacheEntry {
    pub key: CacheKey,
    pub data: Arc<Dataset>,
}

/// What a cleanup pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub datasets_removed: Vec<String>,
    pub blobs_removed: Vec<String>,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.datasets_removed.is_empty() && self.blobs_removed.is_empty()
    }
}

/// Dataset snapshots keyed by [`CacheKey`].
#[derive(Clone)]
pub struct DatasetCache {
    store: DefinitionsStore,
    blobs: BlobCache,
}

impl DatasetCache {
    pub fn new(store: DefinitionsStore, blobs: BlobCache) -> Self {
        Self { store, blobs }
    }

    /// Most recent entry stored under `schema_version`.
    ///
    /// An entry that no longer decodes is reported as absent; the next
    /// successful sync replaces it and cleanup removes it.
    pub async fn find_cached_by_version_prefix(
        &self,
        schema_version: &str,
    ) -> Result<Option<DatasetCacheEntry>> {
        let prefix = CacheKey::prefix(schema_version);
        let found = self
            .store
            .run_blocking(move |store| {
                let Some((raw_key, bytes)) =
                    store.latest_with_prefix(StoreTable::Datasets, &prefix)?
                else {
                    return Ok(None);
                };
                Ok(Some((raw_key, Dataset::from_bytes(&bytes))))
            })
            .await?;

        let Some((raw_key, decoded)) = found else {
            return Ok(None);
        };
        let Some(key) = CacheKey::parse(&raw_key) else {
            warn!("Ignoring cached dataset with malformed key {}", raw_key);
            return Ok(None);
        };

        match decoded {
            Ok(dataset) => Ok(Some(DatasetCacheEntry {
                key,
                data: Arc::new(dataset),
            })),
            Err(e) => {
                warn!("Ignoring undecodable cached dataset {}: {}", key, e);
                Ok(None)
            }
        }
    }

    /// True iff `requested` is unset or every requested table is in the entry.
    pub fn has_all_tables(entry: &DatasetCacheEntry, requested: Option<&[String]>) -> bool {
        entry.data.has_all_tables(requested)
    }

    pub async fn put(&self, entry: &DatasetCacheEntry) -> Result<()> {
        let key = entry.key.clone();
        let data = Arc::clone(&entry.data);
        self.store
            .run_blocking(move |store| {
                let bytes = data.to_bytes()?;
                store.put(StoreTable::Datasets, key.as_str(), &bytes)?;
                debug!("Stored dataset {} ({} bytes)", key, bytes.len());
                Ok(())
            })
            .await
    }

    pub async fn get(&self, key: &CacheKey) -> Result<Option<Dataset>> {
        let key = key.clone();
        self.store
            .run_blocking(move |store| {
                store
                    .get(StoreTable::Datasets, key.as_str())?
                    .map(|bytes| Dataset::from_bytes(&bytes).map_err(Into::into))
                    .transpose()
            })
            .await
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        self.store
            .run_blocking(|store| store.keys(StoreTable::Datasets))
            .await
    }

    /// Delete every dataset other than `key_to_keep` and every archive blob
    /// other than the one at `key_to_keep`'s manifest path.
    ///
    /// Never deletes `key_to_keep` itself. Running it twice is the same as
    /// running it once.
    pub async fn cleanup_stale(&self, key_to_keep: &CacheKey) -> Result<CleanupReport> {
        let keep = key_to_keep.clone();
        let datasets_removed = self
            .store
            .run_blocking(move |store| {
                store.delete_where_not(StoreTable::Datasets, |key| key == keep.as_str())
            })
            .await?;
        if !datasets_removed.is_empty() {
            info!("Deleted stale definitions data {:?}", datasets_removed);
        }

        let blobs_removed = self
            .blobs
            .delete_all_except(key_to_keep.manifest_path())
            .await?;
        if !blobs_removed.is_empty() {
            info!("Deleted stale definitions archives {:?}", blobs_removed);
        }

        Ok(CleanupReport {
            datasets_removed,
            blobs_removed,
        })
    }
}

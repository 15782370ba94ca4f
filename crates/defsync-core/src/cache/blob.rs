//! Archive blob cache keyed by manifest path.

use super::store::{DefinitionsStore, StoreTable};
use crate::network::{DownloadProgress, RemoteContent};
use crate::{DefsError, Result};
use tracing::{debug, info};

/// Downloaded archives. An archive at a given path never changes, so a
/// cached path is never downloaded again.
#[derive(Clone)]
pub struct BlobCache {
    store: DefinitionsStore,
}

impl BlobCache {
    pub fn new(store: DefinitionsStore) -> Self {
        Self { store }
    }

    pub async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let path = path.to_string();
        self.store
            .run_blocking(move |store| store.get(StoreTable::ArchiveBlobs, &path))
            .await
    }

    pub async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        let path = path.to_string();
        self.store
            .run_blocking(move |store| store.put(StoreTable::ArchiveBlobs, &path, &bytes))
            .await
    }

    /// Return the cached archive for `path`, downloading and storing it first
    /// if absent.
    pub async fn fetch_or_download(
        &self,
        path: &str,
        remote: &dyn RemoteContent,
        on_progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> Result<Vec<u8>> {
        let storage_failed = |e: DefsError| DefsError::DownloadFailed {
            path: path.to_string(),
            message: format!("Archive store unavailable: {}", e),
            retryable: false,
        };

        if let Some(cached) = self.get(path).await.map_err(storage_failed)? {
            info!("Archive {} was already cached ({} bytes)", path, cached.len());
            return Ok(cached);
        }

        debug!("Requesting fresh definitions archive {}", path);
        let bytes = remote.download(path, on_progress).await.map_err(|e| match e {
            DefsError::DownloadFailed { .. } => e,
            other => DefsError::DownloadFailed {
                path: path.to_string(),
                retryable: other.is_retryable(),
                message: other.to_string(),
            },
        })?;

        info!("Finished downloading archive {}, storing it", path);
        self.put(path, bytes.clone()).await.map_err(storage_failed)?;
        Ok(bytes)
    }

    /// Delete every archive except `key_to_keep`. Returns the deleted paths.
    pub async fn delete_all_except(&self, key_to_keep: &str) -> Result<Vec<String>> {
        let keep = key_to_keep.to_string();
        self.store
            .run_blocking(move |store| {
                store.delete_where_not(StoreTable::ArchiveBlobs, |key| key == keep)
            })
            .await
    }

    pub async fn paths(&self) -> Result<Vec<String>> {
        self.store
            .run_blocking(|store| store.keys(StoreTable::ArchiveBlobs))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CountingRemote {
        downloads: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl RemoteContent for CountingRemote {
        async fn fetch_json(&self, path: &str) -> Result<Value> {
            Err(DefsError::Other(format!("unexpected fetch of {}", path)))
        }

        async fn download(
            &self,
            path: &str,
            on_progress: &(dyn Fn(DownloadProgress) + Send + Sync),
        ) -> Result<Vec<u8>> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DefsError::Network {
                    message: format!("reset while fetching {}", path),
                    source: None,
                });
            }
            on_progress(DownloadProgress::new(2, Some(4)));
            on_progress(DownloadProgress::new(4, Some(4)));
            Ok(b"PK-archive".to_vec())
        }
    }

    fn remote(fail: bool) -> CountingRemote {
        CountingRemote {
            downloads: AtomicUsize::new(0),
            fail,
        }
    }

    #[tokio::test]
    async fn test_downloads_once_per_path() {
        let cache = BlobCache::new(DefinitionsStore::open_in_memory().unwrap());
        let remote = remote(false);
        let seen = Mutex::new(Vec::new());
        let on_progress = |p: DownloadProgress| seen.lock().unwrap().push(p.percent);

        let first = cache
            .fetch_or_download("/a/1.content", &remote, &on_progress)
            .await
            .unwrap();
        let second = cache
            .fetch_or_download("/a/1.content", &remote, &on_progress)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(remote.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec![Some(50), Some(100)]);
    }

    #[tokio::test]
    async fn test_failed_download_is_not_stored() {
        let cache = BlobCache::new(DefinitionsStore::open_in_memory().unwrap());
        let err = cache
            .fetch_or_download("/a/1.content", &remote(true), &|_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, DefsError::DownloadFailed { ref path, .. } if path == "/a/1.content"));
        // A transport failure keeps its retry classification
        assert!(err.is_retryable());
        assert!(cache.get("/a/1.content").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_all_except() {
        let cache = BlobCache::new(DefinitionsStore::open_in_memory().unwrap());
        cache.put("/a/1.content", b"one".to_vec()).await.unwrap();
        cache.put("/a/2.content", b"two".to_vec()).await.unwrap();

        let deleted = cache.delete_all_except("/a/2.content").await.unwrap();
        assert_eq!(deleted, vec!["/a/1.content".to_string()]);
        assert_eq!(cache.paths().await.unwrap(), vec!["/a/2.content".to_string()]);
    }
}

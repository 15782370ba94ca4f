//! End-to-end definitions sync.
//!
//! A request runs through these steps:
//!
//! 1. The newest cached dataset of the current schema is looked up while the
//!    manifest is resolved. If it has every requested table it is delivered
//!    at once as [`DefinitionsUpdate::Early`].
//! 2. If that early entry was built from the resolved manifest path, the
//!    request ends with [`DefinitionsUpdate::UpToDate`].
//! 3. Otherwise the archive is downloaded (or read from the blob cache),
//!    unzipped and its tables extracted, while both decoding engines
//!    initialize.
//! 4. Missing JSON components are merged in and the dataset is stored.
//!    Stale entries are then deleted in the background and the request ends
//!    with [`DefinitionsUpdate::Fresh`].
//!
//! Any failure ends the request with [`DefinitionsUpdate::Failed`]. An early
//! delivery is never retracted, and a failed sync never writes a dataset.

use crate::cache::{
    BlobCache, ComponentCache, DatasetCache, DatasetCacheEntry, DefinitionsStore, StoreStats,
};
use crate::components::{LitePolicy, RemoteComponentFetcher};
use crate::config::{SyncConfig, SCHEMA_VERSION};
use crate::extract::ExtractionEngines;
use crate::models::{CacheKey, Dataset, ResolvedManifest};
use crate::network::{DownloadProgress, HttpRemoteContent, RemoteContent};
use crate::progress::{ProgressEvent, ProgressReporter, SyncStage};
use crate::resolver::VersionResolver;
use crate::{DefsError, Result};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What the caller wants synced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionsRequest {
    pub language: String,
    /// Tables to extract from the binary database; `None` means all of them.
    /// Advertised JSON components are merged in either way.
    pub tables: Option<Vec<String>>,
}

impl DefinitionsRequest {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            tables: None,
        }
    }

    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = Some(tables.into_iter().map(Into::into).collect());
        self
    }
}

/// One delivery to the caller.
///
/// A request yields at most one `Early`, followed by exactly one final
/// update (`UpToDate`, `Fresh` or `Failed`).
#[derive(Debug)]
pub enum DefinitionsUpdate {
    /// Provisional data from the cache; a final update follows.
    Early(Arc<Dataset>),
    /// The early data is already current.
    UpToDate,
    /// Newly synced data.
    Fresh(Arc<Dataset>),
    Failed(DefsError),
}

impl DefinitionsUpdate {
    pub fn is_final(&self) -> bool {
        !matches!(self, DefinitionsUpdate::Early(_))
    }

    pub fn dataset(&self) -> Option<&Arc<Dataset>> {
        match self {
            DefinitionsUpdate::Early(data) | DefinitionsUpdate::Fresh(data) => Some(data),
            _ => None,
        }
    }
}

/// Orders cache writes against background cleanup.
///
/// A sync that may write claims a new generation before its first write. A
/// cleanup runs only while its generation is still the newest, and holds the
/// lock for the whole pass, so it never deletes what a later sync stored.
#[derive(Debug, Default)]
struct WriteGenerations {
    newest: tokio::sync::Mutex<u64>,
}

impl WriteGenerations {
    /// Claim the next generation, waiting out any cleanup in progress.
    async fn begin(&self) -> u64 {
        let mut newest = self.newest.lock().await;
        *newest += 1;
        *newest
    }
}

/// Composes resolution, caching, extraction and merging into one request.
#[derive(Clone)]
pub struct SyncOrchestrator {
    remote: Arc<dyn RemoteContent>,
    resolver: VersionResolver,
    blobs: BlobCache,
    datasets: DatasetCache,
    component_cache: ComponentCache,
    components: RemoteComponentFetcher,
    engines: ExtractionEngines,
    lite_policy: LitePolicy,
    generations: Arc<WriteGenerations>,
    cleanups: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl SyncOrchestrator {
    pub fn new(
        config: &SyncConfig,
        remote: Arc<dyn RemoteContent>,
        store: DefinitionsStore,
        engines: ExtractionEngines,
    ) -> Self {
        let blobs = BlobCache::new(store.clone());
        let component_cache = ComponentCache::new(store.clone());

        Self {
            resolver: VersionResolver::new(Arc::clone(&remote), config.manifest_endpoint.clone()),
            datasets: DatasetCache::new(store, blobs.clone()),
            components: RemoteComponentFetcher::new(Arc::clone(&remote), component_cache.clone()),
            blobs,
            component_cache,
            engines,
            lite_policy: LitePolicy::new(config.lite_excluded.iter().cloned()),
            generations: Arc::new(WriteGenerations::default()),
            cleanups: Arc::new(Mutex::new(Vec::new())),
            remote,
        }
    }

    /// Run one request, delivering every update through `on_data`.
    pub async fn run<F>(
        &self,
        request: &DefinitionsRequest,
        progress: &dyn ProgressReporter,
        mut on_data: F,
    ) where
        F: FnMut(DefinitionsUpdate) + Send,
    {
        if let Err(e) = self.sync(request, progress, &mut on_data).await {
            error!("Error loading definitions for {}: {}", request.language, e);
            progress.stage(SyncStage::Error);
            on_data(DefinitionsUpdate::Failed(e));
        }
    }

    async fn sync<F>(
        &self,
        request: &DefinitionsRequest,
        progress: &dyn ProgressReporter,
        on_data: &mut F,
    ) -> Result<()>
    where
        F: FnMut(DefinitionsUpdate) + Send,
    {
        let requested = request.tables.as_deref();

        let early_lookup = async {
            let cached = match self.datasets.find_cached_by_version_prefix(SCHEMA_VERSION).await {
                Ok(cached) => cached,
                Err(e) => {
                    warn!("Cached definitions unavailable: {}", e);
                    None
                }
            };
            let delivered = match &cached {
                Some(entry) if DatasetCache::has_all_tables(entry, requested) => {
                    info!("Returning cached definitions {} early", entry.key);
                    on_data(DefinitionsUpdate::Early(Arc::clone(&entry.data)));
                    true
                }
                Some(entry) => {
                    debug!("Cached definitions {} lack requested tables", entry.key);
                    false
                }
                None => false,
            };
            (cached, delivered)
        };
        let ((cached, early_delivered), manifest) = tokio::join!(
            early_lookup,
            self.resolver.resolve_manifest(&request.language)
        );
        let manifest = manifest?;

        // Only an entry built from the resolved archive can be reused.
        let cached = cached.filter(|entry| entry.key.references(&manifest.manifest_path));
        if early_delivered && cached.is_some() {
            info!("The cached definitions are the latest");
            on_data(DefinitionsUpdate::UpToDate);
            return Ok(());
        }

        let generation = self.generations.begin().await;
        let dataset = self.build_dataset(request, &manifest, cached, progress).await?;

        let key = CacheKey::current(&manifest.manifest_path);
        let entry = DatasetCacheEntry {
            key: key.clone(),
            data: Arc::new(dataset),
        };
        self.datasets.put(&entry).await?;
        info!("Stored definitions {} ({} tables)", key, entry.data.len());

        self.spawn_cleanup(
            generation,
            key,
            manifest.json_component_paths.values().cloned().collect(),
        );

        progress.stage(SyncStage::Done);
        on_data(DefinitionsUpdate::Fresh(entry.data));
        Ok(())
    }

    /// Download, unzip, extract and merge the dataset for `manifest`.
    async fn build_dataset(
        &self,
        request: &DefinitionsRequest,
        manifest: &ResolvedManifest,
        same_version: Option<DatasetCacheEntry>,
        progress: &dyn ProgressReporter,
    ) -> Result<Dataset> {
        progress.stage(SyncStage::Downloading);

        let on_download = |p: DownloadProgress| {
            if let Some(percent) = p.percent {
                progress.report(ProgressEvent::Download { percent });
            }
        };
        let archive = self.engines.archive();
        let tables = self.engines.tables();

        let payload = async {
            let (_, bytes) = tokio::try_join!(
                archive.decoder(),
                self.blobs.fetch_or_download(
                    &manifest.manifest_path,
                    self.remote.as_ref(),
                    &on_download
                )
            )?;
            progress.stage(SyncStage::Unzipping);
            archive.extract_first_entry(bytes).await
        };
        let (_, payload) = tokio::try_join!(tables.engine(), payload)?;

        progress.stage(SyncStage::ExtractingTables);
        let extracted = tables.read_tables(payload, request.tables.clone()).await?;

        let mut dataset = same_version
            .map(|entry| Arc::unwrap_or_clone(entry.data))
            .unwrap_or_default();
        dataset.extend(extracted);

        // Every advertised component is merged, requested or not
        let have: BTreeSet<String> = dataset.table_names().map(str::to_string).collect();
        let fetched = self
            .components
            .fetch_missing(&manifest.json_component_paths, &have, &self.lite_policy)
            .await?;
        dataset.extend(fetched);

        if let Some(requested) = &request.tables {
            if let Some(missing) = requested.iter().find(|t| !dataset.contains_table(t)) {
                return Err(DefsError::TableNotFound {
                    table: missing.clone(),
                });
            }
        }

        info!("Successfully got requested definitions");
        Ok(dataset)
    }

    /// Delete stale entries without holding up the caller. Failures are
    /// logged and dropped. Skipped entirely once a newer sync has begun.
    fn spawn_cleanup(
        &self,
        generation: u64,
        keep: CacheKey,
        current_components: BTreeSet<String>,
    ) {
        let datasets = self.datasets.clone();
        let component_cache = self.component_cache.clone();
        let generations = Arc::clone(&self.generations);

        let handle = tokio::spawn(async move {
            let newest = generations.newest.lock().await;
            if *newest != generation {
                debug!(
                    "Skipping cleanup for {}: generation {} superseded by {}",
                    keep, generation, *newest
                );
                return;
            }

            match datasets.cleanup_stale(&keep).await {
                Ok(report) if !report.is_empty() => debug!("Cleanup removed {:?}", report),
                Ok(_) => {}
                Err(e) => warn!("Failed to delete stale definitions: {}", e),
            }
            match component_cache.retain_paths(current_components).await {
                Ok(removed) if !removed.is_empty() => {
                    debug!("Deleted stale JSON components {:?}", removed)
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to delete stale JSON components: {}", e),
            }
            drop(newest);
        });

        match self.cleanups.lock() {
            Ok(mut pending) => {
                pending.retain(|task| !task.is_finished());
                pending.push(handle);
            }
            Err(_) => warn!("Cleanup tracker poisoned; not tracking cleanup task"),
        }
    }

    /// Wait for every background cleanup started so far.
    pub async fn wait_for_cleanup(&self) {
        let pending = {
            let Ok(mut pending) = self.cleanups.lock() else {
                return;
            };
            std::mem::take(&mut *pending)
        };
        for task in pending {
            if let Err(e) = task.await {
                warn!("Cleanup task failed: {}", e);
            }
        }
    }

    pub fn engines(&self) -> &ExtractionEngines {
        &self.engines
    }
}

/// Application context: owns the store, the decoding engines and the
/// orchestrator that uses them.
#[derive(Clone)]
pub struct Definitions {
    orchestrator: SyncOrchestrator,
    store: DefinitionsStore,
}

impl Definitions {
    /// Open the store at `config.cache_path` and talk to the configured host.
    pub fn open(config: &SyncConfig) -> Result<Self> {
        config.validate()?;
        let remote = Arc::new(HttpRemoteContent::new(config)?);
        let store = DefinitionsStore::open(&config.cache_path)?;
        info!("Opened definitions store at {}", config.cache_path.display());
        Ok(Self::with_parts(config, remote, store, ExtractionEngines::new()))
    }

    pub fn with_parts(
        config: &SyncConfig,
        remote: Arc<dyn RemoteContent>,
        store: DefinitionsStore,
        engines: ExtractionEngines,
    ) -> Self {
        Self {
            orchestrator: SyncOrchestrator::new(config, remote, store.clone(), engines),
            store,
        }
    }

    /// Run one request to completion, delivering updates through `on_data`.
    pub async fn request_definitions<F>(
        &self,
        request: &DefinitionsRequest,
        progress: &dyn ProgressReporter,
        on_data: F,
    ) where
        F: FnMut(DefinitionsUpdate) + Send,
    {
        self.orchestrator.run(request, progress, on_data).await
    }

    /// Start a request in the background and stream its updates.
    ///
    /// The channel closes after the final update.
    pub fn subscribe(
        &self,
        request: DefinitionsRequest,
        progress: Arc<dyn ProgressReporter>,
    ) -> mpsc::Receiver<DefinitionsUpdate> {
        let (tx, rx) = mpsc::channel(4);
        let orchestrator = self.orchestrator.clone();

        tokio::spawn(async move {
            orchestrator
                .run(&request, progress.as_ref(), |update| {
                    if tx.try_send(update).is_err() {
                        debug!("Definitions subscriber went away");
                    }
                })
                .await;
        });

        rx
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.run_blocking(|store| store.stats()).await
    }

    /// Delete every cached archive, dataset and JSON component.
    pub async fn clear(&self) -> Result<()> {
        self.orchestrator.wait_for_cleanup().await;
        self.store.run_blocking(|store| store.clear_all()).await
    }

    pub async fn wait_for_cleanup(&self) {
        self.orchestrator.wait_for_cleanup().await
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }
}

//! Persistent caches for the definitions pipeline.
//!
//! Three logical tables share one SQLite database:
//! - archive blobs keyed by manifest path
//! - merged datasets keyed by `schema_version:manifest_path`
//! - raw JSON component bodies keyed by component path

mod blob;
mod component;
mod dataset;
mod store;

pub use blob::BlobCache;
pub use component::ComponentCache;
pub use dataset::{CleanupReport, DatasetCache, DatasetCacheEntry};
pub use store::{DefinitionsStore, StoreStats, StoreTable, TableStats};

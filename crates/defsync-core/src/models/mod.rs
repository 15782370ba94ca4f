//! Data models shared by the cache, extraction and sync layers.

mod cache_key;
mod dataset;
mod manifest;

pub use cache_key::CacheKey;
pub use dataset::{Dataset, TableRecords};
pub use manifest::ResolvedManifest;

//! Archive decoding and binary-database table extraction.
//!
//! Both stages depend on a capability that is expensive to set up. Each is
//! held in a [`LazyHandle`] owned by [`ExtractionEngines`], so the first
//! caller initializes it and every concurrent caller awaits that same
//! initialization.

mod archive;
mod engine;
mod tables;

pub use archive::{ArchiveDecoder, ArchiveExtractor};
pub use engine::LazyHandle;
pub use tables::{DatabaseHandle, TableEngine, TableLayout, TableStore};

/// Process-wide decoding capabilities, shared by every sync.
#[derive(Clone, Default)]
pub struct ExtractionEngines {
    archive: ArchiveExtractor,
    tables: TableStore,
}

impl ExtractionEngines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn archive(&self) -> &ArchiveExtractor {
        &self.archive
    }

    pub fn tables(&self) -> &TableStore {
        &self.tables
    }
}

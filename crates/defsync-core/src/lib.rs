//! Defsync Core - Headless download, extraction and caching engine for
//! versioned definitions datasets.
//!
//! A remote content service publishes each language's definitions as a
//! zipped SQLite database plus a handful of standalone JSON tables. This
//! crate resolves which version is current, downloads and unpacks it,
//! merges the JSON tables in and keeps the result in a local SQLite store,
//! serving cached data immediately while a newer version is fetched.
//!
//! # Example
//!
//! ```rust,ignore
//! use defsync_core::{Definitions, DefinitionsRequest, DefinitionsUpdate, NoProgress, SyncConfig};
//!
//! #[tokio::main]
//! async fn main() -> defsync_core::Result<()> {
//!     let config = SyncConfig::new().with_api_key(std::env::var("DEFSYNC_API_KEY").ok());
//!     let definitions = Definitions::open(&config)?;
//!
//!     let request = DefinitionsRequest::new("en").with_tables(["DestinyClassDefinition"]);
//!     definitions
//!         .request_definitions(&request, &NoProgress, |update| match update {
//!             DefinitionsUpdate::Early(data) => println!("cached: {} tables", data.len()),
//!             DefinitionsUpdate::Fresh(data) => println!("fresh: {} tables", data.len()),
//!             DefinitionsUpdate::UpToDate => println!("already current"),
//!             DefinitionsUpdate::Failed(e) => eprintln!("sync failed: {}", e),
//!         })
//!         .await;
//!
//!     definitions.wait_for_cleanup().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod components;
pub mod config;
pub mod error;
pub mod extract;
pub mod models;
pub mod network;
pub mod progress;
pub mod resolver;
pub mod sync;

// Re-export commonly used types
pub use cache::{CleanupReport, DefinitionsStore, StoreStats, StoreTable};
pub use components::{LitePolicy, RemoteComponentFetcher, DEFAULT_LITE_VARIANTS};
pub use config::{SyncConfig, SCHEMA_VERSION};
pub use error::{DefsError, Result};
pub use extract::ExtractionEngines;
pub use models::{CacheKey, Dataset, ResolvedManifest, TableRecords};
pub use network::{retry_async, DownloadProgress, RemoteContent, RetryConfig};
pub use progress::{NoProgress, ProgressEvent, ProgressReporter, SyncStage};
pub use resolver::VersionResolver;
pub use sync::{Definitions, DefinitionsRequest, DefinitionsUpdate, SyncOrchestrator};

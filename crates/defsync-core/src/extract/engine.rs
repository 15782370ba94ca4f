//! Memoized single-flight initialization.

use crate::Result;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// A value built at most once, on first use.
///
/// Concurrent first callers share one in-flight initialization instead of
/// racing duplicate constructions. A failed initialization is not memoized;
/// the next caller tries again.
pub struct LazyHandle<T> {
    name: &'static str,
    cell: OnceCell<Arc<T>>,
    attempts: AtomicUsize,
}

impl<T> LazyHandle<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            cell: OnceCell::new(),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Return the value, running `init` if nobody has completed it yet.
    pub async fn get_or_init<F, Fut>(&self, init: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.cell.get() {
            return Ok(Arc::clone(value));
        }

        let value = self
            .cell
            .get_or_try_init(|| async move {
                let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                debug!("Initializing {} (attempt {})", self.name, attempt);
                let value = init().await?;
                info!("Initialized {}", self.name);
                Ok::<_, crate::DefsError>(Arc::new(value))
            })
            .await?;

        Ok(Arc::clone(value))
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    /// How many times initialization has been started.
    pub fn init_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

//! JSON component bodies keyed by component path.

use super::store::{DefinitionsStore, StoreTable};
use crate::Result;
use std::collections::BTreeSet;

/// Raw JSON component bodies. Like archives, a component path is
/// content-immutable, so a stored body is served instead of refetching.
#[derive(Clone)]
pub struct ComponentCache {
    store: DefinitionsStore,
}

impl ComponentCache {
    pub fn new(store: DefinitionsStore) -> Self {
        Self { store }
    }

    pub async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let path = path.to_string();
        self.store
            .run_blocking(move |store| store.get(StoreTable::JsonComponents, &path))
            .await
    }

    pub async fn put(&self, path: &str, body: Vec<u8>) -> Result<()> {
        let path = path.to_string();
        self.store
            .run_blocking(move |store| store.put(StoreTable::JsonComponents, &path, &body))
            .await
    }

    /// Delete every stored component whose path is not in `current_paths`.
    pub async fn retain_paths(&self, current_paths: BTreeSet<String>) -> Result<Vec<String>> {
        self.store
            .run_blocking(move |store| {
                store.delete_where_not(StoreTable::JsonComponents, |key| {
                    current_paths.contains(key)
                })
            })
            .await
    }
}

//! SQLite-backed persistent store shared by the blob, dataset and component caches.

use crate::error::{DefsError, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Logical tables of the store. All share the layout
/// `(key TEXT PRIMARY KEY, data BLOB, size_bytes INTEGER, cached_at TEXT)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreTable {
    /// Downloaded archives keyed by manifest path.
    ArchiveBlobs,
    /// Merged datasets keyed by `schema_version:manifest_path`.
    Datasets,
    /// Raw JSON component bodies keyed by component path.
    JsonComponents,
}

impl StoreTable {
    pub const ALL: [StoreTable; 3] = [
        StoreTable::ArchiveBlobs,
        StoreTable::Datasets,
        StoreTable::JsonComponents,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StoreTable::ArchiveBlobs => "archive_blobs",
            StoreTable::Datasets => "datasets",
            StoreTable::JsonComponents => "json_components",
        }
    }
}

/// Entry count and size of one logical table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub table: StoreTable,
    pub entry_count: usize,
    pub total_size_bytes: u64,
}

/// Statistics across all logical tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub tables: Vec<TableStats>,
}

/// Persistent key to bytes store.
///
/// Thread-safe via an internal mutex on the connection. Every write is a
/// single statement or transaction, so readers never see a half-written entry,
/// and every read returns an owned copy that later deletes cannot affect.
#[derive(Clone)]
pub struct DefinitionsStore {
    conn: Arc<Mutex<Connection>>,
}

impl DefinitionsStore {
    /// Open (or create) the store at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DefsError::Io {
                message: format!("Failed to create cache directory: {}", e),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }

        let conn = Connection::open(db_path).map_err(|e| DefsError::Database {
            message: format!("Failed to open definitions store: {}", e),
            source: Some(e),
        })?;

        // WAL keeps readers off the writer's lock across processes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| DefsError::Database {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        Self::with_connection(conn)
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        for table in StoreTable::ALL {
            conn.execute_batch(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {name} (
                    key TEXT PRIMARY KEY NOT NULL,
                    data BLOB NOT NULL,
                    size_bytes INTEGER NOT NULL,
                    cached_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{name}_cached_at ON {name}(cached_at);
                "#,
                name = table.name()
            ))
            .map_err(|e| DefsError::Database {
                message: format!("Failed to initialize table {}: {}", table.name(), e),
                source: Some(e),
            })?;
        }

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DefsError::lock_poisoned("definitions store"))
    }

    /// Run a store operation on the blocking pool.
    pub(crate) async fn run_blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&DefinitionsStore) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store)).await?
    }

    pub fn get(&self, table: StoreTable, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.lock()?;
        let data = conn
            .query_row(
                &format!("SELECT data FROM {} WHERE key = ?1", table.name()),
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data)
    }

    pub fn contains(&self, table: StoreTable, key: &str) -> Result<bool> {
        let conn = self.lock()?;
        let exists = conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE key = ?1 LIMIT 1", table.name()),
                params![key],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        Ok(exists)
    }

    pub fn put(&self, table: StoreTable, key: &str, data: &[u8]) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (key, data, size_bytes, cached_at) VALUES (?1, ?2, ?3, ?4)",
                table.name()
            ),
            params![
                key,
                data,
                data.len() as i64,
                Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
            ],
        )
        .map_err(|e| DefsError::Database {
            message: format!("Failed to store {} entry {}: {}", table.name(), key, e),
            source: Some(e),
        })?;
        Ok(())
    }

    /// All keys of a table, oldest first.
    pub fn keys(&self, table: StoreTable) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT key FROM {} ORDER BY cached_at ASC, rowid ASC",
            table.name()
        ))?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    /// Most recently stored entry whose key starts with `prefix`.
    pub fn latest_with_prefix(
        &self,
        table: StoreTable,
        prefix: &str,
    ) -> Result<Option<(String, Vec<u8>)>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    r#"
                    SELECT key, data FROM {}
                    WHERE substr(key, 1, length(?1)) = ?1
                    ORDER BY cached_at DESC, rowid DESC
                    LIMIT 1
                    "#,
                    table.name()
                ),
                params![prefix],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }

    /// Delete every entry for which `keep` returns false. Returns the deleted keys.
    pub fn delete_where_not(
        &self,
        table: StoreTable,
        keep: impl Fn(&str) -> bool,
    ) -> Result<Vec<String>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let doomed: Vec<String> = {
            let mut stmt = tx.prepare(&format!("SELECT key FROM {}", table.name()))?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            keys.into_iter().filter(|key| !keep(key)).collect()
        };

        {
            let mut delete = tx.prepare(&format!("DELETE FROM {} WHERE key = ?1", table.name()))?;
            for key in &doomed {
                delete.execute(params![key])?;
            }
        }
        tx.commit()?;

        if !doomed.is_empty() {
            debug!("Deleted {} entries from {}", doomed.len(), table.name());
        }
        Ok(doomed)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        let mut tables = Vec::with_capacity(StoreTable::ALL.len());
        for table in StoreTable::ALL {
            let (count, size): (i64, i64) = conn.query_row(
                &format!(
                    "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM {}",
                    table.name()
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            tables.push(TableStats {
                table,
                entry_count: count as usize,
                total_size_bytes: size as u64,
            });
        }

        Ok(StoreStats {
            total_entries: tables.iter().map(|t| t.entry_count).sum(),
            total_size_bytes: tables.iter().map(|t| t.total_size_bytes).sum(),
            tables,
        })
    }

    /// Remove everything from every table.
    pub fn clear_all(&self) -> Result<()> {
        let conn = self.lock()?;
        for table in StoreTable::ALL {
            conn.execute(&format!("DELETE FROM {}", table.name()), [])
                .map_err(|e| DefsError::Database {
                    message: format!("Failed to clear {}: {}", table.name(), e),
                    source: Some(e),
                })?;
        }
        debug!("Cleared all cached definitions data");
        Ok(())
    }
}

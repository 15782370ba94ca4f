//! Whole-table extraction from the binary definitions database.
//!
//! # Payload format
//!
//! The payload is a SQLite 3 database file (it starts with the 16-byte
//! header `SQLite format 3\0`). Every user table is one definitions table.
//!
//! A table uses the keyed layout when it has exactly two columns and one of
//! them is named `json`. The other column is the record key (`id` or `key`
//! in practice, INTEGER or TEXT). The `json` column holds one UTF-8 encoded
//! JSON document per row, stored as TEXT or BLOB. Such a table extracts to
//! [`TableRecords::Keyed`], key text to decoded document.
//!
//! Any other table extracts to [`TableRecords::Rows`]: one JSON object per
//! row, column name to value, in rowid order. BLOB cells become arrays of
//! byte values.

use super::engine::LazyHandle;
use crate::models::TableRecords;
use crate::{DefsError, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

const SQLITE_HEADER: &[u8] = b"SQLite format 3\0";
const JSON_COLUMN: &str = "json";

/// How a table's rows map onto records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableLayout {
    KeyedJson { key_column: String, json_column: String },
    Rows { columns: Vec<String> },
}

/// The SQLite engine, checked once before first use.
#[derive(Debug)]
pub struct TableEngine {
    sqlite_version: String,
}

impl TableEngine {
    /// Confirm the linked SQLite can open databases and evaluate JSON.
    pub fn initialize() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let (sqlite_version, json_ok): (String, i64) = conn.query_row(
            "SELECT sqlite_version(), json_valid('{\"ok\": 1}')",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if json_ok != 1 {
            return Err(DefsError::Other(
                "Linked SQLite lacks JSON support".to_string(),
            ));
        }
        Ok(Self { sqlite_version })
    }

    /// Load `payload` into a read-only queryable database.
    pub fn open_payload(&self, payload: &[u8]) -> Result<DatabaseHandle> {
        let corrupt = |message: String| DefsError::CorruptDatabase { message };

        if payload.len() < SQLITE_HEADER.len() || &payload[..SQLITE_HEADER.len()] != SQLITE_HEADER {
            return Err(corrupt("Payload is not a SQLite database".to_string()));
        }

        let mut file = tempfile::Builder::new()
            .prefix("defsync-payload-")
            .suffix(".sqlite")
            .tempfile()?;
        let path = file.path().to_path_buf();
        file.write_all(payload)
            .and_then(|_| file.flush())
            .map_err(|e| DefsError::io_with_path(e, path))?;

        let conn = Connection::open_with_flags(
            file.path(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| corrupt(format!("Failed to open payload: {}", e)))?;

        let table_count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .map_err(|e| corrupt(format!("Failed to read schema: {}", e)))?;

        debug!(
            "Opened {}-byte payload with {} tables (SQLite {})",
            payload.len(),
            table_count,
            self.sqlite_version
        );

        Ok(DatabaseHandle { conn, _file: file })
    }
}

/// An opened payload database.
///
/// The backing temp file is removed when the handle drops.
pub struct DatabaseHandle {
    // Declared before `_file` so the connection closes first.
    conn: Connection,
    _file: NamedTempFile,
}

impl DatabaseHandle {
    /// User table names, sorted.
    pub fn list_table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// The subset of `requested` that exists, in request order.
    ///
    /// Looks each name up individually rather than listing the schema.
    pub fn present_tables(&self, requested: &[String]) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
        let mut present = Vec::new();
        for name in requested {
            if stmt.exists([name])? && !present.contains(name) {
                present.push(name.clone());
            }
        }
        Ok(present)
    }

    pub fn layout(&self, table: &str) -> Result<TableLayout> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if columns.is_empty() {
            return Err(DefsError::TableNotFound {
                table: table.to_string(),
            });
        }

        if columns.len() == 2 {
            if let Some(json_idx) = columns
                .iter()
                .position(|c| c.eq_ignore_ascii_case(JSON_COLUMN))
            {
                return Ok(TableLayout::KeyedJson {
                    key_column: columns[1 - json_idx].clone(),
                    json_column: columns[json_idx].clone(),
                });
            }
        }

        Ok(TableLayout::Rows { columns })
    }

    /// Read every row of `table`.
    pub fn extract_table(&self, table: &str) -> Result<TableRecords> {
        let corrupt = |e: rusqlite::Error| DefsError::CorruptDatabase {
            message: format!("Failed to read table {}: {}", table, e),
        };

        match self.layout(table)? {
            TableLayout::KeyedJson {
                key_column,
                json_column,
            } => {
                let sql = format!(
                    "SELECT {}, {} FROM {}",
                    quote_ident(&key_column),
                    quote_ident(&json_column),
                    quote_ident(table)
                );
                let mut stmt = self.conn.prepare(&sql).map_err(corrupt)?;
                let mut rows = stmt.query([]).map_err(corrupt)?;

                let mut records = BTreeMap::new();
                while let Some(row) = rows.next().map_err(corrupt)? {
                    let key = key_text(row.get_ref(0).map_err(corrupt)?);
                    let Some(key) = key else { continue };
                    let body = match row.get_ref(1).map_err(corrupt)? {
                        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => bytes,
                        ValueRef::Null => continue,
                        other => {
                            return Err(DefsError::CorruptDatabase {
                                message: format!(
                                    "Table {} row {} has non-text {:?} JSON",
                                    table,
                                    key,
                                    other.data_type()
                                ),
                            })
                        }
                    };
                    let value: Value = serde_json::from_slice(body).map_err(|e| {
                        DefsError::CorruptDatabase {
                            message: format!("Invalid JSON in table {} row {}: {}", table, key, e),
                        }
                    })?;
                    records.insert(key, value);
                }
                Ok(TableRecords::Keyed(records))
            }
            TableLayout::Rows { columns } => {
                let sql = format!("SELECT * FROM {}", quote_ident(table));
                let mut stmt = self.conn.prepare(&sql).map_err(corrupt)?;
                let mut rows = stmt.query([]).map_err(corrupt)?;

                let mut records = Vec::new();
                while let Some(row) = rows.next().map_err(corrupt)? {
                    let mut object = Map::with_capacity(columns.len());
                    for (idx, column) in columns.iter().enumerate() {
                        let cell = row.get_ref(idx).map_err(corrupt)?;
                        object.insert(column.clone(), cell_to_json(cell));
                    }
                    records.push(Value::Object(object));
                }
                Ok(TableRecords::Rows(records))
            }
        }
    }

    /// Extract `tables` into a map, in one pass.
    pub fn extract_tables(&self, tables: &[String]) -> Result<BTreeMap<String, TableRecords>> {
        let mut extracted = BTreeMap::new();
        for table in tables {
            let records = self.extract_table(table)?;
            debug!("Extracted table {} ({} records)", table, records.len());
            extracted.insert(table.clone(), records);
        }
        Ok(extracted)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn key_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
        ValueRef::Null => None,
    }
}

fn cell_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}

/// Opens payloads through a lazily initialized [`TableEngine`].
#[derive(Clone)]
pub struct TableStore {
    engine: Arc<LazyHandle<TableEngine>>,
}

impl Default for TableStore {
    fn default() -> Self {
        Self::with_handle(Arc::new(LazyHandle::new("table engine")))
    }
}

impl TableStore {
    pub fn with_handle(engine: Arc<LazyHandle<TableEngine>>) -> Self {
        Self { engine }
    }

    pub fn handle(&self) -> &Arc<LazyHandle<TableEngine>> {
        &self.engine
    }

    /// The engine, initializing it on first call.
    pub async fn engine(&self) -> Result<Arc<TableEngine>> {
        self.engine
            .get_or_init(|| async { tokio::task::spawn_blocking(TableEngine::initialize).await? })
            .await
    }

    pub async fn open(&self, payload: Vec<u8>) -> Result<DatabaseHandle> {
        let engine = self.engine().await?;
        tokio::task::spawn_blocking(move || engine.open_payload(&payload)).await?
    }

    /// Open `payload` and extract the requested tables, or every table when
    /// `requested` is `None`.
    ///
    /// Requested names missing from the payload are skipped; the caller
    /// decides whether another source provides them.
    pub async fn read_tables(
        &self,
        payload: Vec<u8>,
        requested: Option<Vec<String>>,
    ) -> Result<BTreeMap<String, TableRecords>> {
        let engine = self.engine().await?;
        tokio::task::spawn_blocking(move || {
            let handle = engine.open_payload(&payload)?;
            drop(payload);

            let tables = match requested {
                Some(requested) => handle.present_tables(&requested)?,
                None => handle.list_table_names()?,
            };
            let extracted = handle.extract_tables(&tables)?;
            info!("Extracted {} tables from definitions database", extracted.len());
            Ok(extracted)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn payload() -> Vec<u8> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("world.content");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE DestinyClassDefinition (id INTEGER PRIMARY KEY, json TEXT);
                 INSERT INTO DestinyClassDefinition VALUES (1, '{\"name\":\"Titan\"}');
                 INSERT INTO DestinyClassDefinition VALUES (-2, '{\"name\":\"Hunter\"}');
                 CREATE TABLE \"Odd\"\"Name\" (key TEXT, json BLOB);
                 INSERT INTO \"Odd\"\"Name\" VALUES ('k', '[1,2]');
                 CREATE TABLE Loose (a INTEGER, b TEXT, c REAL);
                 INSERT INTO Loose VALUES (1, 'x', 0.5);
                 INSERT INTO Loose VALUES (NULL, 'y', NULL);",
            )
            .unwrap();
        }
        std::fs::read(path).unwrap()
    }

    #[tokio::test]
    async fn test_list_and_extract_keyed() {
        let store = TableStore::default();
        let handle = store.open(payload()).await.unwrap();

        assert_eq!(
            handle.list_table_names().unwrap(),
            vec!["DestinyClassDefinition", "Loose", "Odd\"Name"]
        );

        let records = handle.extract_table("DestinyClassDefinition").unwrap();
        let TableRecords::Keyed(records) = records else {
            panic!("expected keyed layout");
        };
        assert_eq!(records["1"], json!({"name": "Titan"}));
        assert_eq!(records["-2"], json!({"name": "Hunter"}));

        let odd = handle.extract_table("Odd\"Name").unwrap();
        assert_eq!(odd, TableRecords::Keyed([("k".to_string(), json!([1, 2]))].into()));
    }

    #[tokio::test]
    async fn test_extract_raw_rows() {
        let store = TableStore::default();
        let handle = store.open(payload()).await.unwrap();

        assert_eq!(
            handle.layout("Loose").unwrap(),
            TableLayout::Rows {
                columns: vec!["a".into(), "b".into(), "c".into()]
            }
        );
        let rows = handle.extract_table("Loose").unwrap();
        assert_eq!(
            rows,
            TableRecords::Rows(vec![
                json!({"a": 1, "b": "x", "c": 0.5}),
                json!({"a": null, "b": "y", "c": null}),
            ])
        );
    }

    #[tokio::test]
    async fn test_missing_table() {
        let store = TableStore::default();
        let handle = store.open(payload()).await.unwrap();
        assert!(matches!(
            handle.extract_table("Nope"),
            Err(DefsError::TableNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_requested_subset() {
        let store = TableStore::default();
        let tables = store
            .read_tables(
                payload(),
                Some(vec!["Loose".into(), "Missing".into(), "Loose".into()]),
            )
            .await
            .unwrap();
        assert_eq!(tables.keys().collect::<Vec<_>>(), vec!["Loose"]);

        let all = store.read_tables(payload(), None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(store.handle().init_attempts(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_payload() {
        let store = TableStore::default();
        let err = store.open(b"not a database".to_vec()).await.err().unwrap();
        assert!(matches!(err, DefsError::CorruptDatabase { .. }));

        let mut garbled = SQLITE_HEADER.to_vec();
        garbled.extend(std::iter::repeat(0xAB).take(4080));
        let err = store.read_tables(garbled, None).await.unwrap_err();
        assert!(matches!(err, DefsError::CorruptDatabase { .. }));
    }

    #[tokio::test]
    async fn test_invalid_json_cell() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.content");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE Broken (id INTEGER, json TEXT);
                 INSERT INTO Broken VALUES (1, '{oops');",
            )
            .unwrap();
        }
        let store = TableStore::default();
        let err = store
            .read_tables(std::fs::read(path).unwrap(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DefsError::CorruptDatabase { .. }));
    }
}

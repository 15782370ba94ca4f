//! Merged per-table record collections.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Records of one table. Record payloads are opaque to the engine.
///
/// Keyed tables come from key/JSON-blob layouts and from JSON components;
/// row tables come from any other binary table layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableRecords {
    Keyed(BTreeMap<String, Value>),
    Rows(Vec<Value>),
}

impl TableRecords {
    pub fn len(&self) -> usize {
        match self {
            TableRecords::Keyed(map) => map.len(),
            TableRecords::Rows(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Interpret a parsed JSON component body.
    ///
    /// Objects become keyed tables, arrays become row tables; anything else
    /// is not a table.
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(TableRecords::Keyed(map.into_iter().collect())),
            Value::Array(rows) => Some(TableRecords::Rows(rows)),
            _ => None,
        }
    }
}

/// Table name to records. Immutable once associated with a cache key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    tables: BTreeMap<String, TableRecords>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: impl Into<String>, records: TableRecords) {
        self.tables.insert(table.into(), records);
    }

    pub fn get(&self, table: &str) -> Option<&TableRecords> {
        self.tables.get(table)
    }

    pub fn contains_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Table names in sorted order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// True iff `requested` is unset or every requested name is present.
    pub fn has_all_tables(&self, requested: Option<&[String]>) -> bool {
        match requested {
            None => true,
            Some(names) => names.iter().all(|name| self.contains_table(name)),
        }
    }

    /// Move every table of `other` into this dataset.
    pub fn extend(&mut self, other: BTreeMap<String, TableRecords>) {
        self.tables.extend(other);
    }

    /// Serialize for storage.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Deserialize a stored dataset.
    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

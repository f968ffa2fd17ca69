//! # Schemas, Catalog, and the Table Façade
//!
//! This layer persists table and index metadata inside a distinguished
//! B+Tree (the catalog) and exposes [`Table`], the façade that validates
//! rows and keeps secondary indexes synchronized with the main tree.
//!
//! ## Module Organization
//!
//! - `catalog`: the catalog tree, entry serialization, LRU schema caches
//! - `table`: row CRUD with index maintenance and compensating rollbacks
//! - `row`: row construction, validation, and key extraction
//! - `lru`: the bounded cache behind the catalog lookups

mod catalog;
mod lru;
mod row;
mod table;

pub use catalog::{Catalog, MAX_CACHED_INDEXES, MAX_CACHED_TABLES, SYSTEM_CATALOG};
pub use lru::LruCache;
pub use row::Row;
pub use table::Table;

use serde::{Deserialize, Serialize};

use crate::types::ColumnType;

/// A single column declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub not_null: bool,
    #[serde(default)]
    pub unique: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            primary_key: false,
            not_null: false,
            unique: false,
        }
    }

    /// Marks the column as the primary key. Implies NOT NULL.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.not_null = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Persisted description of a table: its columns and the root page of its
/// main B+Tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
    pub root_page: u32,
    pub version: u32,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn primary_key_column(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.primary_key)
    }
}

/// Persisted description of a secondary index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub name: String,
    pub table_name: String,
    pub column_name: String,
    pub unique: bool,
    pub root_page: u32,
}

/// A catalog leaf value: a tagged schema or index descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub(crate) enum CatalogEntry {
    Table(TableSchema),
    Index(IndexMetadata),
}

//! # Catalog
//!
//! The catalog persists every table schema and index descriptor inside a
//! distinguished B+Tree whose keys are entity names (Text keys) and whose
//! leaf values are tagged JSON entries. On a fresh database the catalog
//! tree is the first allocation and therefore roots at page 1; if a root
//! split ever relocates it, the new root is recorded in the database
//! header so a reopen finds the tree again.
//!
//! The catalog keeps two LRU caches (tables and indexes) in front of the
//! tree. The caches stay coherent because the catalog itself is the only
//! writer of catalog entries; readers that race a writer see either the
//! old or the new schema, which the single-writer model permits.
//!
//! ## Automatic Indexes
//!
//! `create_table` builds a unique index for every PRIMARY KEY or UNIQUE
//! column, named `pk_<table>_<column>` / `uq_<table>_<column>`. If any of
//! them fails, the already-written entries are removed best-effort and the
//! error is surfaced; the pages allocated for the half-created table leak,
//! because there is no freelist to return them to.

use hashbrown::HashSet;
use parking_lot::Mutex;
use tracing::warn;

use crate::btree::BTree;
use crate::error::{Error, Result};
use crate::schema::{CatalogEntry, Column, IndexMetadata, TableSchema};
use crate::storage::Pager;
use crate::types::{ColumnType, Key};

use super::lru::LruCache;
use super::table::Table;

/// Name under which the catalog describes itself.
pub const SYSTEM_CATALOG: &str = "anubis_catalog";

pub const MAX_CACHED_TABLES: usize = 100;
pub const MAX_CACHED_INDEXES: usize = 500;

#[derive(Debug)]
pub struct Catalog<'p> {
    pager: &'p Pager,
    root_page: Mutex<u32>,
    tables: Mutex<LruCache<TableSchema>>,
    indexes: Mutex<LruCache<IndexMetadata>>,
}

impl<'p> Catalog<'p> {
    /// Opens the catalog, initializing a fresh database if the file holds
    /// no pages yet.
    pub fn open(pager: &'p Pager) -> Result<Catalog<'p>> {
        let catalog = Catalog {
            pager,
            root_page: Mutex::new(pager.catalog_root()),
            tables: Mutex::new(LruCache::new(MAX_CACHED_TABLES)),
            indexes: Mutex::new(LruCache::new(MAX_CACHED_INDEXES)),
        };

        if pager.num_pages() == 0 {
            catalog.initialize()?;
            return Ok(catalog);
        }

        let tree = catalog.tree()?;
        if tree.count()? == 0 {
            return Err(Error::corrupted("catalog is empty"));
        }
        Ok(catalog)
    }

    fn initialize(&self) -> Result<()> {
        let tree = BTree::create(self.pager, false)?;
        *self.root_page.lock() = tree.root_page();
        if tree.root_page() != self.pager.catalog_root() {
            self.pager.set_catalog_root(tree.root_page())?;
        }

        // The catalog describes itself, so an empty-but-initialized
        // database is distinguishable from a damaged one.
        let schema = TableSchema {
            name: SYSTEM_CATALOG.to_owned(),
            columns: vec![
                Column::new("entry_type", ColumnType::Text).not_null(),
                Column::new("name", ColumnType::Text).primary_key(),
                Column::new("metadata", ColumnType::Text).not_null(),
            ],
            root_page: tree.root_page(),
            version: 1,
        };
        self.write_entry(SYSTEM_CATALOG, &CatalogEntry::Table(schema.clone()))?;
        self.tables.lock().put(SYSTEM_CATALOG, schema);
        Ok(())
    }

    fn tree(&self) -> Result<BTree<'p>> {
        BTree::load(self.pager, *self.root_page.lock(), false)
    }

    /// Persists a root move of the catalog's own tree into the database
    /// header.
    fn commit_root(&self, tree: &BTree) -> Result<()> {
        let mut root = self.root_page.lock();
        if tree.root_page() != *root {
            self.pager.set_catalog_root(tree.root_page())?;
            *root = tree.root_page();
        }
        Ok(())
    }

    fn write_entry(&self, name: &str, entry: &CatalogEntry) -> Result<()> {
        let mut tree = self.tree()?;
        tree.insert(&Key::Text(name.to_owned()), &serde_json::to_vec(entry)?)?;
        self.commit_root(&tree)
    }

    fn rewrite_entry(&self, name: &str, entry: &CatalogEntry) -> Result<()> {
        let mut tree = self.tree()?;
        tree.update(&Key::Text(name.to_owned()), &serde_json::to_vec(entry)?)?;
        self.commit_root(&tree)
    }

    fn remove_entry(&self, name: &str) -> Result<()> {
        let mut tree = self.tree()?;
        tree.delete(&Key::Text(name.to_owned()))
    }

    fn read_entry(&self, name: &str) -> Result<CatalogEntry> {
        let tree = self.tree()?;
        let bytes = tree.search(&Key::Text(name.to_owned()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn entry_exists(&self, name: &str) -> bool {
        self.tables.lock().get(name).is_some()
            || self.indexes.lock().get(name).is_some()
            || self.read_entry(name).is_ok()
    }

    fn validate_columns(columns: &[Column]) -> Result<()> {
        if columns.is_empty() {
            return Err(Error::invalid("table must have at least one column"));
        }

        let mut names = HashSet::new();
        let mut primary_keys = 0usize;
        for column in columns {
            if column.name.is_empty() {
                return Err(Error::invalid("column name cannot be empty"));
            }
            if !names.insert(column.name.as_str()) {
                return Err(Error::invalid(format!(
                    "duplicate column name '{}'",
                    column.name
                )));
            }
            if column.primary_key {
                primary_keys += 1;
            }
        }

        if primary_keys > 1 {
            return Err(Error::invalid("table can have at most one primary key"));
        }
        Ok(())
    }

    /// Creates a table: allocates its B+Tree, persists the schema, and
    /// builds the automatic unique indexes for PRIMARY KEY and UNIQUE
    /// columns.
    pub fn create_table(&self, name: &str, columns: Vec<Column>) -> Result<TableSchema> {
        if name.is_empty() {
            return Err(Error::invalid("table name cannot be empty"));
        }
        Self::validate_columns(&columns)?;
        if self.entry_exists(name) {
            return Err(Error::AlreadyExists(format!("table '{name}'")));
        }

        let tree = BTree::create(self.pager, false)?;
        let schema = TableSchema {
            name: name.to_owned(),
            columns,
            root_page: tree.root_page(),
            version: 1,
        };

        self.write_entry(name, &CatalogEntry::Table(schema.clone()))?;
        self.tables.lock().put(name, schema.clone());

        if let Err(err) = self.create_auto_indexes(&schema) {
            self.undo_create_table(name);
            return Err(err);
        }

        Ok(schema)
    }

    fn create_auto_indexes(&self, schema: &TableSchema) -> Result<()> {
        for column in &schema.columns {
            let index_name = if column.primary_key {
                format!("pk_{}_{}", schema.name, column.name)
            } else if column.unique {
                format!("uq_{}_{}", schema.name, column.name)
            } else {
                continue;
            };
            self.create_index(&index_name, &schema.name, &column.name, true)?;
        }
        Ok(())
    }

    /// Best-effort removal of a table entry and whatever auto-indexes made
    /// it to disk. Orphaned pages are leaked, not reclaimed.
    fn undo_create_table(&self, name: &str) {
        match self.table_indexes(name) {
            Ok(indexes) => {
                for meta in indexes {
                    if let Err(err) = self.remove_entry(&meta.name) {
                        warn!(index = %meta.name, %err, "rollback: failed to remove index entry");
                    }
                    self.indexes.lock().remove(&meta.name);
                }
            }
            Err(err) => warn!(table = name, %err, "rollback: failed to list indexes"),
        }

        if let Err(err) = self.remove_entry(name) {
            warn!(table = name, %err, "rollback: failed to remove table entry");
        }
        self.tables.lock().remove(name);
    }

    /// Creates a secondary index and populates it from the table's current
    /// rows. `UniqueViolation` aborts population when `unique` is set and a
    /// column value repeats.
    pub fn create_index(
        &self,
        name: &str,
        table_name: &str,
        column_name: &str,
        unique: bool,
    ) -> Result<IndexMetadata> {
        if name.is_empty() {
            return Err(Error::invalid("index name cannot be empty"));
        }
        if self.entry_exists(name) {
            return Err(Error::AlreadyExists(format!("index '{name}'")));
        }

        let schema = self.table(table_name)?;
        if schema.column(column_name).is_none() {
            return Err(Error::not_found(format!(
                "column '{column_name}' in table '{table_name}'"
            )));
        }

        let mut index_tree = BTree::create(self.pager, true)?;
        self.populate_index(&schema, column_name, unique, name, &mut index_tree)?;

        let meta = IndexMetadata {
            name: name.to_owned(),
            table_name: table_name.to_owned(),
            column_name: column_name.to_owned(),
            unique,
            root_page: index_tree.root_page(),
        };
        self.write_entry(name, &CatalogEntry::Index(meta.clone()))?;
        self.indexes.lock().put(name, meta.clone());

        Ok(meta)
    }

    fn populate_index(
        &self,
        schema: &TableSchema,
        column_name: &str,
        unique: bool,
        index_name: &str,
        index_tree: &mut BTree,
    ) -> Result<()> {
        let data_tree = BTree::load(self.pager, schema.root_page, false)?;

        for entry in data_tree.scan()? {
            let row = super::Row::from_bytes(&entry.value)?;
            let index_key = row.key_for_column(schema, column_name)?;

            match index_tree.insert(&index_key, &entry.key.encode()) {
                Ok(()) => {}
                Err(Error::AlreadyExists(_)) if unique => {
                    return Err(Error::UniqueViolation(format!(
                        "duplicate value {index_key} for unique index '{index_name}'"
                    )));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Looks up a table schema, preferring the cache.
    pub fn table(&self, name: &str) -> Result<TableSchema> {
        if let Some(schema) = self.tables.lock().get(name) {
            return Ok(schema);
        }

        let schema = match self.read_entry(name) {
            Ok(CatalogEntry::Table(schema)) => schema,
            Ok(CatalogEntry::Index(_)) => {
                return Err(Error::not_found(format!("'{name}' is an index, not a table")))
            }
            Err(Error::NotFound(_)) => {
                return Err(Error::not_found(format!("table '{name}'")))
            }
            Err(err) => return Err(err),
        };

        if schema.root_page == 0 || schema.root_page > self.pager.num_pages() {
            return Err(Error::corrupted(format!(
                "table '{name}' has root page {} out of range",
                schema.root_page
            )));
        }

        self.tables.lock().put(name, schema.clone());
        Ok(schema)
    }

    /// Looks up an index descriptor, preferring the cache.
    pub fn index(&self, name: &str) -> Result<IndexMetadata> {
        if let Some(meta) = self.indexes.lock().get(name) {
            return Ok(meta);
        }

        let meta = match self.read_entry(name) {
            Ok(CatalogEntry::Index(meta)) => meta,
            Ok(CatalogEntry::Table(_)) => {
                return Err(Error::not_found(format!("'{name}' is a table, not an index")))
            }
            Err(Error::NotFound(_)) => {
                return Err(Error::not_found(format!("index '{name}'")))
            }
            Err(err) => return Err(err),
        };

        if meta.root_page == 0 || meta.root_page > self.pager.num_pages() {
            return Err(Error::corrupted(format!(
                "index '{name}' has root page {} out of range",
                meta.root_page
            )));
        }

        self.indexes.lock().put(name, meta.clone());
        Ok(meta)
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.table(name).is_ok()
    }

    pub fn index_exists(&self, name: &str) -> bool {
        self.index(name).is_ok()
    }

    /// Returns a table façade: the schema plus its loaded B+Tree.
    pub fn load_table(&self, name: &str) -> Result<Table<'_, 'p>> {
        let schema = self.table(name)?;
        let tree = BTree::load(self.pager, schema.root_page, false)?;
        Ok(Table::new(self, schema, tree))
    }

    /// Opens the B+Tree behind an index descriptor.
    pub(crate) fn index_tree(&self, meta: &IndexMetadata) -> Result<BTree<'p>> {
        BTree::load(self.pager, meta.root_page, true)
    }

    /// User tables, in name order. The catalog's self-entry is omitted.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let mut tables = Vec::new();
        for entry in self.tree()?.scan()? {
            if let CatalogEntry::Table(schema) = serde_json::from_slice(&entry.value)? {
                if schema.name != SYSTEM_CATALOG {
                    tables.push(schema.name);
                }
            }
        }
        Ok(tables)
    }

    /// All indexes, in name order.
    pub fn list_indexes(&self) -> Result<Vec<String>> {
        let mut indexes = Vec::new();
        for entry in self.tree()?.scan()? {
            if let CatalogEntry::Index(meta) = serde_json::from_slice(&entry.value)? {
                indexes.push(meta.name);
            }
        }
        Ok(indexes)
    }

    /// Descriptors of every index on `table_name`.
    pub fn table_indexes(&self, table_name: &str) -> Result<Vec<IndexMetadata>> {
        let mut result = Vec::new();
        for entry in self.tree()?.scan()? {
            if let CatalogEntry::Index(meta) = serde_json::from_slice(&entry.value)? {
                if meta.table_name == table_name {
                    result.push(meta);
                }
            }
        }
        Ok(result)
    }

    /// Removes a table and its indexes from the catalog. Their pages are
    /// not reclaimed.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        if name == SYSTEM_CATALOG {
            return Err(Error::invalid("cannot drop the system catalog"));
        }
        self.table(name)?;

        for meta in self.table_indexes(name)? {
            self.remove_entry(&meta.name)?;
            self.indexes.lock().remove(&meta.name);
        }

        self.remove_entry(name)?;
        self.tables.lock().remove(name);
        Ok(())
    }

    /// Removes an index from the catalog. Its pages are not reclaimed.
    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.index(name)?;
        self.remove_entry(name)?;
        self.indexes.lock().remove(name);
        Ok(())
    }

    /// Rewrites a table entry after a root split moved its tree.
    pub(crate) fn update_table_root(&self, name: &str, root_page: u32) -> Result<()> {
        let mut schema = self.table(name)?;
        schema.root_page = root_page;
        self.rewrite_entry(name, &CatalogEntry::Table(schema.clone()))?;
        self.tables.lock().put(name, schema);
        Ok(())
    }

    /// Rewrites an index entry after a root split moved its tree.
    pub(crate) fn update_index_root(&self, name: &str, root_page: u32) -> Result<()> {
        let mut meta = self.index(name)?;
        meta.root_page = root_page;
        self.rewrite_entry(name, &CatalogEntry::Index(meta.clone()))?;
        self.indexes.lock().put(name, meta);
        Ok(())
    }
}

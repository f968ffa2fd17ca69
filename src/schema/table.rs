//! # Table Façade
//!
//! [`Table`] composes the storage primitives into relational row
//! operations: it validates rows against the schema, keys the main B+Tree
//! by the primary key, and keeps every secondary index synchronized on
//! insert, update, and delete.
//!
//! ## Rollback Discipline
//!
//! There is no write-ahead log, so composite operations cannot be atomic.
//! Each one instead applies compensating actions when a later step fails:
//! an insert that trips over a unique index deletes the row and the index
//! entries it already wrote; an update that fails restores the old index
//! keys; a delete whose main-tree removal fails re-inserts the index
//! entries it removed. Compensation is best-effort — every failure inside
//! a rollback is logged with `tracing::warn!` and swallowed, and a crash
//! in the middle can still leave an index stale. Readers of stale entries
//! skip them with a warning rather than failing the query.
//!
//! ## Root Upkeep
//!
//! Any insert or update can split a tree's root, which moves the root page
//! number. After each mutating step the façade compares the handle's root
//! with the persisted one and rewrites the owning catalog entry when they
//! differ, so a reopen always finds the trees.

use tracing::warn;

use crate::btree::BTree;
use crate::error::{Error, Result};
use crate::types::{value_to_key, Key, Value};

use super::catalog::Catalog;
use super::row::Row;
use super::{IndexMetadata, TableSchema};

pub struct Table<'c, 'p> {
    catalog: &'c Catalog<'p>,
    schema: TableSchema,
    tree: BTree<'p>,
}

/// Index change applied during an update, kept for rollback.
struct AppliedIndexChange<'a> {
    meta: &'a IndexMetadata,
    old_key: Key,
    new_key: Key,
}

impl<'c, 'p> Table<'c, 'p> {
    pub(super) fn new(catalog: &'c Catalog<'p>, schema: TableSchema, tree: BTree<'p>) -> Self {
        Self {
            catalog,
            schema,
            tree,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Persists a root move of the main tree into the table's catalog
    /// entry.
    fn sync_root(&mut self) -> Result<()> {
        if self.tree.root_page() != self.schema.root_page {
            self.catalog
                .update_table_root(&self.schema.name, self.tree.root_page())?;
            self.schema.root_page = self.tree.root_page();
        }
        Ok(())
    }

    /// Inserts `(indexKey → encoded primary key)` into one index.
    fn index_put(&self, meta: &IndexMetadata, row: &Row, pk: &Key) -> Result<()> {
        let index_key = row.key_for_column(&self.schema, &meta.column_name)?;
        let mut tree = self.catalog.index_tree(meta)?;
        tree.insert(&index_key, &pk.encode())?;
        if tree.root_page() != meta.root_page {
            self.catalog.update_index_root(&meta.name, tree.root_page())?;
        }
        Ok(())
    }

    /// Removes a row's entry from one index.
    fn index_remove(&self, meta: &IndexMetadata, row: &Row) -> Result<()> {
        let index_key = row.key_for_column(&self.schema, &meta.column_name)?;
        let mut tree = self.catalog.index_tree(meta)?;
        tree.delete(&index_key)
    }

    fn classify_index_error(meta: &IndexMetadata, err: Error) -> Error {
        match err {
            Error::AlreadyExists(_) if meta.unique => Error::UniqueViolation(format!(
                "value already exists in unique index '{}'",
                meta.name
            )),
            other => other,
        }
    }

    /// Inserts a row: main tree first, then every secondary index. On an
    /// index failure the earlier index writes and the main-tree write are
    /// compensated.
    pub fn insert(&mut self, values: &[Value]) -> Result<()> {
        let row = Row::from_values(&self.schema, values)?;
        let pk = row.primary_key(&self.schema)?;
        let data = row.to_bytes()?;

        self.tree.insert(&pk, &data).map_err(|err| match err {
            Error::AlreadyExists(_) => Error::AlreadyExists(format!(
                "row with primary key {pk} in table '{}'",
                self.schema.name
            )),
            other => other,
        })?;
        self.sync_root()?;

        let indexes = self.catalog.table_indexes(&self.schema.name)?;
        let mut written: Vec<&IndexMetadata> = Vec::new();

        for meta in &indexes {
            match self.index_put(meta, &row, &pk) {
                Ok(()) => written.push(meta),
                Err(err) => {
                    self.undo_insert(&row, &pk, &written);
                    return Err(Self::classify_index_error(meta, err));
                }
            }
        }

        Ok(())
    }

    fn undo_insert(&mut self, row: &Row, pk: &Key, written: &[&IndexMetadata]) {
        for meta in written {
            if let Err(err) = self.index_remove(meta, row) {
                warn!(index = %meta.name, %err, "rollback: failed to remove index entry");
            }
        }
        if let Err(err) = self.tree.delete(pk) {
            warn!(table = %self.schema.name, %err, "rollback: failed to remove row");
        }
    }

    /// Fetches a row by primary key.
    pub fn get(&self, pk: &Key) -> Result<Row> {
        let data = self.tree.search(pk).map_err(|err| match err {
            Error::NotFound(_) => Error::not_found(format!(
                "row with primary key {pk} in table '{}'",
                self.schema.name
            )),
            other => other,
        })?;
        Row::from_bytes(&data)
    }

    /// Whether a row with this primary key exists.
    pub fn exists(&self, pk: &Key) -> Result<bool> {
        match self.tree.search(pk) {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// All rows in primary-key order. Rows that fail to deserialize are
    /// skipped with a warning rather than failing the whole scan.
    pub fn scan(&self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        for entry in self.tree.scan()? {
            match Row::from_bytes(&entry.value) {
                Ok(row) => rows.push(row),
                Err(err) => {
                    warn!(table = %self.schema.name, key = %entry.key, %err,
                          "skipping undecodable row");
                }
            }
        }
        Ok(rows)
    }

    /// A window of the full scan: skips `offset` rows, returns at most
    /// `limit`.
    pub fn scan_limit(&self, offset: usize, limit: usize) -> Result<Vec<Row>> {
        let rows = self.scan()?;
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    /// Number of rows in the table.
    pub fn count(&self) -> Result<usize> {
        self.tree.count()
    }

    fn table_index(&self, index_name: &str) -> Result<IndexMetadata> {
        self.catalog
            .table_indexes(&self.schema.name)?
            .into_iter()
            .find(|meta| meta.name == index_name)
            .ok_or_else(|| {
                Error::not_found(format!(
                    "index '{index_name}' on table '{}'",
                    self.schema.name
                ))
            })
    }

    /// Point lookup through a secondary index: the index maps the value to
    /// an encoded primary key, which is then dereferenced in the main tree.
    pub fn get_by_index(&self, index_name: &str, value: &Value) -> Result<Row> {
        let meta = self.table_index(index_name)?;
        let column = self.schema.column(&meta.column_name).ok_or_else(|| {
            Error::corrupted(format!(
                "index '{}' references missing column '{}'",
                meta.name, meta.column_name
            ))
        })?;

        let index_key = value_to_key(value, column.column_type)?;
        let tree = self.catalog.index_tree(&meta)?;
        let pk_bytes = tree.search(&index_key)?;
        let pk = Key::decode(&pk_bytes)?;
        self.get(&pk)
    }

    /// Range lookup through a secondary index, bounds inclusive. Stale
    /// index entries whose primary key no longer dereferences are skipped
    /// with a warning.
    pub fn range_by_index(&self, index_name: &str, lo: &Value, hi: &Value) -> Result<Vec<Row>> {
        let meta = self.table_index(index_name)?;
        let column = self.schema.column(&meta.column_name).ok_or_else(|| {
            Error::corrupted(format!(
                "index '{}' references missing column '{}'",
                meta.name, meta.column_name
            ))
        })?;

        let lo_key = value_to_key(lo, column.column_type)?;
        let hi_key = value_to_key(hi, column.column_type)?;

        let tree = self.catalog.index_tree(&meta)?;
        let mut rows = Vec::new();
        for entry in tree.range_search(&lo_key, &hi_key)? {
            let pk = match Key::decode(&entry.value) {
                Ok(pk) => pk,
                Err(err) => {
                    warn!(index = %meta.name, %err, "skipping undecodable index entry");
                    continue;
                }
            };
            match self.get(&pk) {
                Ok(row) => rows.push(row),
                Err(err) => {
                    warn!(index = %meta.name, key = %pk, %err, "skipping stale index entry");
                }
            }
        }
        Ok(rows)
    }

    /// Replaces a row. The primary key is immutable; indexes whose column
    /// value is unchanged are left untouched.
    pub fn update(&mut self, pk: &Key, new_values: &[Value]) -> Result<()> {
        let old_row = self.get(pk)?;
        let new_row = Row::from_values(&self.schema, new_values)?;

        let new_pk = new_row.primary_key(&self.schema)?;
        if new_pk != *pk {
            return Err(Error::SchemaViolation(format!(
                "primary key is immutable (attempted {pk} → {new_pk}); delete and re-insert instead"
            )));
        }

        let indexes = self.catalog.table_indexes(&self.schema.name)?;
        let mut applied: Vec<AppliedIndexChange<'_>> = Vec::new();

        for meta in &indexes {
            if old_row.get(&meta.column_name) == new_row.get(&meta.column_name) {
                continue;
            }

            let result = self.apply_index_change(meta, &old_row, &new_row, pk);
            match result {
                Ok(change) => applied.push(change),
                Err(err) => {
                    self.undo_update(&applied, pk);
                    return Err(Self::classify_index_error(meta, err));
                }
            }
        }

        let data = new_row.to_bytes()?;
        if let Err(err) = self.tree.update(pk, &data) {
            self.undo_update(&applied, pk);
            return Err(err);
        }
        self.sync_root()
    }

    /// Swaps one index entry from the old key to the new key.
    fn apply_index_change<'a>(
        &self,
        meta: &'a IndexMetadata,
        old_row: &Row,
        new_row: &Row,
        pk: &Key,
    ) -> Result<AppliedIndexChange<'a>> {
        let old_key = old_row.key_for_column(&self.schema, &meta.column_name)?;
        let new_key = new_row.key_for_column(&self.schema, &meta.column_name)?;

        let mut tree = self.catalog.index_tree(meta)?;
        if let Err(err) = tree.delete(&old_key) {
            // The old entry may already be stale; the new entry still has
            // to go in.
            warn!(index = %meta.name, key = %old_key, %err, "old index entry missing on update");
        }

        match tree.insert(&new_key, &pk.encode()) {
            Ok(()) => {
                if tree.root_page() != meta.root_page {
                    self.catalog.update_index_root(&meta.name, tree.root_page())?;
                }
                Ok(AppliedIndexChange {
                    meta,
                    old_key,
                    new_key,
                })
            }
            Err(err) => {
                // Restore the old entry before reporting the failure.
                if let Err(undo_err) = tree.insert(&old_key, &pk.encode()) {
                    warn!(index = %meta.name, key = %old_key, err = %undo_err,
                          "rollback: failed to restore old index entry");
                }
                Err(err)
            }
        }
    }

    fn undo_update(&self, applied: &[AppliedIndexChange<'_>], pk: &Key) {
        for change in applied {
            let mut tree = match self.catalog.index_tree(change.meta) {
                Ok(tree) => tree,
                Err(err) => {
                    warn!(index = %change.meta.name, %err, "rollback: failed to open index");
                    continue;
                }
            };
            if let Err(err) = tree.delete(&change.new_key) {
                warn!(index = %change.meta.name, %err, "rollback: failed to remove new index entry");
            }
            if let Err(err) = tree.insert(&change.old_key, &pk.encode()) {
                warn!(index = %change.meta.name, %err, "rollback: failed to restore old index entry");
            }
        }
    }

    /// Deletes a row: secondary indexes first, then the main tree. If the
    /// main-tree delete fails, the removed index entries are restored.
    pub fn delete(&mut self, pk: &Key) -> Result<()> {
        let row = self.get(pk)?;

        let indexes = self.catalog.table_indexes(&self.schema.name)?;
        let mut removed: Vec<(&IndexMetadata, Key)> = Vec::new();

        for meta in &indexes {
            let index_key = match row.key_for_column(&self.schema, &meta.column_name) {
                Ok(key) => key,
                Err(err) => {
                    warn!(index = %meta.name, %err, "skipping index on delete");
                    continue;
                }
            };
            let mut tree = match self.catalog.index_tree(meta) {
                Ok(tree) => tree,
                Err(err) => {
                    warn!(index = %meta.name, %err, "skipping unloadable index on delete");
                    continue;
                }
            };
            match tree.delete(&index_key) {
                Ok(()) => removed.push((meta, index_key)),
                Err(err) => {
                    warn!(index = %meta.name, key = %index_key, %err,
                          "failed to remove index entry on delete");
                }
            }
        }

        if let Err(err) = self.tree.delete(pk) {
            for (meta, index_key) in &removed {
                let restore = self
                    .catalog
                    .index_tree(meta)
                    .and_then(|mut tree| tree.insert(index_key, &pk.encode()));
                if let Err(undo_err) = restore {
                    warn!(index = %meta.name, err = %undo_err,
                          "rollback: failed to restore index entry");
                }
            }
            return Err(err);
        }

        Ok(())
    }

    /// Inserts many rows, stopping at the first failure. Returns how many
    /// rows were inserted; earlier rows stay in place on failure.
    pub fn batch_insert(&mut self, rows: &[Vec<Value>]) -> Result<usize> {
        for (inserted, values) in rows.iter().enumerate() {
            if let Err(err) = self.insert(values) {
                warn!(table = %self.schema.name, row = inserted, %err,
                      "batch insert stopped");
                return Err(err);
            }
        }
        Ok(rows.len())
    }
}

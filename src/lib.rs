//! # AnubisDB — Single-File Relational Storage Engine
//!
//! AnubisDB is the persistent storage engine of a small relational
//! database: a disk-resident B+Tree keyed by typed values, the slotted
//! page format behind it, a pager over one file, and a catalog layer that
//! keeps table schemas and secondary indexes inside a B+Tree of the same
//! kind.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  Catalog & Table façade (schema)     │  schemas, indexes, row CRUD
//! ├──────────────────────────────────────┤
//! │  B+Tree (btree)                      │  search, insert/split, scans
//! ├──────────────────────────────────────┤
//! │  Slotted pages & cells (storage)     │  sorted pointers, defragment
//! ├──────────────────────────────────────┤
//! │  Pager (storage)                     │  one file, header, RwLock
//! └──────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use anubisdb::{Catalog, Column, ColumnType, Key, Pager, Value};
//!
//! # fn main() -> anubisdb::Result<()> {
//! let pager = Pager::open("app.adb")?;
//! let catalog = Catalog::open(&pager)?;
//!
//! catalog.create_table(
//!     "users",
//!     vec![
//!         Column::new("id", ColumnType::Int).primary_key(),
//!         Column::new("name", ColumnType::Text).not_null(),
//!     ],
//! )?;
//!
//! let mut users = catalog.load_table("users")?;
//! users.insert(&[Value::Int(1), Value::Text("Alice".into())])?;
//! let row = users.get(&Key::Int(1))?;
//! assert_eq!(row.get("name"), Some(&Value::Text("Alice".into())));
//! # Ok(())
//! # }
//! ```
//!
//! ## Scope
//!
//! The engine is deliberately small. There are no transactions, no
//! write-ahead log, no page freelist, and no underflow rebalancing;
//! deleted pages leak and a crash mid-write can corrupt the file. One
//! writer at a time; concurrent readers are safe behind the pager's
//! reader-writer lock.

pub mod btree;
pub mod error;
pub mod schema;
pub mod storage;
pub mod types;

pub use btree::{BTree, Cursor, Entry};
pub use error::{Error, Result};
pub use schema::{Catalog, Column, IndexMetadata, Row, Table, TableSchema};
pub use storage::{Page, PageType, Pager, PAGE_SIZE};
pub use types::{ColumnType, Key, Value};

//! B+Tree index over pager-backed pages.
//!
//! [`BTree`] provides search, insert with split propagation, update,
//! delete, ordered scans over the leaf chain, bounded range scans, and a
//! stateful [`Cursor`]. The `is_index` flag chooses between table and
//! index page-type codes; semantics are identical.

mod cursor;
mod tree;

pub use cursor::Cursor;
pub use tree::{BTree, Entry};

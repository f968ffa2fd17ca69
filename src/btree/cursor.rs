//! # Leaf-Chain Cursor
//!
//! A stateful forward cursor over a B+Tree: `(current leaf page, cell
//! index)`. `next` steps through the current leaf and hops to `nextLeaf`
//! when the leaf is exhausted, skipping leaves that deletions have emptied.
//! The cursor reads pages on demand, so it sees whatever was on disk when
//! each leaf is visited; it is not a snapshot.

use hashbrown::HashSet;

use crate::error::{Error, Result};
use crate::storage::Page;

use super::tree::{BTree, Entry};

pub struct Cursor<'t, 'p> {
    tree: &'t BTree<'p>,
    /// Current leaf, already positioned at a readable cell; `None` when
    /// exhausted.
    page: Option<Page>,
    page_no: u32,
    cell: u16,
    visited: HashSet<u32>,
}

impl<'t, 'p> Cursor<'t, 'p> {
    pub(super) fn new(tree: &'t BTree<'p>) -> Result<Cursor<'t, 'p>> {
        let page_no = tree.first_leaf()?;
        let mut visited = HashSet::new();
        visited.insert(page_no);

        let mut cursor = Cursor {
            tree,
            page: Some(tree.pager().read_page(page_no)?),
            page_no,
            cell: 0,
            visited,
        };
        cursor.skip_exhausted_leaves()?;
        Ok(cursor)
    }

    /// Hops forward until the cursor rests on a cell or runs off the chain.
    fn skip_exhausted_leaves(&mut self) -> Result<()> {
        while let Some(page) = &self.page {
            if self.cell < page.num_cells() {
                return Ok(());
            }

            let next = page.next_leaf()?;
            if next == 0 {
                self.page = None;
                return Ok(());
            }
            if next > self.tree.pager().num_pages() {
                return Err(Error::corrupted(format!(
                    "leaf chain points at unallocated page {next}"
                )));
            }
            if !self.visited.insert(next) {
                return Err(Error::corrupted(format!(
                    "cycle in leaf chain at page {next}"
                )));
            }

            self.page = Some(self.tree.pager().read_page(next)?);
            self.page_no = next;
            self.cell = 0;
        }
        Ok(())
    }

    /// Whether another entry is available.
    pub fn has_next(&self) -> bool {
        self.page.is_some()
    }

    /// Page number of the leaf the cursor currently rests on.
    pub fn current_page(&self) -> u32 {
        self.page_no
    }

    /// Returns the next entry in key order, or `None` once exhausted.
    pub fn next(&mut self) -> Result<Option<Entry>> {
        let Some(page) = &self.page else {
            return Ok(None);
        };

        let cell = page.get_leaf_cell(self.cell)?;
        self.cell += 1;
        self.skip_exhausted_leaves()?;

        Ok(Some(Entry {
            key: cell.key,
            value: cell.value,
        }))
    }
}

//! # Disk B+Tree
//!
//! A B+Tree over pager-managed pages. All values live in leaf pages;
//! interior pages hold separator keys and child pointers. Leaves form a
//! doubly linked chain in key order, which gives ordered scans without
//! touching interior pages.
//!
//! ```text
//!                  [interior root]
//!                  /      |      \
//!          [leaf A] <-> [leaf B] <-> [leaf C]
//! ```
//!
//! ## Separator Convention
//!
//! An interior cell `(key, child)` routes every search key strictly less
//! than `key` (and not claimed by an earlier cell) into `child`; keys equal
//! to or greater than the last separator go to `rightmostChild`. A
//! separator is therefore strictly greater than everything in its child
//! subtree and less than or equal to everything to its right.
//!
//! ## Insert and Split Propagation
//!
//! Descent records the root-to-leaf path; split propagation walks that
//! recorded path back up rather than chasing the `parent` header field,
//! which is written at allocation time but never navigated. On a leaf
//! split the sibling takes the upper half of the cells and is spliced into
//! the leaf chain; the first key of the upper half becomes the separator
//! pushed to the parent. Because the parent's existing reference to the
//! split page now covers only the upper half, that reference is re-pointed
//! to the sibling and a new cell `(separator, old page)` is inserted before
//! it. On an interior split the middle cell is pushed up whole: its key
//! propagates and its child pointer becomes the left page's new
//! `rightmostChild`, while the sibling inherits the old `rightmostChild`.
//! When propagation outruns the recorded path the root itself has split and
//! a new interior root is allocated; this is the only time the tree's root
//! page number changes, and the owner of the tree must persist the new
//! number.
//!
//! ## What Is Not Here
//!
//! Deletion does not rebalance: leaves may become arbitrarily sparse, which
//! costs space but never correctness. There is no page reuse — the pager
//! has no freelist — and no overflow chains: a cell must fit in one page or
//! the insert is rejected.

use hashbrown::HashSet;
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::storage::{
    InteriorCell, LeafCell, Page, PageType, Pager, LEAF_HEADER_SIZE, PAGE_SIZE,
};
use crate::types::Key;

use super::cursor::Cursor;

/// A key/value pair produced by scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Key,
    pub value: Vec<u8>,
}

/// Handle to a B+Tree rooted at a page. Cheap to construct; all state lives
/// in the pager's file except the root page number and cached depth.
#[derive(Debug)]
pub struct BTree<'p> {
    pager: &'p Pager,
    root_page: u32,
    depth: u32,
    is_index: bool,
}

/// Descent path from the root to (but excluding) a leaf.
type Path = SmallVec<[u32; 8]>;

/// Largest cell a single empty leaf can hold, pointer slot included.
fn max_leaf_cell_size() -> u32 {
    (PAGE_SIZE - LEAF_HEADER_SIZE) as u32 - 2
}

impl<'p> BTree<'p> {
    /// Allocates a fresh tree: a single empty leaf page as root.
    pub fn create(pager: &'p Pager, is_index: bool) -> Result<BTree<'p>> {
        let leaf_type = if is_index {
            PageType::LeafIndex
        } else {
            PageType::LeafTable
        };
        let (root_page, _page) = pager.allocate_page(leaf_type, 0)?;

        Ok(BTree {
            pager,
            root_page,
            depth: 1,
            is_index,
        })
    }

    /// Attaches to an existing tree, validating the root and measuring the
    /// depth by walking the leftmost spine.
    pub fn load(pager: &'p Pager, root_page: u32, is_index: bool) -> Result<BTree<'p>> {
        if root_page == 0 || root_page > pager.num_pages() {
            return Err(Error::corrupted(format!(
                "tree root {root_page} out of range ({} pages)",
                pager.num_pages()
            )));
        }

        let mut tree = BTree {
            pager,
            root_page,
            depth: 0,
            is_index,
        };
        tree.depth = tree.measure_depth()?;
        Ok(tree)
    }

    pub fn root_page(&self) -> u32 {
        self.root_page
    }

    /// Number of levels on the root-to-leaf path, inclusive: a tree that
    /// is a single leaf has depth 1.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn is_index(&self) -> bool {
        self.is_index
    }

    fn leaf_type(&self) -> PageType {
        if self.is_index {
            PageType::LeafIndex
        } else {
            PageType::LeafTable
        }
    }

    fn interior_type(&self) -> PageType {
        if self.is_index {
            PageType::InteriorIndex
        } else {
            PageType::InteriorTable
        }
    }

    fn check_family(&self, page: &Page, page_no: u32) -> Result<()> {
        let expected_index = matches!(
            page.page_type(),
            PageType::LeafIndex | PageType::InteriorIndex
        );
        if expected_index != self.is_index {
            return Err(Error::corrupted(format!(
                "page {page_no} has type {:?}, which does not belong to this tree",
                page.page_type()
            )));
        }
        Ok(())
    }

    fn measure_depth(&self) -> Result<u32> {
        let mut depth = 1u32;
        let mut current = self.root_page;

        loop {
            let page = self.pager.read_page(current)?;
            self.check_family(&page, current)?;
            if page.is_leaf() {
                return Ok(depth);
            }
            current = Self::leftmost_child(&page)?;
            depth += 1;

            if depth > self.pager.num_pages() {
                return Err(Error::corrupted("cycle in interior pages"));
            }
        }
    }

    fn leftmost_child(page: &Page) -> Result<u32> {
        let child = if page.num_cells() == 0 {
            page.rightmost_child()?
        } else {
            page.get_interior_cell(0)?.child_page
        };
        if child == 0 {
            return Err(Error::corrupted("interior page with no children"));
        }
        Ok(child)
    }

    /// Child that covers `key`: the child of the smallest separator
    /// strictly greater than `key`, or `rightmostChild` when none is.
    fn child_for_key(page: &Page, key: &Key) -> Result<u32> {
        let (index, found) = page.search_cell(key)?;
        // A key equal to a separator belongs to the next subtree.
        let position = if found { index + 1 } else { index };

        let child = if position < page.num_cells() {
            page.get_interior_cell(position)?.child_page
        } else {
            page.rightmost_child()?
        };
        if child == 0 {
            return Err(Error::corrupted("interior page routes to page 0"));
        }
        Ok(child)
    }

    /// Descends to the leaf that does or would contain `key`, recording the
    /// interior pages passed on the way down.
    fn find_leaf(&self, key: &Key) -> Result<(u32, Path)> {
        let mut path = Path::new();
        let mut current = self.root_page;

        loop {
            let page = self.pager.read_page(current)?;
            self.check_family(&page, current)?;
            if page.is_leaf() {
                return Ok((current, path));
            }

            path.push(current);
            current = Self::child_for_key(&page, key)?;

            if path.len() > self.pager.num_pages() as usize {
                return Err(Error::corrupted("cycle in interior pages"));
            }
        }
    }

    /// Looks up `key`, returning its value bytes.
    pub fn search(&self, key: &Key) -> Result<Vec<u8>> {
        let (leaf_no, _) = self.find_leaf(key)?;
        let leaf = self.pager.read_page(leaf_no)?;

        let (index, found) = leaf.search_cell(key)?;
        if !found {
            return Err(Error::not_found(format!("key {key}")));
        }
        Ok(leaf.get_leaf_cell(index)?.value)
    }

    /// Inserts a new key. Fails with `AlreadyExists` on duplicates and
    /// `NotEnoughSpace` when the cell cannot fit a page even alone.
    pub fn insert(&mut self, key: &Key, value: &[u8]) -> Result<()> {
        let cell = LeafCell::new(key.clone(), value.to_vec());
        if cell.size() > max_leaf_cell_size() {
            return Err(Error::NotEnoughSpace {
                cell_size: cell.size(),
                available: max_leaf_cell_size(),
            });
        }

        let (leaf_no, path) = self.find_leaf(key)?;
        let mut leaf = self.pager.read_page(leaf_no)?;

        let (_, found) = leaf.search_cell(key)?;
        if found {
            return Err(Error::AlreadyExists(format!("key {key}")));
        }

        if leaf.can_fit(cell.size()) {
            leaf.insert_leaf_cell(&cell)?;
            return self.pager.write_page(leaf_no, &leaf);
        }

        let (split_key, sibling_no) = self.split_leaf(leaf_no, &leaf, cell)?;
        self.propagate_split(path, leaf_no, split_key, sibling_no)
    }

    /// Splits a full leaf around a new cell. Returns the separator key and
    /// the new right sibling's page number.
    fn split_leaf(&self, page_no: u32, page: &Page, new_cell: LeafCell) -> Result<(Key, u32)> {
        let mut cells: Vec<LeafCell> = Vec::with_capacity(page.num_cells() as usize + 1);
        for i in 0..page.num_cells() {
            cells.push(page.get_leaf_cell(i)?);
        }
        let position = cells
            .binary_search_by(|c| c.key.cmp(&new_cell.key))
            .err()
            .ok_or_else(|| Error::corrupted("split saw a duplicate key"))?;
        cells.insert(position, new_cell);

        let mid = (cells.len() / 2).clamp(1, cells.len() - 1);
        let split_key = cells[mid].key.clone();

        let (sibling_no, mut sibling) = self.pager.allocate_page(self.leaf_type(), page.parent())?;

        // Rebuild the old page with the lower half, keeping its chain links.
        let old_next = page.next_leaf()?;
        let mut left = Page::new(self.leaf_type());
        left.set_parent(page.parent());
        left.set_prev_leaf(page.prev_leaf()?)?;
        left.set_next_leaf(sibling_no)?;
        for cell in &cells[..mid] {
            left.insert_leaf_cell(cell)?;
        }

        for cell in &cells[mid..] {
            sibling.insert_leaf_cell(cell)?;
        }
        sibling.set_prev_leaf(page_no)?;
        sibling.set_next_leaf(old_next)?;

        // Splice the sibling into the doubly linked chain.
        if old_next != 0 {
            let mut successor = self.pager.read_page(old_next)?;
            successor.set_prev_leaf(sibling_no)?;
            self.pager.write_page(old_next, &successor)?;
        }

        self.pager.write_page(page_no, &left)?;
        self.pager.write_page(sibling_no, &sibling)?;

        Ok((split_key, sibling_no))
    }

    /// Installs a separator in each ancestor, splitting interiors as needed;
    /// allocates a new root when the split reaches the top.
    fn propagate_split(
        &mut self,
        mut path: Path,
        mut left_no: u32,
        mut split_key: Key,
        mut right_no: u32,
    ) -> Result<()> {
        while let Some(parent_no) = path.pop() {
            let mut parent = self.pager.read_page(parent_no)?;

            // The parent's reference that used to cover the whole split page
            // now covers only the upper half: re-point it to the sibling.
            let (index, found) = parent.search_cell(&split_key)?;
            if found {
                return Err(Error::corrupted(format!(
                    "separator {split_key} already present in parent page {parent_no}"
                )));
            }
            let old_ref = if index < parent.num_cells() {
                parent.get_interior_cell(index)?.child_page
            } else {
                parent.rightmost_child()?
            };
            if old_ref != left_no {
                return Err(Error::corrupted(format!(
                    "split invariant violated: page {parent_no} routes {split_key} to {old_ref}, expected {left_no}"
                )));
            }
            if index < parent.num_cells() {
                parent.set_interior_child(index, right_no)?;
            } else {
                parent.set_rightmost_child(right_no)?;
            }

            let cell = InteriorCell::new(split_key.clone(), left_no);
            if parent.can_fit(cell.size()) {
                parent.insert_interior_cell(&cell)?;
                return self.pager.write_page(parent_no, &parent);
            }

            let (push_key, sibling_no) = self.split_interior(parent_no, &parent, cell)?;
            left_no = parent_no;
            right_no = sibling_no;
            split_key = push_key;
        }

        self.create_new_root(left_no, split_key, right_no)
    }

    /// Splits a full interior page around a new cell. The middle cell is
    /// pushed up: its key becomes the propagated separator and its child
    /// becomes the left page's new `rightmostChild`; the right sibling
    /// inherits the old `rightmostChild`.
    fn split_interior(
        &self,
        page_no: u32,
        page: &Page,
        new_cell: InteriorCell,
    ) -> Result<(Key, u32)> {
        let mut cells: Vec<InteriorCell> = Vec::with_capacity(page.num_cells() as usize + 1);
        for i in 0..page.num_cells() {
            cells.push(page.get_interior_cell(i)?);
        }
        let old_rightmost = page.rightmost_child()?;

        let position = cells
            .binary_search_by(|c| c.key.cmp(&new_cell.key))
            .err()
            .ok_or_else(|| Error::corrupted("split saw a duplicate separator"))?;
        cells.insert(position, new_cell);

        let mid = (cells.len() / 2).clamp(1, cells.len() - 1);
        let push_up = cells[mid].clone();

        let (sibling_no, mut sibling) =
            self.pager.allocate_page(self.interior_type(), page.parent())?;

        let mut left = Page::new(self.interior_type());
        left.set_parent(page.parent());
        left.set_rightmost_child(push_up.child_page)?;
        for cell in &cells[..mid] {
            left.insert_interior_cell(cell)?;
        }

        sibling.set_rightmost_child(old_rightmost)?;
        for cell in &cells[mid + 1..] {
            sibling.insert_interior_cell(cell)?;
        }

        self.pager.write_page(page_no, &left)?;
        self.pager.write_page(sibling_no, &sibling)?;

        Ok((push_up.key, sibling_no))
    }

    /// The root itself split: allocate a new interior root above both halves.
    fn create_new_root(&mut self, left_no: u32, split_key: Key, right_no: u32) -> Result<()> {
        let (root_no, mut root) = self.pager.allocate_page(self.interior_type(), 0)?;

        root.set_rightmost_child(right_no)?;
        root.insert_interior_cell(&InteriorCell::new(split_key, left_no))?;
        self.pager.write_page(root_no, &root)?;

        for child_no in [left_no, right_no] {
            let mut child = self.pager.read_page(child_no)?;
            child.set_parent(root_no);
            self.pager.write_page(child_no, &child)?;
        }

        self.root_page = root_no;
        self.depth += 1;
        Ok(())
    }

    /// Replaces the value stored under an existing key. Rewrites in place
    /// when the new cell fits the page after removing the old one,
    /// otherwise re-drives the insert path (which may split).
    pub fn update(&mut self, key: &Key, value: &[u8]) -> Result<()> {
        let cell = LeafCell::new(key.clone(), value.to_vec());
        if cell.size() > max_leaf_cell_size() {
            return Err(Error::NotEnoughSpace {
                cell_size: cell.size(),
                available: max_leaf_cell_size(),
            });
        }

        let (leaf_no, _) = self.find_leaf(key)?;
        let mut leaf = self.pager.read_page(leaf_no)?;

        let (index, found) = leaf.search_cell(key)?;
        if !found {
            return Err(Error::not_found(format!("key {key}")));
        }

        leaf.delete_cell(index)?;
        if leaf.can_fit(cell.size()) {
            leaf.insert_leaf_cell(&cell)?;
            return self.pager.write_page(leaf_no, &leaf);
        }

        self.pager.write_page(leaf_no, &leaf)?;
        self.insert(key, value)
    }

    /// Removes a key. Leaves may become sparse — underflow is not handled —
    /// but the leaf chain and sort order stay intact.
    pub fn delete(&mut self, key: &Key) -> Result<()> {
        let (leaf_no, _) = self.find_leaf(key)?;
        let mut leaf = self.pager.read_page(leaf_no)?;

        let (index, found) = leaf.search_cell(key)?;
        if !found {
            return Err(Error::not_found(format!("key {key}")));
        }

        leaf.delete_cell(index)?;
        self.pager.write_page(leaf_no, &leaf)
    }

    fn leftmost_leaf(&self) -> Result<u32> {
        let mut current = self.root_page;
        let mut steps = 0u32;

        loop {
            let page = self.pager.read_page(current)?;
            if page.is_leaf() {
                return Ok(current);
            }
            current = Self::leftmost_child(&page)?;

            steps += 1;
            if steps > self.pager.num_pages() {
                return Err(Error::corrupted("cycle in interior pages"));
            }
        }
    }

    fn next_in_chain(&self, page: &Page, visited: &mut HashSet<u32>) -> Result<u32> {
        let next = page.next_leaf()?;
        if next == 0 {
            return Ok(0);
        }
        if next > self.pager.num_pages() {
            return Err(Error::corrupted(format!(
                "leaf chain points at unallocated page {next}"
            )));
        }
        if !visited.insert(next) {
            return Err(Error::corrupted(format!(
                "cycle in leaf chain at page {next}"
            )));
        }
        Ok(next)
    }

    /// Every entry in ascending key order, via the leaf chain.
    pub fn scan(&self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        let mut visited = HashSet::new();
        let mut current = self.leftmost_leaf()?;
        visited.insert(current);

        while current != 0 {
            let page = self.pager.read_page(current)?;
            for i in 0..page.num_cells() {
                let cell = page.get_leaf_cell(i)?;
                entries.push(Entry {
                    key: cell.key,
                    value: cell.value,
                });
            }
            current = self.next_in_chain(&page, &mut visited)?;
        }

        Ok(entries)
    }

    /// Entries with `lo ≤ key ≤ hi`, ascending.
    pub fn range_search(&self, lo: &Key, hi: &Key) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        if hi < lo {
            return Ok(entries);
        }

        let mut visited = HashSet::new();
        let (mut current, _) = self.find_leaf(lo)?;
        visited.insert(current);

        'chain: while current != 0 {
            let page = self.pager.read_page(current)?;
            for i in 0..page.num_cells() {
                let cell = page.get_leaf_cell(i)?;
                if cell.key < *lo {
                    continue;
                }
                if cell.key > *hi {
                    break 'chain;
                }
                entries.push(Entry {
                    key: cell.key,
                    value: cell.value,
                });
            }
            current = self.next_in_chain(&page, &mut visited)?;
        }

        Ok(entries)
    }

    /// Stateful forward cursor positioned before the first entry.
    pub fn iterator(&self) -> Result<Cursor<'_, 'p>> {
        Cursor::new(self)
    }

    /// Number of entries, by walking the leaf chain.
    pub fn count(&self) -> Result<usize> {
        let mut count = 0usize;
        let mut visited = HashSet::new();
        let mut current = self.leftmost_leaf()?;
        visited.insert(current);

        while current != 0 {
            let page = self.pager.read_page(current)?;
            count += page.num_cells() as usize;
            current = self.next_in_chain(&page, &mut visited)?;
        }

        Ok(count)
    }

    /// Calls `visit` for each entry in key order until it returns `false`.
    pub fn for_each(&self, mut visit: impl FnMut(&Key, &[u8]) -> bool) -> Result<()> {
        let mut visited = HashSet::new();
        let mut current = self.leftmost_leaf()?;
        visited.insert(current);

        while current != 0 {
            let page = self.pager.read_page(current)?;
            for i in 0..page.num_cells() {
                let cell = page.get_leaf_cell(i)?;
                if !visit(&cell.key, &cell.value) {
                    return Ok(());
                }
            }
            current = self.next_in_chain(&page, &mut visited)?;
        }

        Ok(())
    }

    pub(crate) fn pager(&self) -> &'p Pager {
        self.pager
    }

    pub(crate) fn first_leaf(&self) -> Result<u32> {
        self.leftmost_leaf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_pager() -> (tempfile::TempDir, Pager) {
        let dir = tempdir().unwrap();
        let pager = Pager::open(dir.path().join("tree.adb")).unwrap();
        (dir, pager)
    }

    fn int_entries(tree: &BTree) -> Vec<i64> {
        tree.scan()
            .unwrap()
            .into_iter()
            .map(|e| match e.key {
                Key::Int(v) => v,
                other => panic!("unexpected key {other}"),
            })
            .collect()
    }

    /// Walks the leaf chain verifying the doubly linked structure and
    /// returning the chain length.
    fn check_leaf_chain(pager: &Pager, tree: &BTree) -> usize {
        let mut current = tree.first_leaf().unwrap();
        let mut prev = 0u32;
        let mut length = 0usize;
        let mut last_key: Option<Key> = None;

        while current != 0 {
            let page = pager.read_page(current).unwrap();
            assert!(page.is_leaf());
            assert_eq!(page.prev_leaf().unwrap(), prev, "prev link broken");

            for i in 0..page.num_cells() {
                let key = page.get_cell_key(i).unwrap();
                if let Some(last) = &last_key {
                    assert!(*last < key, "keys out of order across the chain");
                }
                last_key = Some(key);
            }

            length += 1;
            prev = current;
            current = page.next_leaf().unwrap();
            assert!(length <= pager.num_pages() as usize, "chain cycle");
        }

        length
    }

    #[test]
    fn create_allocates_an_empty_leaf_root() {
        let (_dir, pager) = open_pager();
        let tree = BTree::create(&pager, false).unwrap();

        assert_eq!(tree.depth(), 1);
        let root = pager.read_page(tree.root_page()).unwrap();
        assert_eq!(root.page_type(), PageType::LeafTable);
        assert_eq!(root.num_cells(), 0);
    }

    #[test]
    fn index_trees_use_index_page_types() {
        let (_dir, pager) = open_pager();
        let tree = BTree::create(&pager, true).unwrap();

        let root = pager.read_page(tree.root_page()).unwrap();
        assert_eq!(root.page_type(), PageType::LeafIndex);
    }

    #[test]
    fn load_rejects_out_of_range_root() {
        let (_dir, pager) = open_pager();
        let err = BTree::load(&pager, 9, false).unwrap_err();
        assert!(matches!(err, Error::Corrupted(_)));
    }

    #[test]
    fn load_rejects_wrong_tree_family() {
        let (_dir, pager) = open_pager();
        let tree = BTree::create(&pager, true).unwrap();

        let err = BTree::load(&pager, tree.root_page(), false).unwrap_err();
        assert!(matches!(err, Error::Corrupted(_)));
    }

    #[test]
    fn search_empty_tree_reports_not_found() {
        let (_dir, pager) = open_pager();
        let tree = BTree::create(&pager, false).unwrap();

        let err = tree.search(&Key::Int(1)).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn insert_and_search_single_page() {
        let (_dir, pager) = open_pager();
        let mut tree = BTree::create(&pager, false).unwrap();

        tree.insert(&Key::Int(2), b"two").unwrap();
        tree.insert(&Key::Int(1), b"one").unwrap();
        tree.insert(&Key::Int(3), b"three").unwrap();

        assert_eq!(tree.search(&Key::Int(1)).unwrap(), b"one");
        assert_eq!(tree.search(&Key::Int(2)).unwrap(), b"two");
        assert_eq!(tree.search(&Key::Int(3)).unwrap(), b"three");
        assert!(tree.search(&Key::Int(4)).is_err());
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn duplicate_insert_fails() {
        let (_dir, pager) = open_pager();
        let mut tree = BTree::create(&pager, false).unwrap();

        tree.insert(&Key::Int(1), b"v").unwrap();
        let err = tree.insert(&Key::Int(1), b"w").unwrap_err();

        assert!(matches!(err, Error::AlreadyExists(_)));
        assert_eq!(tree.search(&Key::Int(1)).unwrap(), b"v");
    }

    #[test]
    fn oversize_cell_is_rejected_without_mutation() {
        let (_dir, pager) = open_pager();
        let mut tree = BTree::create(&pager, false).unwrap();

        let err = tree.insert(&Key::Int(1), &vec![0u8; PAGE_SIZE]).unwrap_err();
        assert!(matches!(err, Error::NotEnoughSpace { .. }));
        assert_eq!(tree.count().unwrap(), 0);
        assert_eq!(pager.num_pages(), 1);
    }

    #[test]
    fn sequential_inserts_split_and_stay_sorted() {
        let (_dir, pager) = open_pager();
        let mut tree = BTree::create(&pager, false).unwrap();

        for i in 0..200 {
            tree.insert(&Key::Int(i), format!("value-{i:05}").repeat(10).as_bytes())
                .unwrap();
        }

        assert!(tree.depth() >= 2, "200 wide rows must split a 4K leaf");
        assert_eq!(int_entries(&tree), (0..200).collect::<Vec<_>>());
        for i in 0..200 {
            assert_eq!(
                tree.search(&Key::Int(i)).unwrap(),
                format!("value-{i:05}").repeat(10).as_bytes()
            );
        }
        check_leaf_chain(&pager, &tree);
    }

    #[test]
    fn reverse_inserts_split_and_stay_sorted() {
        let (_dir, pager) = open_pager();
        let mut tree = BTree::create(&pager, false).unwrap();

        for i in (0..300).rev() {
            tree.insert(&Key::Int(i), format!("v{i:04}").repeat(20).as_bytes())
                .unwrap();
        }

        assert_eq!(int_entries(&tree), (0..300).collect::<Vec<_>>());
        check_leaf_chain(&pager, &tree);
    }

    #[test]
    fn interleaved_inserts_reach_multiple_levels() {
        let (_dir, pager) = open_pager();
        let mut tree = BTree::create(&pager, false).unwrap();

        // Wide values force frequent leaf splits; enough of them force the
        // interior level to split as well.
        let value = vec![0xABu8; 450];
        let mut keys: Vec<i64> = Vec::new();
        let mut state = 99u64;
        for _ in 0..2500 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let key = (state >> 16) as i64 % 100_000;
            match tree.insert(&Key::Int(key), &value) {
                Ok(()) => keys.push(key),
                Err(Error::AlreadyExists(_)) => {}
                Err(other) => panic!("insert failed: {other}"),
            }
        }

        keys.sort_unstable();
        assert!(tree.depth() >= 3, "expected an interior split, depth={}", tree.depth());
        assert_eq!(int_entries(&tree), keys);
        for key in &keys {
            assert_eq!(tree.search(&Key::Int(*key)).unwrap(), value);
        }
        check_leaf_chain(&pager, &tree);
    }

    #[test]
    fn text_keys_split_correctly() {
        let (_dir, pager) = open_pager();
        let mut tree = BTree::create(&pager, true).unwrap();

        let mut expected = Vec::new();
        for i in 0..250 {
            let key = format!("user-{:05}", (i * 7919) % 100_000);
            tree.insert(&Key::Text(key.clone()), format!("pk={i}").repeat(15).as_bytes())
                .unwrap();
            expected.push(key);
        }
        expected.sort();

        let scanned: Vec<String> = tree
            .scan()
            .unwrap()
            .into_iter()
            .map(|e| match e.key {
                Key::Text(s) => s,
                other => panic!("unexpected key {other}"),
            })
            .collect();
        assert_eq!(scanned, expected);
        check_leaf_chain(&pager, &tree);
    }

    #[test]
    fn delete_removes_keys_and_keeps_chain() {
        let (_dir, pager) = open_pager();
        let mut tree = BTree::create(&pager, false).unwrap();

        for i in 0..300 {
            tree.insert(&Key::Int(i), format!("val-{i}").repeat(12).as_bytes())
                .unwrap();
        }

        for i in (0..300).step_by(2) {
            tree.delete(&Key::Int(i)).unwrap();
        }

        assert_eq!(
            int_entries(&tree),
            (0..300).filter(|i| i % 2 == 1).collect::<Vec<_>>()
        );
        for i in 0..300 {
            let result = tree.search(&Key::Int(i));
            if i % 2 == 0 {
                assert!(matches!(result, Err(Error::NotFound(_))));
            } else {
                assert!(result.is_ok());
            }
        }
        check_leaf_chain(&pager, &tree);
    }

    #[test]
    fn delete_missing_key_reports_not_found() {
        let (_dir, pager) = open_pager();
        let mut tree = BTree::create(&pager, false).unwrap();
        tree.insert(&Key::Int(1), b"v").unwrap();

        let err = tree.delete(&Key::Int(2)).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn update_rewrites_in_place_when_it_fits() {
        let (_dir, pager) = open_pager();
        let mut tree = BTree::create(&pager, false).unwrap();

        tree.insert(&Key::Int(1), b"original").unwrap();
        tree.update(&Key::Int(1), b"new").unwrap();

        assert_eq!(tree.search(&Key::Int(1)).unwrap(), b"new");
        assert_eq!(tree.count().unwrap(), 1);
    }

    #[test]
    fn update_grows_value_across_split() {
        let (_dir, pager) = open_pager();
        let mut tree = BTree::create(&pager, false).unwrap();

        for i in 0..30 {
            tree.insert(&Key::Int(i), &vec![0u8; 100]).unwrap();
        }
        // The leaf is nearly full; a much larger replacement cannot be
        // rewritten in place and must re-drive the insert path.
        tree.update(&Key::Int(15), &vec![1u8; 1500]).unwrap();

        assert_eq!(tree.search(&Key::Int(15)).unwrap(), vec![1u8; 1500]);
        assert_eq!(tree.count().unwrap(), 30);
        assert_eq!(int_entries(&tree), (0..30).collect::<Vec<_>>());
    }

    #[test]
    fn update_missing_key_reports_not_found() {
        let (_dir, pager) = open_pager();
        let mut tree = BTree::create(&pager, false).unwrap();

        let err = tree.update(&Key::Int(1), b"x").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn scan_empty_tree_is_empty() {
        let (_dir, pager) = open_pager();
        let tree = BTree::create(&pager, false).unwrap();
        assert!(tree.scan().unwrap().is_empty());
        assert_eq!(tree.count().unwrap(), 0);
    }

    #[test]
    fn scan_equals_sorted_inserts_under_churn() {
        let (_dir, pager) = open_pager();
        let mut tree = BTree::create(&pager, false).unwrap();

        let mut present = std::collections::BTreeSet::new();
        let mut state = 7u64;
        for round in 0..1200 {
            state = state.wrapping_mul(2862933555777941757).wrapping_add(3037000493);
            let key = (state >> 20) as i64 % 400;

            if round % 4 == 3 && present.contains(&key) {
                tree.delete(&Key::Int(key)).unwrap();
                present.remove(&key);
            } else if !present.contains(&key) {
                tree.insert(&Key::Int(key), format!("row-{key}").repeat(8).as_bytes())
                    .unwrap();
                present.insert(key);
            }
        }

        assert_eq!(int_entries(&tree), present.iter().copied().collect::<Vec<_>>());
        assert_eq!(tree.count().unwrap(), present.len());
        check_leaf_chain(&pager, &tree);
    }

    #[test]
    fn range_search_matches_filtered_scan() {
        let (_dir, pager) = open_pager();
        let mut tree = BTree::create(&pager, false).unwrap();

        for i in 0..150 {
            tree.insert(&Key::Int(i * 2), format!("v{i}").repeat(25).as_bytes())
                .unwrap();
        }

        for (lo, hi) in [(0i64, 298i64), (17, 111), (50, 50), (299, 400), (-10, 4)] {
            let expected: Vec<Entry> = tree
                .scan()
                .unwrap()
                .into_iter()
                .filter(|e| Key::Int(lo) <= e.key && e.key <= Key::Int(hi))
                .collect();
            let got = tree.range_search(&Key::Int(lo), &Key::Int(hi)).unwrap();
            assert_eq!(got, expected, "range [{lo}, {hi}]");
        }
    }

    #[test]
    fn range_search_with_inverted_bounds_is_empty() {
        let (_dir, pager) = open_pager();
        let mut tree = BTree::create(&pager, false).unwrap();
        tree.insert(&Key::Int(1), b"v").unwrap();

        assert!(tree
            .range_search(&Key::Int(9), &Key::Int(1))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn range_is_inclusive_on_both_bounds() {
        let (_dir, pager) = open_pager();
        let mut tree = BTree::create(&pager, false).unwrap();
        for i in [10, 20, 30, 40] {
            tree.insert(&Key::Int(i), b"x").unwrap();
        }

        let got: Vec<i64> = tree
            .range_search(&Key::Int(20), &Key::Int(40))
            .unwrap()
            .into_iter()
            .map(|e| match e.key {
                Key::Int(v) => v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(got, vec![20, 30, 40]);
    }

    #[test]
    fn scan_detects_leaf_chain_cycle() {
        let (_dir, pager) = open_pager();
        let mut tree = BTree::create(&pager, false).unwrap();

        for i in 0..200 {
            tree.insert(&Key::Int(i), &vec![0u8; 120]).unwrap();
        }
        assert!(tree.depth() >= 2);

        // Corrupt the chain: point the first leaf back at itself.
        let first = tree.first_leaf().unwrap();
        let mut page = pager.read_page(first).unwrap();
        page.set_next_leaf(first).unwrap();
        pager.write_page(first, &page).unwrap();

        let err = tree.scan().unwrap_err();
        assert!(matches!(err, Error::Corrupted(_)));
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn scan_detects_dangling_chain_pointer() {
        let (_dir, pager) = open_pager();
        let mut tree = BTree::create(&pager, false).unwrap();
        tree.insert(&Key::Int(1), b"v").unwrap();

        let first = tree.first_leaf().unwrap();
        let mut page = pager.read_page(first).unwrap();
        page.set_next_leaf(999).unwrap();
        pager.write_page(first, &page).unwrap();

        let err = tree.scan().unwrap_err();
        assert!(matches!(err, Error::Corrupted(_)));
    }

    #[test]
    fn load_restores_tree_state() {
        let (_dir, pager) = open_pager();
        let root;
        {
            let mut tree = BTree::create(&pager, false).unwrap();
            for i in 0..200 {
                tree.insert(&Key::Int(i), format!("{i}").repeat(50).as_bytes())
                    .unwrap();
            }
            root = tree.root_page();
        }

        let tree = BTree::load(&pager, root, false).unwrap();
        assert!(tree.depth() >= 2);
        assert_eq!(int_entries(&tree), (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn for_each_stops_when_visitor_returns_false() {
        let (_dir, pager) = open_pager();
        let mut tree = BTree::create(&pager, false).unwrap();
        for i in 0..10 {
            tree.insert(&Key::Int(i), b"v").unwrap();
        }

        let mut seen = Vec::new();
        tree.for_each(|key, _| {
            if let Key::Int(v) = key {
                seen.push(*v);
            }
            seen.len() < 4
        })
        .unwrap();

        assert_eq!(seen, vec![0, 1, 2, 3]);
    }
}

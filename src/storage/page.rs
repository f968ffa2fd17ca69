//! # Slotted Pages
//!
//! Every page is a fixed-size byte buffer with four regions:
//!
//! ```text
//!       |----------------|
//!       | page header    |   16 bytes (interior) / 20 bytes (leaf)
//!       |----------------|
//!       | cell pointer   |   |  2 bytes per cell, key-sorted.
//!       | array          |   v  Grows downward.
//!       |----------------|
//!       | free space     |
//!       |----------------|   ^  Grows upward from the page end.
//!       | cell content   |   |  Arbitrary order, may contain
//!       | area           |   |  fragments left by deletions.
//!       |----------------|
//! ```
//!
//! ## Header Layout
//!
//! ```text
//! Offset  Size  Field               Notes
//! ------  ----  ------------------  --------------------------------
//! 0       1     pageType            0x02/0x05/0x0A/0x0D
//! 1       2     firstFreeblock      reserved, always 0
//! 3       2     numCells
//! 5       2     cellContentOffset   content area start
//! 7       1     fragmentedBytes     dead bytes below the offset
//! --- interior tail (total header 16) ---
//! 8       4     rightmostChild
//! 12      4     parent
//! --- leaf tail (total header 20) ---
//! 8       4     parent
//! 12      4     nextLeaf
//! 16      4     prevLeaf
//! ```
//!
//! All integers are big-endian. The header structs below use zerocopy's
//! big-endian field types, so reading and writing header fields goes
//! straight through the page buffer — the in-memory header *is* the
//! on-disk header, and there is no separate serialization step to forget.
//!
//! ## Space Accounting
//!
//! The contiguous gap between the pointer array and the content area is
//! `free_space`. Deleted cells are zeroed in place and their bytes counted
//! in `fragmentedBytes` until [`Page::defragment`] repacks the content
//! area. `can_fit` budgets against `free_space + fragmentedBytes` plus the
//! two bytes a new pointer slot costs, and inserts defragment on demand
//! when the contiguous gap alone is too small.
//!
//! After every successful mutation the header invariant holds:
//! `headerSize ≤ headerSize + 2·numCells ≤ cellContentOffset ≤ PAGE_SIZE`,
//! and cell pointers enumerate strictly increasing keys.

use zerocopy::byteorder::big_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::cell::{InteriorCell, LeafCell};
use super::PAGE_SIZE;
use crate::error::{Error, Result};
use crate::types::Key;

pub const BASE_HEADER_SIZE: usize = 8;
pub const INTERIOR_HEADER_SIZE: usize = 16;
pub const LEAF_HEADER_SIZE: usize = 20;

/// Deletions accumulate fragments until this many dead bytes trigger an
/// automatic defragment.
const DEFRAG_THRESHOLD: u8 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    InteriorTable = 0x02,
    LeafTable = 0x05,
    InteriorIndex = 0x0A,
    LeafIndex = 0x0D,
}

impl PageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x02 => Some(PageType::InteriorTable),
            0x05 => Some(PageType::LeafTable),
            0x0A => Some(PageType::InteriorIndex),
            0x0D => Some(PageType::LeafIndex),
            _ => None,
        }
    }

    pub fn is_leaf(self) -> bool {
        matches!(self, PageType::LeafTable | PageType::LeafIndex)
    }

    pub fn is_interior(self) -> bool {
        !self.is_leaf()
    }

    pub fn header_size(self) -> usize {
        if self.is_leaf() {
            LEAF_HEADER_SIZE
        } else {
            INTERIOR_HEADER_SIZE
        }
    }
}

/// Common 8-byte header prefix shared by both page kinds.
#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
struct BaseHeader {
    page_type: u8,
    first_freeblock: U16,
    num_cells: U16,
    cell_content_offset: U16,
    fragmented_bytes: u8,
}

#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
struct InteriorTail {
    rightmost_child: U32,
    parent: U32,
}

#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
struct LeafTail {
    parent: U32,
    next_leaf: U32,
    prev_leaf: U32,
}

/// A fixed-size slotted page held in memory.
#[derive(Debug, Clone)]
pub struct Page {
    page_type: PageType,
    data: Vec<u8>,
}

impl Page {
    /// Constructs an empty page of the given type: zeroed buffer, no cells,
    /// content offset at the page end.
    pub fn new(page_type: PageType) -> Self {
        let mut page = Self {
            page_type,
            data: vec![0u8; PAGE_SIZE],
        };
        {
            let base = page.base_mut();
            base.page_type = page_type as u8;
            base.cell_content_offset = U16::new(PAGE_SIZE as u16);
        }
        page
    }

    /// Adopts a raw page buffer, validating size, page type, and the header
    /// arithmetic invariant.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.len() != PAGE_SIZE {
            return Err(Error::corrupted(format!(
                "page buffer is {} bytes, expected {}",
                data.len(),
                PAGE_SIZE
            )));
        }

        let page_type = PageType::from_byte(data[0])
            .ok_or_else(|| Error::corrupted(format!("unknown page type 0x{:02x}", data[0])))?;

        let page = Self { page_type, data };

        let header = page.header_size();
        let pointer_end = header + 2 * page.num_cells() as usize;
        let content = page.cell_content_offset() as usize;
        if pointer_end > content || content > PAGE_SIZE {
            return Err(Error::corrupted(format!(
                "invalid page header: {} cells, content offset {}",
                page.num_cells(),
                content
            )));
        }

        Ok(page)
    }

    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    pub fn is_leaf(&self) -> bool {
        self.page_type.is_leaf()
    }

    pub fn header_size(&self) -> usize {
        self.page_type.header_size()
    }

    /// Raw page bytes, exactly `PAGE_SIZE` long. Header fields are always
    /// current because they live inside this buffer.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn base(&self) -> &BaseHeader {
        BaseHeader::ref_from_bytes(&self.data[..BASE_HEADER_SIZE]).unwrap()
    }

    fn base_mut(&mut self) -> &mut BaseHeader {
        BaseHeader::mut_from_bytes(&mut self.data[..BASE_HEADER_SIZE]).unwrap()
    }

    fn interior_tail(&self) -> Result<&InteriorTail> {
        if !self.page_type.is_interior() {
            return Err(Error::corrupted("leaf page has no interior header tail"));
        }
        Ok(InteriorTail::ref_from_bytes(&self.data[BASE_HEADER_SIZE..INTERIOR_HEADER_SIZE]).unwrap())
    }

    fn interior_tail_mut(&mut self) -> Result<&mut InteriorTail> {
        if !self.page_type.is_interior() {
            return Err(Error::corrupted("leaf page has no interior header tail"));
        }
        Ok(
            InteriorTail::mut_from_bytes(&mut self.data[BASE_HEADER_SIZE..INTERIOR_HEADER_SIZE])
                .unwrap(),
        )
    }

    fn leaf_tail(&self) -> Result<&LeafTail> {
        if !self.is_leaf() {
            return Err(Error::corrupted("interior page has no leaf header tail"));
        }
        Ok(LeafTail::ref_from_bytes(&self.data[BASE_HEADER_SIZE..LEAF_HEADER_SIZE]).unwrap())
    }

    fn leaf_tail_mut(&mut self) -> Result<&mut LeafTail> {
        if !self.is_leaf() {
            return Err(Error::corrupted("interior page has no leaf header tail"));
        }
        Ok(LeafTail::mut_from_bytes(&mut self.data[BASE_HEADER_SIZE..LEAF_HEADER_SIZE]).unwrap())
    }

    pub fn num_cells(&self) -> u16 {
        self.base().num_cells.get()
    }

    pub fn cell_content_offset(&self) -> u16 {
        self.base().cell_content_offset.get()
    }

    pub fn fragmented_bytes(&self) -> u8 {
        self.base().fragmented_bytes
    }

    pub fn parent(&self) -> u32 {
        if self.is_leaf() {
            self.leaf_tail().unwrap().parent.get()
        } else {
            self.interior_tail().unwrap().parent.get()
        }
    }

    pub fn set_parent(&mut self, page_no: u32) {
        if self.is_leaf() {
            self.leaf_tail_mut().unwrap().parent = U32::new(page_no);
        } else {
            self.interior_tail_mut().unwrap().parent = U32::new(page_no);
        }
    }

    pub fn rightmost_child(&self) -> Result<u32> {
        Ok(self.interior_tail()?.rightmost_child.get())
    }

    pub fn set_rightmost_child(&mut self, page_no: u32) -> Result<()> {
        self.interior_tail_mut()?.rightmost_child = U32::new(page_no);
        Ok(())
    }

    pub fn next_leaf(&self) -> Result<u32> {
        Ok(self.leaf_tail()?.next_leaf.get())
    }

    pub fn set_next_leaf(&mut self, page_no: u32) -> Result<()> {
        self.leaf_tail_mut()?.next_leaf = U32::new(page_no);
        Ok(())
    }

    pub fn prev_leaf(&self) -> Result<u32> {
        Ok(self.leaf_tail()?.prev_leaf.get())
    }

    pub fn set_prev_leaf(&mut self, page_no: u32) -> Result<()> {
        self.leaf_tail_mut()?.prev_leaf = U32::new(page_no);
        Ok(())
    }

    fn pointer_offset(&self, index: u16) -> usize {
        self.header_size() + index as usize * 2
    }

    pub fn get_cell_pointer(&self, index: u16) -> Result<u16> {
        if index >= self.num_cells() {
            return Err(Error::corrupted(format!(
                "cell index {index} out of range ({} cells)",
                self.num_cells()
            )));
        }
        let offset = self.pointer_offset(index);
        Ok(u16::from_be_bytes([self.data[offset], self.data[offset + 1]]))
    }

    pub fn set_cell_pointer(&mut self, index: u16, cell_offset: u16) -> Result<()> {
        if index >= self.num_cells() {
            return Err(Error::corrupted(format!(
                "cell index {index} out of range ({} cells)",
                self.num_cells()
            )));
        }
        let offset = self.pointer_offset(index);
        self.data[offset..offset + 2].copy_from_slice(&cell_offset.to_be_bytes());
        Ok(())
    }

    /// Contiguous gap between the end of the pointer array and the cell
    /// content area.
    pub fn free_space(&self) -> u16 {
        let pointer_end = (self.header_size() + 2 * self.num_cells() as usize) as u16;
        self.cell_content_offset().saturating_sub(pointer_end)
    }

    /// Contiguous gap plus reclaimable fragments.
    pub fn total_free_space(&self) -> u16 {
        self.free_space() + self.fragmented_bytes() as u16
    }

    /// Whether a cell of `cell_size` bytes plus its pointer slot fits,
    /// possibly after a defragment.
    pub fn can_fit(&self, cell_size: u32) -> bool {
        self.total_free_space() as u32 >= cell_size + 2
    }

    fn read_u32_at(&self, offset: usize, what: &str) -> Result<u32> {
        let bytes = self
            .data
            .get(offset..offset + 4)
            .ok_or_else(|| Error::corrupted(format!("{what} extends beyond page")))?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Total serialized length of the cell starting at `cell_offset`.
    fn cell_span(&self, cell_offset: u16) -> Result<usize> {
        let offset = cell_offset as usize;
        if self.is_leaf() {
            let key_len = self.read_u32_at(offset, "leaf cell key length")? as usize;
            let value_len =
                self.read_u32_at(offset + 4 + key_len, "leaf cell value length")? as usize;
            let span = 4 + key_len + 4 + value_len;
            if offset + span > PAGE_SIZE {
                return Err(Error::corrupted("leaf cell extends beyond page"));
            }
            Ok(span)
        } else {
            let key_len = self.read_u32_at(offset + 4, "interior cell key length")? as usize;
            let span = 8 + key_len;
            if offset + span > PAGE_SIZE {
                return Err(Error::corrupted("interior cell extends beyond page"));
            }
            Ok(span)
        }
    }

    /// Decodes the key of cell `index` without materializing the whole cell.
    pub fn get_cell_key(&self, index: u16) -> Result<Key> {
        let offset = self.get_cell_pointer(index)? as usize;
        let key_offset = if self.is_leaf() { offset } else { offset + 4 };
        let key_len = self.read_u32_at(key_offset, "cell key length")? as usize;
        let key_bytes = self
            .data
            .get(key_offset + 4..key_offset + 4 + key_len)
            .ok_or_else(|| Error::corrupted("cell key extends beyond page"))?;
        Key::decode(key_bytes)
    }

    pub fn get_leaf_cell(&self, index: u16) -> Result<LeafCell> {
        if !self.is_leaf() {
            return Err(Error::corrupted("not a leaf page"));
        }
        let offset = self.get_cell_pointer(index)? as usize;
        let span = self.cell_span(offset as u16)?;
        LeafCell::deserialize(&self.data[offset..offset + span])
    }

    pub fn get_interior_cell(&self, index: u16) -> Result<InteriorCell> {
        if self.is_leaf() {
            return Err(Error::corrupted("not an interior page"));
        }
        let offset = self.get_cell_pointer(index)? as usize;
        let span = self.cell_span(offset as u16)?;
        InteriorCell::deserialize(&self.data[offset..offset + span])
    }

    /// Rewrites the child pointer of interior cell `index` in place. The
    /// child page number is the first field of an interior cell, so this
    /// avoids a delete/re-insert cycle during split propagation.
    pub fn set_interior_child(&mut self, index: u16, child_page: u32) -> Result<()> {
        if self.is_leaf() {
            return Err(Error::corrupted("not an interior page"));
        }
        let offset = self.get_cell_pointer(index)? as usize;
        self.data[offset..offset + 4].copy_from_slice(&child_page.to_be_bytes());
        Ok(())
    }

    /// Binary search over the sorted pointer array. Returns the cell index
    /// and whether the key was found; on a miss the index is the position
    /// the key would be inserted at.
    pub fn search_cell(&self, key: &Key) -> Result<(u16, bool)> {
        let mut left = 0u16;
        let mut right = self.num_cells();

        while left < right {
            let mid = (left + right) / 2;
            let cell_key = self.get_cell_key(mid)?;
            match cell_key.cmp(key) {
                std::cmp::Ordering::Equal => return Ok((mid, true)),
                std::cmp::Ordering::Less => left = mid + 1,
                std::cmp::Ordering::Greater => right = mid,
            }
        }

        Ok((left, false))
    }

    pub fn insert_leaf_cell(&mut self, cell: &LeafCell) -> Result<()> {
        if !self.is_leaf() {
            return Err(Error::corrupted("not a leaf page"));
        }
        self.insert_cell_bytes(&cell.key, cell.serialize())
    }

    pub fn insert_interior_cell(&mut self, cell: &InteriorCell) -> Result<()> {
        if self.is_leaf() {
            return Err(Error::corrupted("not an interior page"));
        }
        self.insert_cell_bytes(&cell.key, cell.serialize())
    }

    fn insert_cell_bytes(&mut self, key: &Key, bytes: Vec<u8>) -> Result<()> {
        let cell_size = bytes.len() as u32;

        let (index, found) = self.search_cell(key)?;
        if found {
            return Err(Error::AlreadyExists(format!("key {key} already in page")));
        }

        if !self.can_fit(cell_size) {
            return Err(Error::NotEnoughSpace {
                cell_size,
                available: self.total_free_space() as u32,
            });
        }

        // The cell fits in total but not in the contiguous gap: reclaim the
        // fragments first.
        if (self.free_space() as u32) < cell_size + 2 {
            self.defragment()?;
        }

        let new_offset = self.cell_content_offset() as usize - bytes.len();
        self.data[new_offset..new_offset + bytes.len()].copy_from_slice(&bytes);

        let num_cells = self.num_cells();
        if index < num_cells {
            let src = self.pointer_offset(index);
            let end = self.pointer_offset(num_cells);
            self.data.copy_within(src..end, src + 2);
        }
        let ptr_offset = self.pointer_offset(index);
        self.data[ptr_offset..ptr_offset + 2]
            .copy_from_slice(&(new_offset as u16).to_be_bytes());

        let base = self.base_mut();
        base.num_cells = U16::new(num_cells + 1);
        base.cell_content_offset = U16::new(new_offset as u16);

        Ok(())
    }

    /// Removes cell `index`: the content bytes are zeroed and counted as
    /// fragments, the pointer array closes over the gap. Crossing the
    /// fragment threshold triggers a defragment.
    pub fn delete_cell(&mut self, index: u16) -> Result<()> {
        let offset = self.get_cell_pointer(index)? as usize;
        let span = self.cell_span(offset as u16)?;

        self.data[offset..offset + span].fill(0);

        let num_cells = self.num_cells();
        if index + 1 < num_cells {
            let src = self.pointer_offset(index + 1);
            let end = self.pointer_offset(num_cells);
            let dst = self.pointer_offset(index);
            self.data.copy_within(src..end, dst);
        }

        let frag = span.min(u8::MAX as usize) as u8;
        let base = self.base_mut();
        base.num_cells = U16::new(num_cells - 1);
        base.fragmented_bytes = base.fragmented_bytes.saturating_add(frag);

        if self.fragmented_bytes() > DEFRAG_THRESHOLD {
            self.defragment()?;
        }

        Ok(())
    }

    /// Repacks live cells against the high end of the page, preserving
    /// pointer order, and resets the fragment counter. Idempotent.
    pub fn defragment(&mut self) -> Result<()> {
        let num_cells = self.num_cells();
        let pointer_end = self.header_size() + 2 * num_cells as usize;

        if num_cells == 0 {
            self.data[pointer_end..].fill(0);
            let base = self.base_mut();
            base.cell_content_offset = U16::new(PAGE_SIZE as u16);
            base.fragmented_bytes = 0;
            return Ok(());
        }

        let mut cells: Vec<Vec<u8>> = Vec::with_capacity(num_cells as usize);
        for i in 0..num_cells {
            let offset = self.get_cell_pointer(i)? as usize;
            let span = self.cell_span(offset as u16)?;
            cells.push(self.data[offset..offset + span].to_vec());
        }

        let mut new_offset = PAGE_SIZE;
        for (i, bytes) in cells.iter().enumerate() {
            new_offset -= bytes.len();
            self.data[new_offset..new_offset + bytes.len()].copy_from_slice(bytes);
            let ptr = self.pointer_offset(i as u16);
            self.data[ptr..ptr + 2].copy_from_slice(&(new_offset as u16).to_be_bytes());
        }

        self.data[pointer_end..new_offset].fill(0);

        let base = self.base_mut();
        base.cell_content_offset = U16::new(new_offset as u16);
        base.fragmented_bytes = 0;

        Ok(())
    }
}

//! # Cell Serialization
//!
//! Cells are the individual records stored inside pages. Leaf cells carry
//! actual data, interior cells carry routing information:
//!
//! ```text
//! LEAF CELL
//!   keyLen: u32 ‖ keyBytes ‖ valueLen: u32 ‖ valueBytes
//!
//! INTERIOR CELL
//!   childPage: u32 ‖ keyLen: u32 ‖ keyBytes
//! ```
//!
//! All integers are big-endian. Key bytes are the self-describing [`Key`]
//! encoding, so a cell can be decoded without schema context. An interior
//! cell's meaning is: every key strictly less than `key` (and not covered by
//! an earlier cell) lives in the subtree rooted at `child_page`.
//!
//! The two variants are deliberately separate concrete types. A page knows
//! statically which kind it holds from its page type, so there is no shared
//! cell trait — just two records that both expose `key`, `size`, and a
//! serialize/deserialize pair that are exact inverses.

use crate::error::{Error, Result};
use crate::types::Key;

/// A key/value record stored in a leaf page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafCell {
    pub key: Key,
    pub value: Vec<u8>,
}

impl LeafCell {
    pub fn new(key: Key, value: Vec<u8>) -> Self {
        Self { key, value }
    }

    /// Exact serialized length; the page layer budgets free space with this.
    pub fn size(&self) -> u32 {
        (4 + self.key.encoded_len() + 4 + self.value.len()) as u32
    }

    pub fn serialize(&self) -> Vec<u8> {
        let key_bytes = self.key.encode();
        let mut data = Vec::with_capacity(self.size() as usize);
        data.extend_from_slice(&(key_bytes.len() as u32).to_be_bytes());
        data.extend_from_slice(&key_bytes);
        data.extend_from_slice(&(self.value.len() as u32).to_be_bytes());
        data.extend_from_slice(&self.value);
        data
    }

    pub fn deserialize(data: &[u8]) -> Result<LeafCell> {
        let key_len = read_u32(data, 0, "leaf cell key length")? as usize;
        let key_bytes = data
            .get(4..4 + key_len)
            .ok_or_else(|| Error::corrupted("leaf cell key truncated"))?;
        let key = Key::decode(key_bytes)?;

        let value_len = read_u32(data, 4 + key_len, "leaf cell value length")? as usize;
        let value_start = 4 + key_len + 4;
        let value = data
            .get(value_start..value_start + value_len)
            .ok_or_else(|| Error::corrupted("leaf cell value truncated"))?;

        Ok(LeafCell {
            key,
            value: value.to_vec(),
        })
    }
}

/// A key/child-pointer record stored in an interior page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteriorCell {
    pub key: Key,
    pub child_page: u32,
}

impl InteriorCell {
    pub fn new(key: Key, child_page: u32) -> Self {
        Self { key, child_page }
    }

    pub fn size(&self) -> u32 {
        (4 + 4 + self.key.encoded_len()) as u32
    }

    pub fn serialize(&self) -> Vec<u8> {
        let key_bytes = self.key.encode();
        let mut data = Vec::with_capacity(self.size() as usize);
        data.extend_from_slice(&self.child_page.to_be_bytes());
        data.extend_from_slice(&(key_bytes.len() as u32).to_be_bytes());
        data.extend_from_slice(&key_bytes);
        data
    }

    pub fn deserialize(data: &[u8]) -> Result<InteriorCell> {
        let child_page = read_u32(data, 0, "interior cell child pointer")?;
        let key_len = read_u32(data, 4, "interior cell key length")? as usize;
        let key_bytes = data
            .get(8..8 + key_len)
            .ok_or_else(|| Error::corrupted("interior cell key truncated"))?;
        let key = Key::decode(key_bytes)?;

        Ok(InteriorCell { key, child_page })
    }
}

fn read_u32(data: &[u8], offset: usize, what: &str) -> Result<u32> {
    let bytes = data
        .get(offset..offset + 4)
        .ok_or_else(|| Error::corrupted(format!("{what} truncated")))?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_cell_round_trips() {
        let cell = LeafCell::new(Key::Int(42), b"payload".to_vec());
        let data = cell.serialize();

        assert_eq!(data.len(), cell.size() as usize);
        assert_eq!(LeafCell::deserialize(&data).unwrap(), cell);
    }

    #[test]
    fn leaf_cell_round_trips_empty_value() {
        let cell = LeafCell::new(Key::Text("k".into()), Vec::new());
        let data = cell.serialize();

        assert_eq!(LeafCell::deserialize(&data).unwrap(), cell);
    }

    #[test]
    fn leaf_cell_layout_is_big_endian() {
        let cell = LeafCell::new(Key::Bool(true), vec![0xAA]);
        let data = cell.serialize();

        // keyLen=2, key=[0x04, 0x01], valueLen=1, value=[0xAA]
        assert_eq!(data, vec![0, 0, 0, 2, 0x04, 0x01, 0, 0, 0, 1, 0xAA]);
    }

    #[test]
    fn leaf_cell_rejects_truncated_buffers() {
        let cell = LeafCell::new(Key::Int(7), vec![1, 2, 3, 4]);
        let data = cell.serialize();

        for cut in [0, 3, 7, data.len() - 1] {
            assert!(LeafCell::deserialize(&data[..cut]).is_err(), "cut={cut}");
        }
    }

    #[test]
    fn interior_cell_round_trips() {
        let cell = InteriorCell::new(Key::Text("separator".into()), 99);
        let data = cell.serialize();

        assert_eq!(data.len(), cell.size() as usize);
        assert_eq!(InteriorCell::deserialize(&data).unwrap(), cell);
    }

    #[test]
    fn interior_cell_layout_puts_child_first() {
        let cell = InteriorCell::new(Key::Bool(false), 0x01020304);
        let data = cell.serialize();

        assert_eq!(&data[..4], &[1, 2, 3, 4]);
        assert_eq!(&data[4..8], &[0, 0, 0, 2]);
    }

    #[test]
    fn interior_cell_rejects_truncated_buffers() {
        let cell = InteriorCell::new(Key::Int(5), 2);
        let data = cell.serialize();

        for cut in [0, 4, 8, data.len() - 1] {
            assert!(
                InteriorCell::deserialize(&data[..cut]).is_err(),
                "cut={cut}"
            );
        }
    }

    #[test]
    fn sizes_track_key_variants() {
        assert_eq!(LeafCell::new(Key::Int(1), vec![0; 10]).size(), 4 + 9 + 4 + 10);
        assert_eq!(
            LeafCell::new(Key::Text("abc".into()), Vec::new()).size(),
            4 + 8 + 4
        );
        assert_eq!(InteriorCell::new(Key::Float(1.0), 3).size(), 4 + 4 + 9);
        assert_eq!(InteriorCell::new(Key::Bool(true), 3).size(), 4 + 4 + 2);
    }
}

//! Dictionary-encoded string column.
//!
//! Per row, the column stores a dictionary id (0 = null); the dictionary
//! itself is shared across partitions and lives on the database. Every id
//! present in the partition has an equi-index bitmap, so `equals` filters are
//! a single index lookup.

use std::collections::HashMap;

use roaring::RoaringBitmap;

use crate::bitmap::{roaring_bytes, roaring_bytes_map};
use crate::storage::dictionary::NULL_ID;

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct StringColumnPartition {
    values: Vec<u32>,
    #[serde(with = "roaring_bytes_map")]
    index: HashMap<u32, RoaringBitmap>,
    #[serde(with = "roaring_bytes")]
    null_bitmap: RoaringBitmap,
}

impl StringColumnPartition {
    pub fn new() -> Self {
        StringColumnPartition::default()
    }

    pub fn reserve(&mut self, row_count: usize) {
        self.values.reserve(row_count);
    }

    pub fn insert(&mut self, value_id: u32) {
        let row = self.values.len() as u32;
        self.values.push(value_id);
        self.index.entry(value_id).or_default().insert(row);
    }

    pub fn insert_null(&mut self) {
        let row = self.values.len() as u32;
        self.values.push(NULL_ID);
        self.null_bitmap.insert(row);
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn value_id(&self, row: u32) -> u32 {
        self.values[row as usize]
    }

    pub fn is_null(&self, row: u32) -> bool {
        self.values[row as usize] == NULL_ID
    }

    /// Equi-index lookup; `None` when the id does not occur in this
    /// partition.
    pub fn filter_equals(&self, value_id: u32) -> Option<&RoaringBitmap> {
        if value_id == NULL_ID {
            return None;
        }
        self.index.get(&value_id)
    }

    pub fn null_bitmap(&self) -> &RoaringBitmap {
        &self.null_bitmap
    }

    pub fn value_ids(&self) -> &[u32] {
        &self.values
    }
}

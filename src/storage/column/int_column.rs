//! Integer column: dense `i64` array plus null bitmap.
//!
//! Small-cardinality columns (age groups, CT-value bins) additionally carry
//! an equi-index built at finalization, turning `equals` filters into index
//! lookups. High-cardinality columns fall back to scans.

use std::collections::HashMap;

use roaring::RoaringBitmap;

use crate::bitmap::{roaring_bytes, roaring_bytes_map};

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct IntColumnPartition {
    values: Vec<i64>,
    #[serde(with = "roaring_bytes")]
    null_bitmap: RoaringBitmap,
    equi_index: Option<EquiIndex>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct EquiIndex {
    #[serde(with = "roaring_bytes_map")]
    bitmaps: HashMap<i64, RoaringBitmap>,
}

impl IntColumnPartition {
    pub fn new() -> Self {
        IntColumnPartition::default()
    }

    pub fn reserve(&mut self, row_count: usize) {
        self.values.reserve(row_count);
    }

    pub fn insert(&mut self, value: i64) {
        self.values.push(value);
    }

    pub fn insert_null(&mut self) {
        let row = self.values.len() as u32;
        self.values.push(0);
        self.null_bitmap.insert(row);
    }

    /// Build the equi-index if the column's distinct-value count is at most
    /// `max_cardinality`. Called once when the partition is frozen.
    pub fn finalize(&mut self, max_cardinality: usize) {
        let mut bitmaps: HashMap<i64, RoaringBitmap> = HashMap::new();
        for (row, &value) in self.values.iter().enumerate() {
            if self.null_bitmap.contains(row as u32) {
                continue;
            }
            bitmaps.entry(value).or_default().insert(row as u32);
            if bitmaps.len() > max_cardinality {
                self.equi_index = None;
                return;
            }
        }
        self.equi_index = Some(EquiIndex { bitmaps });
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn value(&self, row: u32) -> Option<i64> {
        if self.null_bitmap.contains(row) {
            None
        } else {
            Some(self.values[row as usize])
        }
    }

    pub fn is_null(&self, row: u32) -> bool {
        self.null_bitmap.contains(row)
    }

    /// Precomputed `equals` bitmap, when the equi-index exists.
    ///
    /// `Some(None)` means the index exists but the value does not occur;
    /// `None` means the column has no index and callers must scan.
    pub fn filter_equals(&self, value: i64) -> Option<Option<&RoaringBitmap>> {
        self.equi_index
            .as_ref()
            .map(|index| index.bitmaps.get(&value))
    }

    pub fn null_bitmap(&self) -> &RoaringBitmap {
        &self.null_bitmap
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }
}

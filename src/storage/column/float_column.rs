//! Float column: dense `f64` array with NaN as the null sentinel.

use roaring::RoaringBitmap;

use crate::bitmap::roaring_bytes;

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct FloatColumnPartition {
    values: Vec<f64>,
    #[serde(with = "roaring_bytes")]
    null_bitmap: RoaringBitmap,
}

impl FloatColumnPartition {
    pub fn new() -> Self {
        FloatColumnPartition::default()
    }

    pub fn reserve(&mut self, row_count: usize) {
        self.values.reserve(row_count);
    }

    pub fn insert(&mut self, value: f64) {
        self.values.push(value);
    }

    pub fn insert_null(&mut self) {
        let row = self.values.len() as u32;
        self.values.push(f64::NAN);
        self.null_bitmap.insert(row);
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn value(&self, row: u32) -> Option<f64> {
        let value = self.values[row as usize];
        if value.is_nan() {
            None
        } else {
            Some(value)
        }
    }

    pub fn is_null(&self, row: u32) -> bool {
        self.values[row as usize].is_nan()
    }

    pub fn null_bitmap(&self) -> &RoaringBitmap {
        &self.null_bitmap
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

//! Boolean column: three-valued (true / false / null) per row.

use roaring::RoaringBitmap;

use crate::bitmap::roaring_bytes;

/// A nullable boolean packed into one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum OptionalBool {
    False,
    True,
    Null,
}

impl OptionalBool {
    pub fn as_option(self) -> Option<bool> {
        match self {
            OptionalBool::False => Some(false),
            OptionalBool::True => Some(true),
            OptionalBool::Null => None,
        }
    }
}

impl From<bool> for OptionalBool {
    fn from(value: bool) -> Self {
        if value {
            OptionalBool::True
        } else {
            OptionalBool::False
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct BoolColumnPartition {
    values: Vec<OptionalBool>,
    #[serde(with = "roaring_bytes")]
    null_bitmap: RoaringBitmap,
}

impl BoolColumnPartition {
    pub fn new() -> Self {
        BoolColumnPartition::default()
    }

    pub fn reserve(&mut self, row_count: usize) {
        self.values.reserve(row_count);
    }

    pub fn insert(&mut self, value: bool) {
        self.values.push(OptionalBool::from(value));
    }

    pub fn insert_null(&mut self) {
        let row = self.values.len() as u32;
        self.values.push(OptionalBool::Null);
        self.null_bitmap.insert(row);
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn value(&self, row: u32) -> Option<bool> {
        self.values[row as usize].as_option()
    }

    pub fn is_null(&self, row: u32) -> bool {
        self.values[row as usize] == OptionalBool::Null
    }

    pub fn null_bitmap(&self) -> &RoaringBitmap {
        &self.null_bitmap
    }

    pub fn values(&self) -> &[OptionalBool] {
        &self.values
    }
}

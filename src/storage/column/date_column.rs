//! Date column: days-since-epoch `u32` per row, `0` = null.
//!
//! When a partition's rows arrive ordered by this column (common when the
//! build sorts by sampling date) the `is_sorted` flag is set at finalization
//! and range filters become binary searches producing contiguous row-id
//! ranges instead of scans.

use chrono::{Datelike, NaiveDate};
use roaring::RoaringBitmap;

use crate::bitmap::roaring_bytes;

/// Reserved day number for null dates.
pub const NULL_DAY: u32 = 0;

/// Days from the common era to 1970-01-01, chrono's `num_days_from_ce`
/// convention.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Day number for a date. `None` for dates at or before the epoch, which the
/// `u32`-with-null-sentinel representation cannot hold.
pub fn date_to_day(date: NaiveDate) -> Option<u32> {
    let day = date.num_days_from_ce() - EPOCH_DAYS_FROM_CE;
    if day >= 1 {
        Some(day as u32)
    } else {
        None
    }
}

/// Date for a stored day number. `None` for the null sentinel.
pub fn day_to_date(day: u32) -> Option<NaiveDate> {
    if day == NULL_DAY {
        return None;
    }
    NaiveDate::from_num_days_from_ce_opt(day as i32 + EPOCH_DAYS_FROM_CE)
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DateColumnPartition {
    values: Vec<u32>,
    #[serde(with = "roaring_bytes")]
    null_bitmap: RoaringBitmap,
    is_sorted: bool,
}

impl DateColumnPartition {
    pub fn new() -> Self {
        DateColumnPartition::default()
    }

    pub fn reserve(&mut self, row_count: usize) {
        self.values.reserve(row_count);
    }

    /// `day` must be a valid day number (≥ 1).
    pub fn insert(&mut self, day: u32) {
        debug_assert_ne!(day, NULL_DAY);
        self.values.push(day);
    }

    pub fn insert_null(&mut self) {
        let row = self.values.len() as u32;
        self.values.push(NULL_DAY);
        self.null_bitmap.insert(row);
    }

    /// Detect sortedness. A column with nulls is never marked sorted, since
    /// the sentinel would order nulls before every real date.
    pub fn finalize(&mut self) {
        self.is_sorted =
            self.null_bitmap.is_empty() && self.values.windows(2).all(|pair| pair[0] <= pair[1]);
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn is_sorted(&self) -> bool {
        self.is_sorted
    }

    pub fn value(&self, row: u32) -> Option<NaiveDate> {
        day_to_date(self.values[row as usize])
    }

    pub fn day(&self, row: u32) -> u32 {
        self.values[row as usize]
    }

    pub fn is_null(&self, row: u32) -> bool {
        self.values[row as usize] == NULL_DAY
    }

    /// Row-id range `[from_row, to_row)` holding day numbers within
    /// `[from_day, to_day]`. Only valid on sorted columns.
    pub fn sorted_range(&self, from_day: Option<u32>, to_day: Option<u32>) -> (u32, u32) {
        debug_assert!(self.is_sorted);
        let from_row = match from_day {
            Some(day) => self.values.partition_point(|&value| value < day),
            None => 0,
        };
        let to_row = match to_day {
            Some(day) => self.values.partition_point(|&value| value <= day),
            None => self.values.len(),
        };
        (from_row as u32, to_row.max(from_row) as u32)
    }

    pub fn null_bitmap(&self) -> &RoaringBitmap {
        &self.null_bitmap
    }

    pub fn days(&self) -> &[u32] {
        &self.values
    }
}

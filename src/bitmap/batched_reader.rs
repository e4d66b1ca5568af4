//! Batched iteration over a filter result bitmap.
//!
//! The action evaluator never materializes a whole partition's rows at once:
//! it pulls fixed-size batches of row ids from the filter bitmap and
//! materializes one record batch per pull. Row ids within and across batches
//! are strictly ascending.

use roaring::RoaringBitmap;

/// Pull-based reader yielding row-id batches of bounded size.
pub struct BatchedBitmapReader {
    iter: roaring::bitmap::IntoIter,
    remaining: u64,
    batch_size: usize,
}

impl BatchedBitmapReader {
    /// `batch_size` must be at least 1.
    pub fn new(bitmap: RoaringBitmap, batch_size: usize) -> Self {
        let remaining = bitmap.len();
        BatchedBitmapReader {
            iter: bitmap.into_iter(),
            remaining,
            batch_size: batch_size.max(1),
        }
    }

    /// Next batch of row ids in ascending order, or `None` when exhausted.
    pub fn next_batch(&mut self) -> Option<RoaringBitmap> {
        if self.remaining == 0 {
            return None;
        }
        let batch: RoaringBitmap = self.iter.by_ref().take(self.batch_size).collect();
        self.remaining = self.remaining.saturating_sub(batch.len());
        Some(batch)
    }

    /// Row ids not yet produced.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl Iterator for BatchedBitmapReader {
    type Item = RoaringBitmap;

    fn next(&mut self) -> Option<RoaringBitmap> {
        self.next_batch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batches_are_bounded_and_ascending() {
        let bitmap: RoaringBitmap = (0..10).collect();
        let mut reader = BatchedBitmapReader::new(bitmap, 4);

        let sizes: Vec<u64> = reader.by_ref().map(|batch| batch.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_batches_partition_the_bitmap() {
        let bitmap: RoaringBitmap = [3, 9, 17, 40_000, 70_001].iter().copied().collect();
        let reader = BatchedBitmapReader::new(bitmap.clone(), 2);

        let mut recombined = RoaringBitmap::new();
        let mut last_max = None;
        for batch in reader {
            let min = batch.min().expect("non-empty batch");
            if let Some(last) = last_max {
                assert!(min > last, "batches must not overlap");
            }
            last_max = batch.max();
            recombined |= batch;
        }
        assert_eq!(recombined, bitmap);
    }

    #[test]
    fn test_empty_bitmap_yields_no_batches() {
        let mut reader = BatchedBitmapReader::new(RoaringBitmap::new(), 8);
        assert!(reader.next_batch().is_none());
    }
}

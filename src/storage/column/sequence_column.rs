//! Sequence column: per-position vertical bitmap index plus horizontal
//! compressed storage.
//!
//! # Architecture
//!
//! ```text
//! SequenceStorePartition<A>
//!   |-- positions: Vec<PositionIndex>     one per reference position
//!   |     |-- slots[symbol] -> bitmap     rows holding that symbol
//!   |     `-- flipped symbol              slot omitted, rebuilt by complement
//!   |-- aligned: Vec<CompressedString>    per-row zstd frame, reference dict
//!   `-- unaligned: Vec<Option<..>>        raw input sequence, variable length
//! ```
//!
//! For every position the symbol bitmaps partition the row domain: each row
//! appears in exactly one slot. The slot with the largest bitmap (almost
//! always the reference symbol) is dropped at finalization and reconstructed
//! on demand as the complement of the union of the others, which is what
//! keeps the vertical index small on collections dominated by the reference.

use std::marker::PhantomData;

use roaring::RoaringBitmap;

use crate::alphabet::{Alphabet, SymbolMap};
use crate::bitmap::{complement_within, roaring_bytes_slots, union_many, CowBitmap};
use crate::compression::{CompressedString, DictCompressor, DictDecompressor};
use crate::error::PreprocessingError;
use crate::panic::engine_assert;

/// Vertical index slots for one position.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PositionIndex {
    #[serde(with = "roaring_bytes_slots")]
    slots: Vec<Option<RoaringBitmap>>,
    /// Index of the symbol whose slot was dropped at finalization.
    flipped: Option<u8>,
}

impl PositionIndex {
    fn stored(&self, symbol_index: usize) -> Option<&RoaringBitmap> {
        self.slots[symbol_index].as_ref()
    }
}

/// One partition's sequence data for a single sequence column.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(bound(serialize = "", deserialize = ""))]
pub struct SequenceStorePartition<A: Alphabet> {
    reference: String,
    positions: Vec<PositionIndex>,
    aligned: Vec<CompressedString>,
    unaligned: Vec<Option<CompressedString>>,
    _alphabet: PhantomData<A>,
}

impl<A: Alphabet> SequenceStorePartition<A> {
    pub fn row_count(&self) -> u32 {
        self.aligned.len() as u32
    }

    pub fn sequence_length(&self) -> usize {
        self.positions.len()
    }

    /// The reference genome this store was aligned against; also the zstd
    /// dictionary for its horizontal data.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Reference symbol at `position`.
    pub fn reference_symbol(&self, position: usize) -> A {
        let character = self.reference.as_bytes()[position] as char;
        match A::from_char(character) {
            Some(symbol) => symbol,
            None => crate::panic::invariant_violation(&format!(
                "reference holds illegal character '{character}' at position {position}"
            )),
        }
    }

    /// Stored bitmap for `(position, symbol)`; `None` when the symbol is the
    /// position's flipped symbol.
    pub fn stored_bitmap(&self, position: usize, symbol: A) -> Option<&RoaringBitmap> {
        self.positions[position].stored(symbol.index())
    }

    /// Whether `symbol` is the flipped symbol at `position`.
    pub fn is_flipped(&self, position: usize, symbol: A) -> bool {
        self.positions[position].flipped == Some(symbol.index() as u8)
    }

    /// Bitmap for `(position, symbol)`: a borrowed view of the stored slot,
    /// or the complement of the union of the other slots for the flipped
    /// symbol.
    pub fn symbol_bitmap(&self, position: usize, symbol: A) -> CowBitmap<'_> {
        match self.stored_bitmap(position, symbol) {
            Some(bitmap) => CowBitmap::Borrowed(bitmap),
            None => CowBitmap::Owned(self.reconstruct_flipped(position)),
        }
    }

    /// Rows holding the flipped symbol at `position`.
    pub fn reconstruct_flipped(&self, position: usize) -> RoaringBitmap {
        let others = union_many(
            self.positions[position]
                .slots
                .iter()
                .flatten()
                .map(CowBitmap::Borrowed)
                .collect(),
        );
        complement_within(others.as_bitmap(), self.row_count())
    }

    /// The symbol stored for `(row, position)`.
    pub fn symbol_at(&self, row: u32, position: usize) -> A {
        let index = &self.positions[position];
        for (slot, bitmap) in index.slots.iter().enumerate() {
            if let Some(bitmap) = bitmap {
                if bitmap.contains(row) {
                    return A::from_index(slot);
                }
            }
        }
        match index.flipped {
            Some(slot) => A::from_index(slot as usize),
            None => crate::panic::invariant_violation(&format!(
                "row {row} is covered by no symbol at position {position}"
            )),
        }
    }

    /// Decompress the aligned sequence of a row.
    pub fn aligned_sequence(
        &self,
        row: u32,
        decompressor: &mut DictDecompressor,
    ) -> std::io::Result<String> {
        decompressor.decompress_string(&self.aligned[row as usize])
    }

    /// Decompress the unaligned (raw input) sequence of a row, if one was
    /// provided at build time.
    pub fn unaligned_sequence(
        &self,
        row: u32,
        decompressor: &mut DictDecompressor,
    ) -> std::io::Result<Option<String>> {
        match &self.unaligned[row as usize] {
            Some(compressed) => decompressor.decompress_string(compressed).map(Some),
            None => Ok(None),
        }
    }

    /// Serialized size of all vertical-index bitmaps.
    pub fn vertical_index_bytes(&self) -> u64 {
        self.positions
            .iter()
            .flat_map(|position| position.slots.iter().flatten())
            .map(|bitmap| bitmap.serialized_size() as u64)
            .sum()
    }

    /// Bytes held by the horizontal (compressed sequence) store.
    pub fn horizontal_bytes(&self) -> u64 {
        let aligned: u64 = self.aligned.iter().map(|c| c.data.len() as u64).sum();
        let unaligned: u64 = self
            .unaligned
            .iter()
            .flatten()
            .map(|c| c.data.len() as u64)
            .sum();
        aligned + unaligned
    }
}

/// Streaming builder for a partition's sequence store.
pub struct SequenceStoreBuilder<A: Alphabet> {
    name: String,
    reference: String,
    reference_symbols: Vec<A>,
    accumulator: Vec<SymbolMap<A, RoaringBitmap>>,
    aligned: Vec<CompressedString>,
    unaligned: Vec<Option<CompressedString>>,
    compressor: DictCompressor,
}

impl<A: Alphabet> SequenceStoreBuilder<A> {
    pub fn new(name: &str, reference: &str) -> Result<Self, PreprocessingError> {
        if let Some(character) = A::find_illegal_char(reference) {
            return Err(PreprocessingError::IllegalSymbol {
                sequence: name.to_string(),
                character,
            });
        }
        let reference_symbols =
            A::parse_sequence(reference).unwrap_or_default();
        let accumulator = (0..reference_symbols.len())
            .map(|_| SymbolMap::default())
            .collect();
        Ok(SequenceStoreBuilder {
            name: name.to_string(),
            reference: reference.to_string(),
            reference_symbols,
            accumulator,
            aligned: Vec::new(),
            unaligned: Vec::new(),
            compressor: DictCompressor::new(reference.as_bytes())?,
        })
    }

    pub fn reserve(&mut self, row_count: usize) {
        self.aligned.reserve(row_count);
        self.unaligned.reserve(row_count);
    }

    /// Insert one row's aligned sequence (must have reference length) and
    /// optional unaligned raw sequence.
    pub fn insert(
        &mut self,
        aligned: &str,
        unaligned: Option<&str>,
    ) -> Result<(), PreprocessingError> {
        if aligned.len() != self.reference_symbols.len() {
            return Err(PreprocessingError::LengthMismatch {
                sequence: self.name.clone(),
                expected: self.reference_symbols.len(),
                got: aligned.len(),
            });
        }
        let row = self.aligned.len() as u32;
        for (position, character) in aligned.chars().enumerate() {
            let symbol =
                A::from_char(character).ok_or_else(|| PreprocessingError::IllegalSymbol {
                    sequence: self.name.clone(),
                    character,
                })?;
            self.accumulator[position].get_mut(symbol).insert(row);
        }
        self.aligned.push(self.compressor.compress(aligned.as_bytes())?);
        let unaligned = match unaligned {
            Some(raw) => Some(self.compressor.compress(raw.as_bytes())?),
            None => None,
        };
        self.unaligned.push(unaligned);
        Ok(())
    }

    /// Insert a row with no sequence data: every position reads as the
    /// alphabet's unknown symbol.
    pub fn insert_missing(&mut self) -> Result<(), PreprocessingError> {
        let filler: String = std::iter::repeat(A::MISSING.to_char())
            .take(self.reference_symbols.len())
            .collect();
        self.insert(&filler, None)
    }

    /// Freeze the store: pick each position's largest slot as the flipped
    /// symbol and drop its bitmap.
    pub fn finalize(self) -> SequenceStorePartition<A> {
        let row_count = self.aligned.len() as u64;
        let positions = self
            .accumulator
            .into_iter()
            .map(|symbol_bitmaps| {
                let slots = symbol_bitmaps.into_inner();
                let covered: u64 = slots.iter().map(RoaringBitmap::len).sum();
                engine_assert!(
                    covered == row_count,
                    "vertical index covers {covered} of {row_count} rows"
                );
                let flipped = slots
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, bitmap)| bitmap.len())
                    .map(|(index, _)| index as u8);
                let slots = slots
                    .into_iter()
                    .enumerate()
                    .map(|(index, bitmap)| {
                        if Some(index as u8) == flipped {
                            None
                        } else {
                            Some(bitmap)
                        }
                    })
                    .collect();
                PositionIndex { slots, flipped }
            })
            .collect();
        SequenceStorePartition {
            reference: self.reference,
            positions,
            aligned: self.aligned,
            unaligned: self.unaligned,
            _alphabet: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::Nucleotide;
    use crate::compression::DictDecompressor;

    fn build_store(rows: &[&str], reference: &str) -> SequenceStorePartition<Nucleotide> {
        let mut builder = SequenceStoreBuilder::new("main", reference).expect("builder");
        for row in rows {
            builder.insert(row, Some(row)).expect("insert");
        }
        builder.finalize()
    }

    #[test]
    fn test_symbol_bitmaps() {
        let store = build_store(&["ACG", "ATG", "CCT"], "ACG");

        let c_at_1: Vec<u32> = store
            .symbol_bitmap(1, Nucleotide::C)
            .as_bitmap()
            .iter()
            .collect();
        assert_eq!(c_at_1, vec![0, 2]);

        let g_at_2: Vec<u32> = store
            .symbol_bitmap(2, Nucleotide::G)
            .as_bitmap()
            .iter()
            .collect();
        assert_eq!(g_at_2, vec![0, 1]);
    }

    #[test]
    fn test_flipped_symbol_reconstruction() {
        let store = build_store(&["ACG", "ATG", "CCT"], "ACG");

        // A is the majority symbol at position 0 and therefore flipped.
        assert!(store.is_flipped(0, Nucleotide::A));
        assert!(store.stored_bitmap(0, Nucleotide::A).is_none());
        let a_at_0: Vec<u32> = store
            .symbol_bitmap(0, Nucleotide::A)
            .as_bitmap()
            .iter()
            .collect();
        assert_eq!(a_at_0, vec![0, 1]);
    }

    #[test]
    fn test_position_coverage_is_exact() {
        let store = build_store(&["ACG", "ATG", "CCT"], "ACG");
        for position in 0..store.sequence_length() {
            let mut total = RoaringBitmap::new();
            let mut covered = 0;
            for &symbol in Nucleotide::symbols() {
                let bitmap = store.symbol_bitmap(position, symbol).into_owned();
                covered += bitmap.len();
                total |= bitmap;
            }
            assert_eq!(covered, 3, "slots must be disjoint");
            assert_eq!(total.len(), 3, "slots must cover every row");
        }
    }

    #[test]
    fn test_symbol_at() {
        let store = build_store(&["ACG", "ATG", "CCT"], "ACG");
        assert_eq!(store.symbol_at(0, 0), Nucleotide::A);
        assert_eq!(store.symbol_at(1, 1), Nucleotide::T);
        assert_eq!(store.symbol_at(2, 2), Nucleotide::T);
    }

    #[test]
    fn test_horizontal_roundtrip() {
        let store = build_store(&["ACG", "ATG", "CCT"], "ACG");
        let mut decompressor =
            DictDecompressor::new(store.reference().as_bytes()).expect("decompressor");
        assert_eq!(
            store.aligned_sequence(1, &mut decompressor).expect("row"),
            "ATG"
        );
        assert_eq!(
            store
                .unaligned_sequence(2, &mut decompressor)
                .expect("row"),
            Some("CCT".to_string())
        );
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut builder: SequenceStoreBuilder<Nucleotide> =
            SequenceStoreBuilder::new("main", "ACG").expect("builder");
        let error = builder.insert("ACGT", None).expect_err("length mismatch");
        assert!(matches!(
            error,
            PreprocessingError::LengthMismatch { expected: 3, got: 4, .. }
        ));
    }

    #[test]
    fn test_illegal_symbol_rejected() {
        let mut builder: SequenceStoreBuilder<Nucleotide> =
            SequenceStoreBuilder::new("main", "ACG").expect("builder");
        let error = builder.insert("AJG", None).expect_err("illegal symbol");
        assert!(matches!(
            error,
            PreprocessingError::IllegalSymbol { character: 'J', .. }
        ));
    }

    #[test]
    fn test_missing_row_reads_as_unknown() {
        let mut builder: SequenceStoreBuilder<Nucleotide> =
            SequenceStoreBuilder::new("main", "ACG").expect("builder");
        builder.insert("ACG", None).expect("insert");
        builder.insert_missing().expect("missing");
        let store = builder.finalize();
        assert_eq!(store.symbol_at(1, 0), Nucleotide::N);
        assert_eq!(store.symbol_at(1, 2), Nucleotide::N);
    }
}

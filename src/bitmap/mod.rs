//! Bitmap primitive: compressed row-id sets with copy-on-write sharing.
//!
//! Row-id sets are `roaring::RoaringBitmap`s. Stored index bitmaps are shared
//! read-only with query evaluation through [`CowBitmap`]: an operator result
//! is either a borrowed view of a stored bitmap or an owned bitmap, and the
//! first mutating operation upgrades a borrow to a private copy.
//!
//! The helpers here implement the many-way set operations the operator tree
//! folds over:
//!
//! - [`union_many`]: accumulate into a single owned bitmap.
//! - [`intersect_many`]: fold ascending by cardinality, short-circuiting on
//!   the empty set.
//! - [`complement_within`]: complement against the partition's row domain.
//!
//! Bitmaps embedded in snapshot payloads serialize through roaring's portable
//! byte format (endian-independent); the `roaring_bytes*` modules adapt that
//! format to serde fields.

pub mod batched_reader;

pub use batched_reader::BatchedBitmapReader;

use roaring::RoaringBitmap;
use std::ops::Deref;

/// A bitmap handle that is either a read-only view of a stored index bitmap
/// or an owned result.
#[derive(Debug)]
pub enum CowBitmap<'a> {
    Borrowed(&'a RoaringBitmap),
    Owned(RoaringBitmap),
}

impl<'a> CowBitmap<'a> {
    /// An owned empty bitmap.
    pub fn empty() -> Self {
        CowBitmap::Owned(RoaringBitmap::new())
    }

    /// The full row domain `{0..row_count}`.
    pub fn full(row_count: u32) -> Self {
        CowBitmap::Owned(full_bitmap(row_count))
    }

    pub fn as_bitmap(&self) -> &RoaringBitmap {
        match self {
            CowBitmap::Borrowed(bitmap) => bitmap,
            CowBitmap::Owned(bitmap) => bitmap,
        }
    }

    /// Mutable access, cloning a borrowed bitmap on first use.
    pub fn to_mut(&mut self) -> &mut RoaringBitmap {
        if let CowBitmap::Borrowed(bitmap) = self {
            *self = CowBitmap::Owned((*bitmap).clone());
        }
        match self {
            CowBitmap::Owned(bitmap) => bitmap,
            CowBitmap::Borrowed(_) => unreachable!("upgraded above"),
        }
    }

    /// Take ownership, cloning only if borrowed.
    pub fn into_owned(self) -> RoaringBitmap {
        match self {
            CowBitmap::Borrowed(bitmap) => bitmap.clone(),
            CowBitmap::Owned(bitmap) => bitmap,
        }
    }

    pub fn cardinality(&self) -> u64 {
        self.as_bitmap().len()
    }
}

impl Deref for CowBitmap<'_> {
    type Target = RoaringBitmap;

    fn deref(&self) -> &RoaringBitmap {
        self.as_bitmap()
    }
}

impl From<RoaringBitmap> for CowBitmap<'_> {
    fn from(bitmap: RoaringBitmap) -> Self {
        CowBitmap::Owned(bitmap)
    }
}

impl<'a> From<&'a RoaringBitmap> for CowBitmap<'a> {
    fn from(bitmap: &'a RoaringBitmap) -> Self {
        CowBitmap::Borrowed(bitmap)
    }
}

/// The full row domain `{0..row_count}` as an owned bitmap.
pub fn full_bitmap(row_count: u32) -> RoaringBitmap {
    let mut bitmap = RoaringBitmap::new();
    bitmap.insert_range(0..row_count);
    bitmap
}

/// `{0..row_count} − bitmap`.
pub fn complement_within(bitmap: &RoaringBitmap, row_count: u32) -> RoaringBitmap {
    let mut result = full_bitmap(row_count);
    result -= bitmap;
    result
}

/// Union of all inputs. Returns the empty set for no inputs.
pub fn union_many<'a>(bitmaps: Vec<CowBitmap<'a>>) -> CowBitmap<'a> {
    let mut iter = bitmaps.into_iter();
    let Some(first) = iter.next() else {
        return CowBitmap::empty();
    };
    let mut result = first.into_owned();
    for bitmap in iter {
        result |= bitmap.as_bitmap();
    }
    CowBitmap::Owned(result)
}

/// Intersection of all inputs, folded smallest-first so the accumulator stays
/// small and an empty intermediate stops the fold. Returns the empty set for
/// no inputs.
pub fn intersect_many<'a>(mut bitmaps: Vec<CowBitmap<'a>>) -> CowBitmap<'a> {
    if bitmaps.is_empty() {
        return CowBitmap::empty();
    }
    bitmaps.sort_by_key(CowBitmap::cardinality);
    let mut iter = bitmaps.into_iter();
    let mut result = match iter.next() {
        Some(first) => first.into_owned(),
        None => return CowBitmap::empty(),
    };
    for bitmap in iter {
        if result.is_empty() {
            break;
        }
        result &= bitmap.as_bitmap();
    }
    CowBitmap::Owned(result)
}

/// Serde adapter: a `RoaringBitmap` field as portable bytes.
pub mod roaring_bytes {
    use roaring::RoaringBitmap;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bitmap: &RoaringBitmap,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&to_bytes(bitmap))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<RoaringBitmap, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        from_bytes(&bytes).map_err(D::Error::custom)
    }

    pub(crate) fn to_bytes(bitmap: &RoaringBitmap) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(bitmap.serialized_size());
        bitmap
            .serialize_into(&mut bytes)
            .expect("serializing into a Vec cannot fail");
        bytes
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> std::io::Result<RoaringBitmap> {
        RoaringBitmap::deserialize_from(bytes)
    }
}

/// Serde adapter: a `HashMap<K, RoaringBitmap>` field, entries sorted by key
/// for deterministic snapshots.
pub mod roaring_bytes_map {
    use roaring::RoaringBitmap;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::HashMap;
    use std::hash::Hash;

    pub fn serialize<K, S>(
        map: &HashMap<K, RoaringBitmap>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        K: Serialize + Ord + Copy,
        S: Serializer,
    {
        let mut entries: Vec<(K, Vec<u8>)> = map
            .iter()
            .map(|(key, bitmap)| (*key, super::roaring_bytes::to_bytes(bitmap)))
            .collect();
        entries.sort_by_key(|(key, _)| *key);
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, K, D>(deserializer: D) -> Result<HashMap<K, RoaringBitmap>, D::Error>
    where
        K: Deserialize<'de> + Eq + Hash,
        D: Deserializer<'de>,
    {
        let entries = Vec::<(K, Vec<u8>)>::deserialize(deserializer)?;
        entries
            .into_iter()
            .map(|(key, bytes)| {
                super::roaring_bytes::from_bytes(&bytes)
                    .map(|bitmap| (key, bitmap))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}

/// Serde adapter: a `Vec<Option<RoaringBitmap>>` field (vertical index slots;
/// the flipped slot is `None`).
pub mod roaring_bytes_slots {
    use roaring::RoaringBitmap;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        slots: &[Option<RoaringBitmap>],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let encoded: Vec<Option<Vec<u8>>> = slots
            .iter()
            .map(|slot| slot.as_ref().map(super::roaring_bytes::to_bytes))
            .collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Option<RoaringBitmap>>, D::Error> {
        let encoded = Vec::<Option<Vec<u8>>>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|slot| {
                slot.map(|bytes| super::roaring_bytes::from_bytes(&bytes).map_err(D::Error::custom))
                    .transpose()
            })
            .collect()
    }
}

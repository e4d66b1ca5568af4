//! The frozen, queryable database.
//!
//! A [`Database`] is produced once by the build phase (or loaded from a
//! snapshot) and never mutated afterwards: queries take `&Database` and the
//! only allocations on the read path are ephemeral copy-on-write bitmaps.
//!
//! Live reload goes through [`DatabaseHandle`]: a writer installs a new
//! `Arc<Database>` behind an `ArcSwap` while in-flight queries keep the
//! snapshot they loaded until they complete.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::storage::{DatabasePartition, DatabaseSchema, Dictionary, LineageTree};

/// Engine format/version tag carried by snapshots and reported by `info`.
pub const DATABASE_FORMAT_VERSION: &str = "1";

/// Reference genomes, one entry per sequence column.
///
/// The JSON shape (`nucleotide_sequences` / `aa_sequences` maps of name to
/// sequence string) is shared with the build inputs.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ReferenceGenomes {
    #[serde(default)]
    pub nucleotide_sequences: HashMap<String, String>,
    #[serde(default)]
    pub aa_sequences: HashMap<String, String>,
}

/// Summary statistics reported by the `info` surface.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DatabaseInfo {
    pub version: String,
    pub sequence_count: u64,
    pub partition_count: usize,
    pub vertical_index_bytes: u64,
    pub horizontal_bytes: u64,
}

/// An immutable, queryable collection of partitions plus the shared build
/// artifacts (dictionaries, lineage tree, reference genomes).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Database {
    pub(crate) schema: DatabaseSchema,
    pub(crate) dictionaries: HashMap<String, Dictionary>,
    pub(crate) lineage_tree: LineageTree,
    pub(crate) reference_genomes: ReferenceGenomes,
    pub(crate) partitions: Vec<DatabasePartition>,
}

impl Database {
    pub fn schema(&self) -> &DatabaseSchema {
        &self.schema
    }

    pub fn partitions(&self) -> &[DatabasePartition] {
        &self.partitions
    }

    pub fn lineage_tree(&self) -> &LineageTree {
        &self.lineage_tree
    }

    pub fn reference_genomes(&self) -> &ReferenceGenomes {
        &self.reference_genomes
    }

    /// Dictionary backing a string column.
    pub fn dictionary(&self, column: &str) -> Option<&Dictionary> {
        self.dictionaries.get(column)
    }

    /// Total rows across all partitions.
    pub fn row_count(&self) -> u64 {
        self.partitions
            .iter()
            .map(|partition| u64::from(partition.row_count()))
            .sum()
    }

    /// The nucleotide sequence name queries fall back to when they name
    /// none: the single declared sequence, if there is exactly one.
    pub fn default_nucleotide_sequence(&self) -> Option<&str> {
        let mut names = self.reference_genomes.nucleotide_sequences.keys();
        match (names.next(), names.next()) {
            (Some(name), None) => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn info(&self) -> DatabaseInfo {
        let mut vertical_index_bytes = 0;
        let mut horizontal_bytes = 0;
        for partition in &self.partitions {
            for store in partition.nucleotide_sequences.values() {
                vertical_index_bytes += store.vertical_index_bytes();
                horizontal_bytes += store.horizontal_bytes();
            }
            for store in partition.amino_acid_sequences.values() {
                vertical_index_bytes += store.vertical_index_bytes();
                horizontal_bytes += store.horizontal_bytes();
            }
        }
        DatabaseInfo {
            version: DATABASE_FORMAT_VERSION.to_string(),
            sequence_count: self.row_count(),
            partition_count: self.partitions.len(),
            vertical_index_bytes,
            horizontal_bytes,
        }
    }
}

/// Shared handle supporting atomic replacement of the served database.
///
/// Readers call [`DatabaseHandle::load`] and keep the returned `Arc` for the
/// duration of one query; a reload swaps the pointer without waiting for
/// them. The writer side is serialized by a latch so two concurrent reloads
/// cannot interleave.
pub struct DatabaseHandle {
    current: ArcSwap<Database>,
    swap_latch: Mutex<()>,
}

impl DatabaseHandle {
    pub fn new(database: Database) -> Self {
        DatabaseHandle {
            current: ArcSwap::from_pointee(database),
            swap_latch: Mutex::new(()),
        }
    }

    /// Snapshot for one query.
    pub fn load(&self) -> Arc<Database> {
        self.current.load_full()
    }

    /// Install a new database; returns the previous snapshot.
    pub fn swap(&self, database: Database) -> Arc<Database> {
        let _latch = self.swap_latch.lock();
        self.current.swap(Arc::new(database))
    }
}

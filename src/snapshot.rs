//! Snapshot persistence.
//!
//! A database serializes to a directory:
//!
//! ```text
//! <snapshot>/
//!   manifest.json            version tag, schema, partition count
//!   reference_genomes.json   reference sequences (input format, reusable)
//!   dictionaries.bin         string dictionaries
//!   lineage.bin              lineage tree
//!   partition_000.bin ...    per-partition columns and indices
//! ```
//!
//! Binary files are bincode payloads followed by a little-endian crc32 of
//! the payload; bitmap fields inside the payloads use roaring's portable
//! byte format, so snapshots move across endianness. The manifest's
//! `format_version` gates loading: a mismatch fails with
//! [`LoadDatabaseError::IncompatibleVersion`] instead of misreading data.

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::database::{Database, ReferenceGenomes, DATABASE_FORMAT_VERSION};
use crate::error::{LoadDatabaseError, PreprocessingError};
use crate::storage::{DatabasePartition, DatabaseSchema, Dictionary, LineageTree};

const MANIFEST_FILE: &str = "manifest.json";
const REFERENCE_GENOMES_FILE: &str = "reference_genomes.json";
const DICTIONARIES_FILE: &str = "dictionaries.bin";
const LINEAGE_FILE: &str = "lineage.bin";

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format_version: String,
    schema: DatabaseSchema,
    partition_count: usize,
}

fn partition_file(index: usize) -> String {
    format!("partition_{index:03}.bin")
}

fn write_checksummed(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    let checksum = hasher.finalize();
    let mut bytes = Vec::with_capacity(payload.len() + 4);
    bytes.extend_from_slice(payload);
    bytes.extend_from_slice(&checksum.to_le_bytes());
    fs::write(path, bytes)
}

fn read_checksummed(path: &Path) -> Result<Vec<u8>, LoadDatabaseError> {
    let mut bytes = Vec::new();
    fs::File::open(path)?.read_to_end(&mut bytes)?;
    if bytes.len() < 4 {
        return Err(LoadDatabaseError::Corrupt(format!(
            "{} is too short to carry a checksum",
            path.display()
        )));
    }
    let payload_len = bytes.len() - 4;
    let mut stored = [0u8; 4];
    stored.copy_from_slice(&bytes[payload_len..]);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&bytes[..payload_len]);
    if hasher.finalize() != u32::from_le_bytes(stored) {
        return Err(LoadDatabaseError::Corrupt(format!(
            "checksum mismatch in {}",
            path.display()
        )));
    }
    bytes.truncate(payload_len);
    Ok(bytes)
}

/// Serialize `database` into `directory`, creating it if needed.
pub fn save_database(database: &Database, directory: &Path) -> Result<(), PreprocessingError> {
    fs::create_dir_all(directory)?;

    let manifest = Manifest {
        format_version: DATABASE_FORMAT_VERSION.to_string(),
        schema: database.schema().clone(),
        partition_count: database.partitions().len(),
    };
    fs::write(
        directory.join(MANIFEST_FILE),
        serde_json::to_vec_pretty(&manifest)?,
    )?;
    fs::write(
        directory.join(REFERENCE_GENOMES_FILE),
        serde_json::to_vec_pretty(database.reference_genomes())?,
    )?;

    write_checksummed(
        &directory.join(DICTIONARIES_FILE),
        &bincode::serialize(&database.dictionaries)?,
    )?;
    write_checksummed(
        &directory.join(LINEAGE_FILE),
        &bincode::serialize(database.lineage_tree())?,
    )?;
    for (index, partition) in database.partitions().iter().enumerate() {
        write_checksummed(
            &directory.join(partition_file(index)),
            &bincode::serialize(partition)?,
        )?;
    }
    info!(
        directory = %directory.display(),
        partitions = database.partitions().len(),
        "snapshot_saved"
    );
    Ok(())
}

/// Load a database from a snapshot directory.
pub fn load_database(directory: &Path) -> Result<Database, LoadDatabaseError> {
    let manifest: Manifest =
        serde_json::from_slice(&fs::read(directory.join(MANIFEST_FILE))?)?;
    if manifest.format_version != DATABASE_FORMAT_VERSION {
        return Err(LoadDatabaseError::IncompatibleVersion {
            found: manifest.format_version,
            expected: DATABASE_FORMAT_VERSION.to_string(),
        });
    }

    let reference_genomes: ReferenceGenomes =
        serde_json::from_slice(&fs::read(directory.join(REFERENCE_GENOMES_FILE))?)?;
    let dictionaries: HashMap<String, Dictionary> =
        bincode::deserialize(&read_checksummed(&directory.join(DICTIONARIES_FILE))?)?;
    let lineage_tree: LineageTree =
        bincode::deserialize(&read_checksummed(&directory.join(LINEAGE_FILE))?)?;

    let mut partitions = Vec::with_capacity(manifest.partition_count);
    for index in 0..manifest.partition_count {
        let partition: DatabasePartition =
            bincode::deserialize(&read_checksummed(&directory.join(partition_file(index)))?)?;
        partitions.push(partition);
    }

    let database = Database {
        schema: manifest.schema,
        dictionaries,
        lineage_tree,
        reference_genomes,
        partitions,
    };
    info!(
        directory = %directory.display(),
        rows = database.row_count(),
        "snapshot_loaded"
    );
    Ok(database)
}

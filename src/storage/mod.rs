//! Columnar storage: schema, partitions, and typed columns.
//!
//! A database holds a list of [`DatabasePartition`]s over disjoint row
//! ranges. Row ids are `u32` and local to their partition; the executor tags
//! results with the partition index and resolves global identity (the primary
//! key) only at materialization.
//!
//! Everything here is frozen after the build phase: the query path takes
//! shared references only.

pub mod column;
pub mod dictionary;
pub mod lineage;

pub use dictionary::Dictionary;
pub use lineage::{LineageColumnPartition, LineageIdx, LineageTree};

use std::collections::HashMap;

use roaring::RoaringBitmap;

use crate::alphabet::{AminoAcid, Nucleotide};
use crate::error::PreprocessingError;
use crate::panic::engine_assert;
use column::{
    BoolColumnPartition, DateColumnPartition, FloatColumnPartition, IntColumnPartition,
    SequenceStorePartition, StringColumnPartition,
};

/// Declared type of a metadata column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Int,
    Float,
    Bool,
    Date,
    Lineage,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Bool => "bool",
            ColumnType::Date => "date",
            ColumnType::Lineage => "lineage",
        }
    }
}

/// One declared metadata column.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

/// Declared shape of the metadata side of a database.
///
/// Input rows with keys outside this schema are rejected at build time.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DatabaseSchema {
    /// Column holding the unique row identifier; must be a declared string
    /// column.
    #[serde(rename = "primaryKey")]
    pub primary_key: String,
    /// Optional string or lineage column whose value groups rows into
    /// partitions.
    #[serde(rename = "partitionBy", default)]
    pub partition_by: Option<String>,
    pub columns: Vec<ColumnDef>,
}

impl DatabaseSchema {
    /// Type of a declared column, or `None` for unknown names.
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|column| column.name == name)
            .map(|column| column.column_type)
    }

    /// Validate internal consistency (primary key declared as a string
    /// column, partition key declared, no duplicate names).
    pub fn validate(&self) -> Result<(), PreprocessingError> {
        let mut seen = std::collections::HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(PreprocessingError::InvalidSchema(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }
        match self.column_type(&self.primary_key) {
            Some(ColumnType::String) => {}
            Some(other) => {
                return Err(PreprocessingError::InvalidSchema(format!(
                    "primary key '{}' must be a string column, found {}",
                    self.primary_key,
                    other.as_str()
                )))
            }
            None => {
                return Err(PreprocessingError::InvalidSchema(format!(
                    "primary key '{}' is not a declared column",
                    self.primary_key
                )))
            }
        }
        if let Some(partition_by) = &self.partition_by {
            match self.column_type(partition_by) {
                Some(ColumnType::String | ColumnType::Lineage) => {}
                Some(other) => {
                    return Err(PreprocessingError::InvalidSchema(format!(
                        "partition key '{partition_by}' must be a string or lineage column, \
                         found {}",
                        other.as_str()
                    )))
                }
                None => {
                    return Err(PreprocessingError::InvalidSchema(format!(
                        "partition key '{partition_by}' is not a declared column"
                    )))
                }
            }
        }
        Ok(())
    }
}

/// One partition's columns and indices.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DatabasePartition {
    pub(crate) row_count: u32,
    pub(crate) string_columns: HashMap<String, StringColumnPartition>,
    pub(crate) int_columns: HashMap<String, IntColumnPartition>,
    pub(crate) float_columns: HashMap<String, FloatColumnPartition>,
    pub(crate) bool_columns: HashMap<String, BoolColumnPartition>,
    pub(crate) date_columns: HashMap<String, DateColumnPartition>,
    pub(crate) lineage_columns: HashMap<String, LineageColumnPartition>,
    pub(crate) nucleotide_sequences: HashMap<String, SequenceStorePartition<Nucleotide>>,
    pub(crate) amino_acid_sequences: HashMap<String, SequenceStorePartition<AminoAcid>>,
}

impl DatabasePartition {
    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    pub fn string_column(&self, name: &str) -> Option<&StringColumnPartition> {
        self.string_columns.get(name)
    }

    pub fn int_column(&self, name: &str) -> Option<&IntColumnPartition> {
        self.int_columns.get(name)
    }

    pub fn float_column(&self, name: &str) -> Option<&FloatColumnPartition> {
        self.float_columns.get(name)
    }

    pub fn bool_column(&self, name: &str) -> Option<&BoolColumnPartition> {
        self.bool_columns.get(name)
    }

    pub fn date_column(&self, name: &str) -> Option<&DateColumnPartition> {
        self.date_columns.get(name)
    }

    pub fn lineage_column(&self, name: &str) -> Option<&LineageColumnPartition> {
        self.lineage_columns.get(name)
    }

    pub fn nucleotide_sequence(&self, name: &str) -> Option<&SequenceStorePartition<Nucleotide>> {
        self.nucleotide_sequences.get(name)
    }

    pub fn amino_acid_sequence(&self, name: &str) -> Option<&SequenceStorePartition<AminoAcid>> {
        self.amino_acid_sequences.get(name)
    }

    /// Null bitmap of a metadata column, whatever its type.
    pub fn null_bitmap(&self, name: &str) -> Option<&RoaringBitmap> {
        if let Some(column) = self.string_columns.get(name) {
            return Some(column.null_bitmap());
        }
        if let Some(column) = self.int_columns.get(name) {
            return Some(column.null_bitmap());
        }
        if let Some(column) = self.float_columns.get(name) {
            return Some(column.null_bitmap());
        }
        if let Some(column) = self.bool_columns.get(name) {
            return Some(column.null_bitmap());
        }
        if let Some(column) = self.date_columns.get(name) {
            return Some(column.null_bitmap());
        }
        if let Some(column) = self.lineage_columns.get(name) {
            return Some(column.null_bitmap());
        }
        None
    }

    /// Check that every column agrees with the partition's row count.
    /// Called once when the partition is frozen.
    pub(crate) fn assert_consistent(&self) {
        let expected = self.row_count as usize;
        for (name, column) in &self.string_columns {
            engine_assert!(
                column.num_values() == expected,
                "string column '{name}' has {} rows, partition has {expected}",
                column.num_values()
            );
        }
        for (name, column) in &self.int_columns {
            engine_assert!(
                column.num_values() == expected,
                "int column '{name}' has {} rows, partition has {expected}",
                column.num_values()
            );
        }
        for (name, column) in &self.float_columns {
            engine_assert!(
                column.num_values() == expected,
                "float column '{name}' has {} rows, partition has {expected}",
                column.num_values()
            );
        }
        for (name, column) in &self.bool_columns {
            engine_assert!(
                column.num_values() == expected,
                "bool column '{name}' has {} rows, partition has {expected}",
                column.num_values()
            );
        }
        for (name, column) in &self.date_columns {
            engine_assert!(
                column.num_values() == expected,
                "date column '{name}' has {} rows, partition has {expected}",
                column.num_values()
            );
        }
        for (name, column) in &self.lineage_columns {
            engine_assert!(
                column.num_values() == expected,
                "lineage column '{name}' has {} rows, partition has {expected}",
                column.num_values()
            );
        }
        for (name, store) in &self.nucleotide_sequences {
            engine_assert!(
                store.row_count() as usize == expected,
                "nucleotide store '{name}' has {} rows, partition has {expected}",
                store.row_count()
            );
        }
        for (name, store) in &self.amino_acid_sequences {
            engine_assert!(
                store.row_count() as usize == expected,
                "amino-acid store '{name}' has {} rows, partition has {expected}",
                store.row_count()
            );
        }
    }
}

//! Build phase: turn structured input records into a frozen [`Database`].
//!
//! File parsing (FASTA, TSV, NDJSON framing) lives outside the engine; the
//! builder consumes already-structured [`RowInput`] records. The build is
//! one-shot:
//!
//! 1. rows are validated and converted as they arrive (`add_row`);
//! 2. `build()` interns all string values into shared dictionaries,
//! 3. groups rows into partitions (by the declared partition key, or by
//!    capacity chunks), sorting each partition by its date column so range
//!    filters can use binary search,
//! 4. builds all column partitions and indices in parallel, and
//! 5. freezes the result. Any error aborts the build; no partial database
//!    is ever published.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::alphabet::{AminoAcid, Nucleotide};
use crate::config::BuildConfig;
use crate::database::{Database, ReferenceGenomes};
use crate::error::PreprocessingError;
use crate::storage::column::{
    date_to_day, BoolColumnPartition, DateColumnPartition, FloatColumnPartition,
    IntColumnPartition, SequenceStoreBuilder, StringColumnPartition,
};
use crate::storage::lineage::LineageIdx;
use crate::storage::{
    ColumnType, DatabasePartition, DatabaseSchema, Dictionary, LineageColumnPartition, LineageTree,
};

/// An untyped metadata value as it arrives in input records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl MetadataValue {
    fn type_name(&self) -> &'static str {
        match self {
            MetadataValue::Null => "null",
            MetadataValue::Bool(_) => "bool",
            MetadataValue::Int(_) => "int",
            MetadataValue::Float(_) => "float",
            MetadataValue::String(_) => "string",
        }
    }
}

/// One input record: metadata plus per-name sequences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowInput {
    #[serde(default)]
    pub metadata: HashMap<String, MetadataValue>,
    #[serde(rename = "alignedNucleotideSequences", default)]
    pub aligned_nucleotide_sequences: HashMap<String, Option<String>>,
    #[serde(rename = "unalignedNucleotideSequences", default)]
    pub unaligned_nucleotide_sequences: HashMap<String, Option<String>>,
    #[serde(rename = "alignedAminoAcidSequences", default)]
    pub aligned_amino_acid_sequences: HashMap<String, Option<String>>,
}

/// A validated, typed row awaiting partition assignment.
#[derive(Debug, Clone)]
struct PreparedRow {
    primary_key: String,
    partition_key: Option<String>,
    sort_day: Option<u32>,
    metadata: HashMap<String, PreparedValue>,
    nucleotide: HashMap<String, (Option<String>, Option<String>)>,
    amino_acid: HashMap<String, Option<String>>,
}

#[derive(Debug, Clone)]
enum PreparedValue {
    Null,
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(u32),
    Lineage(LineageIdx),
}

/// One-shot builder producing a frozen [`Database`].
pub struct DatabaseBuilder {
    schema: DatabaseSchema,
    reference_genomes: ReferenceGenomes,
    lineage_tree: LineageTree,
    config: BuildConfig,
    rows: Vec<PreparedRow>,
    seen_primary_keys: HashSet<String>,
    sort_column: Option<String>,
}

impl DatabaseBuilder {
    pub fn new(
        schema: DatabaseSchema,
        reference_genomes: ReferenceGenomes,
        lineage_tree: LineageTree,
        config: BuildConfig,
    ) -> Result<Self, PreprocessingError> {
        schema.validate()?;
        // The first declared date column orders rows within a partition.
        let sort_column = schema
            .columns
            .iter()
            .find(|column| column.column_type == ColumnType::Date)
            .map(|column| column.name.clone());
        Ok(DatabaseBuilder {
            schema,
            reference_genomes,
            lineage_tree,
            config,
            rows: Vec::new(),
            seen_primary_keys: HashSet::new(),
            sort_column,
        })
    }

    /// Validate and stage one input record.
    pub fn add_row(&mut self, row: RowInput) -> Result<(), PreprocessingError> {
        let row_index = self.rows.len();

        for name in row.metadata.keys() {
            if self.schema.column_type(name).is_none() {
                return Err(PreprocessingError::UnknownColumn(name.clone()));
            }
        }
        for name in row
            .aligned_nucleotide_sequences
            .keys()
            .chain(row.unaligned_nucleotide_sequences.keys())
        {
            if !self
                .reference_genomes
                .nucleotide_sequences
                .contains_key(name)
            {
                return Err(PreprocessingError::UnknownSequence(name.clone()));
            }
        }
        for name in row.aligned_amino_acid_sequences.keys() {
            if !self.reference_genomes.aa_sequences.contains_key(name) {
                return Err(PreprocessingError::UnknownSequence(name.clone()));
            }
        }

        let mut metadata = HashMap::with_capacity(self.schema.columns.len());
        for column in &self.schema.columns {
            let raw = row.metadata.get(&column.name);
            let prepared = self.prepare_value(&column.name, column.column_type, raw)?;
            metadata.insert(column.name.clone(), prepared);
        }

        let primary_key = match metadata.get(&self.schema.primary_key) {
            Some(PreparedValue::String(value)) => value.clone(),
            _ => return Err(PreprocessingError::MissingPrimaryKey { row: row_index }),
        };
        if !self.seen_primary_keys.insert(primary_key.clone()) {
            return Err(PreprocessingError::DuplicatePrimaryKey(primary_key));
        }

        let partition_key = match &self.schema.partition_by {
            Some(column) => match metadata.get(column) {
                Some(PreparedValue::String(value)) => Some(value.clone()),
                Some(PreparedValue::Lineage(idx)) => {
                    Some(self.lineage_tree.name(*idx).to_string())
                }
                _ => None,
            },
            None => None,
        };
        let sort_day = self.sort_column.as_ref().and_then(|column| {
            match metadata.get(column) {
                Some(PreparedValue::Date(day)) => Some(*day),
                _ => None,
            }
        });

        let nucleotide = self
            .reference_genomes
            .nucleotide_sequences
            .keys()
            .map(|name| {
                let aligned = row
                    .aligned_nucleotide_sequences
                    .get(name)
                    .cloned()
                    .flatten();
                let unaligned = row
                    .unaligned_nucleotide_sequences
                    .get(name)
                    .cloned()
                    .flatten();
                (name.clone(), (aligned, unaligned))
            })
            .collect();
        let amino_acid = self
            .reference_genomes
            .aa_sequences
            .keys()
            .map(|name| {
                let aligned = row.aligned_amino_acid_sequences.get(name).cloned().flatten();
                (name.clone(), aligned)
            })
            .collect();

        self.rows.push(PreparedRow {
            primary_key,
            partition_key,
            sort_day,
            metadata,
            nucleotide,
            amino_acid,
        });
        Ok(())
    }

    fn prepare_value(
        &self,
        column: &str,
        column_type: ColumnType,
        raw: Option<&MetadataValue>,
    ) -> Result<PreparedValue, PreprocessingError> {
        let Some(raw) = raw else {
            return Ok(PreparedValue::Null);
        };
        let mismatch = |got: &MetadataValue| PreprocessingError::TypeMismatch {
            column: column.to_string(),
            expected: column_type.as_str().to_string(),
            got: got.type_name().to_string(),
        };
        Ok(match (column_type, raw) {
            (_, MetadataValue::Null) => PreparedValue::Null,
            (ColumnType::String, MetadataValue::String(value)) => {
                PreparedValue::String(value.clone())
            }
            (ColumnType::Int, MetadataValue::Int(value)) => PreparedValue::Int(*value),
            (ColumnType::Float, MetadataValue::Float(value)) => PreparedValue::Float(*value),
            (ColumnType::Float, MetadataValue::Int(value)) => PreparedValue::Float(*value as f64),
            (ColumnType::Bool, MetadataValue::Bool(value)) => PreparedValue::Bool(*value),
            (ColumnType::Date, MetadataValue::String(value)) => {
                let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
                    PreprocessingError::InvalidDate {
                        column: column.to_string(),
                        value: value.clone(),
                    }
                })?;
                let day = date_to_day(date).ok_or_else(|| PreprocessingError::InvalidDate {
                    column: column.to_string(),
                    value: value.clone(),
                })?;
                PreparedValue::Date(day)
            }
            (ColumnType::Lineage, MetadataValue::String(value)) => {
                let idx = self
                    .lineage_tree
                    .lookup(value)
                    .ok_or_else(|| PreprocessingError::UnknownLineage(value.clone()))?;
                PreparedValue::Lineage(idx)
            }
            (_, other) => return Err(mismatch(other)),
        })
    }

    /// Freeze the staged rows into a queryable database.
    pub fn build(self) -> Result<Database, PreprocessingError> {
        let DatabaseBuilder {
            schema,
            reference_genomes,
            lineage_tree,
            config,
            rows,
            seen_primary_keys: _,
            sort_column: _,
        } = self;

        // Shared dictionaries: ids assigned in row order, before partition
        // builds so every partition sees the same mapping.
        let mut dictionaries: HashMap<String, Dictionary> = schema
            .columns
            .iter()
            .filter(|column| column.column_type == ColumnType::String)
            .map(|column| (column.name.clone(), Dictionary::new()))
            .collect();
        for row in &rows {
            for column in &schema.columns {
                if let Some(PreparedValue::String(value)) = row.metadata.get(&column.name) {
                    if let Some(dictionary) = dictionaries.get_mut(&column.name) {
                        dictionary.lookup_or_insert(value);
                    }
                }
            }
        }

        let groups = group_rows(rows, schema.partition_by.is_some(), config.partition_capacity);
        let partitions: Vec<DatabasePartition> = groups
            .into_par_iter()
            .map(|group| {
                build_partition(
                    &schema,
                    &dictionaries,
                    &lineage_tree,
                    &reference_genomes,
                    &config,
                    group,
                )
            })
            .collect::<Result<_, _>>()?;

        let database = Database {
            schema,
            dictionaries,
            lineage_tree,
            reference_genomes,
            partitions,
        };
        info!(
            rows = database.row_count(),
            partitions = database.partitions().len(),
            "database_built"
        );
        Ok(database)
    }
}

/// Group rows into partitions: by partition key when declared, otherwise by
/// capacity chunks. Each group is sorted by the date column so sorted-range
/// filtering applies.
fn group_rows(
    rows: Vec<PreparedRow>,
    by_key: bool,
    partition_capacity: u32,
) -> Vec<Vec<PreparedRow>> {
    let mut groups: Vec<Vec<PreparedRow>> = if by_key {
        let mut keyed: BTreeMap<Option<String>, Vec<PreparedRow>> = BTreeMap::new();
        for row in rows {
            keyed.entry(row.partition_key.clone()).or_default().push(row);
        }
        keyed.into_values().collect()
    } else {
        let capacity = partition_capacity.max(1) as usize;
        let mut chunks = Vec::new();
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            chunks.push(rows.by_ref().take(capacity).collect());
        }
        chunks
    };
    for group in &mut groups {
        group.sort_by_key(|row| row.sort_day.unwrap_or(0));
    }
    groups
}

fn build_partition(
    schema: &DatabaseSchema,
    dictionaries: &HashMap<String, Dictionary>,
    lineage_tree: &LineageTree,
    reference_genomes: &ReferenceGenomes,
    config: &BuildConfig,
    rows: Vec<PreparedRow>,
) -> Result<DatabasePartition, PreprocessingError> {
    let row_count =
        u32::try_from(rows.len()).map_err(|_| PreprocessingError::RowCountOverflow)?;

    let mut partition = DatabasePartition {
        row_count,
        ..DatabasePartition::default()
    };
    for column in &schema.columns {
        match column.column_type {
            ColumnType::String => {
                let mut built = StringColumnPartition::new();
                built.reserve(rows.len());
                partition.string_columns.insert(column.name.clone(), built);
            }
            ColumnType::Int => {
                let mut built = IntColumnPartition::new();
                built.reserve(rows.len());
                partition.int_columns.insert(column.name.clone(), built);
            }
            ColumnType::Float => {
                let mut built = FloatColumnPartition::new();
                built.reserve(rows.len());
                partition.float_columns.insert(column.name.clone(), built);
            }
            ColumnType::Bool => {
                let mut built = BoolColumnPartition::new();
                built.reserve(rows.len());
                partition.bool_columns.insert(column.name.clone(), built);
            }
            ColumnType::Date => {
                let mut built = DateColumnPartition::new();
                built.reserve(rows.len());
                partition.date_columns.insert(column.name.clone(), built);
            }
            ColumnType::Lineage => {
                let mut built = LineageColumnPartition::new();
                built.reserve(rows.len());
                partition.lineage_columns.insert(column.name.clone(), built);
            }
        }
    }

    let mut nucleotide_builders: HashMap<String, SequenceStoreBuilder<Nucleotide>> =
        HashMap::new();
    for (name, reference) in &reference_genomes.nucleotide_sequences {
        let mut builder = SequenceStoreBuilder::new(name, reference)?;
        builder.reserve(rows.len());
        nucleotide_builders.insert(name.clone(), builder);
    }
    let mut amino_acid_builders: HashMap<String, SequenceStoreBuilder<AminoAcid>> =
        HashMap::new();
    for (name, reference) in &reference_genomes.aa_sequences {
        let mut builder = SequenceStoreBuilder::new(name, reference)?;
        builder.reserve(rows.len());
        amino_acid_builders.insert(name.clone(), builder);
    }

    for row in &rows {
        for column in &schema.columns {
            let value = row.metadata.get(&column.name).unwrap_or(&PreparedValue::Null);
            match (column.column_type, value) {
                (ColumnType::String, PreparedValue::String(text)) => {
                    let id = dictionaries
                        .get(&column.name)
                        .and_then(|dictionary| dictionary.lookup(text))
                        .ok_or_else(|| {
                            PreprocessingError::InvalidSchema(format!(
                                "value of column '{}' missing from its dictionary",
                                column.name
                            ))
                        })?;
                    if let Some(built) = partition.string_columns.get_mut(&column.name) {
                        built.insert(id);
                    }
                }
                (ColumnType::String, _) => {
                    if let Some(built) = partition.string_columns.get_mut(&column.name) {
                        built.insert_null();
                    }
                }
                (ColumnType::Int, PreparedValue::Int(value)) => {
                    if let Some(built) = partition.int_columns.get_mut(&column.name) {
                        built.insert(*value);
                    }
                }
                (ColumnType::Int, _) => {
                    if let Some(built) = partition.int_columns.get_mut(&column.name) {
                        built.insert_null();
                    }
                }
                (ColumnType::Float, PreparedValue::Float(value)) => {
                    if let Some(built) = partition.float_columns.get_mut(&column.name) {
                        built.insert(*value);
                    }
                }
                (ColumnType::Float, _) => {
                    if let Some(built) = partition.float_columns.get_mut(&column.name) {
                        built.insert_null();
                    }
                }
                (ColumnType::Bool, PreparedValue::Bool(value)) => {
                    if let Some(built) = partition.bool_columns.get_mut(&column.name) {
                        built.insert(*value);
                    }
                }
                (ColumnType::Bool, _) => {
                    if let Some(built) = partition.bool_columns.get_mut(&column.name) {
                        built.insert_null();
                    }
                }
                (ColumnType::Date, PreparedValue::Date(day)) => {
                    if let Some(built) = partition.date_columns.get_mut(&column.name) {
                        built.insert(*day);
                    }
                }
                (ColumnType::Date, _) => {
                    if let Some(built) = partition.date_columns.get_mut(&column.name) {
                        built.insert_null();
                    }
                }
                (ColumnType::Lineage, PreparedValue::Lineage(idx)) => {
                    if let Some(built) = partition.lineage_columns.get_mut(&column.name) {
                        built.insert(*idx, lineage_tree);
                    }
                }
                (ColumnType::Lineage, _) => {
                    if let Some(built) = partition.lineage_columns.get_mut(&column.name) {
                        built.insert_null();
                    }
                }
            }
        }

        for (name, builder) in &mut nucleotide_builders {
            match row.nucleotide.get(name) {
                Some((Some(aligned), unaligned)) => {
                    builder.insert(aligned, unaligned.as_deref())?;
                }
                _ => builder.insert_missing()?,
            }
        }
        for (name, builder) in &mut amino_acid_builders {
            match row.amino_acid.get(name) {
                Some(Some(aligned)) => builder.insert(aligned, None)?,
                _ => builder.insert_missing()?,
            }
        }
    }

    for column in partition.int_columns.values_mut() {
        column.finalize(config.equi_index_max_cardinality);
    }
    for column in partition.date_columns.values_mut() {
        column.finalize();
    }
    for (name, builder) in nucleotide_builders {
        partition.nucleotide_sequences.insert(name, builder.finalize());
    }
    for (name, builder) in amino_acid_builders {
        partition.amino_acid_sequences.insert(name, builder.finalize());
    }

    partition.assert_consistent();
    Ok(partition)
}

//! Actions: the final consumers of a filter bitmap.
//!
//! An action turns batches of row ids into output: a count, aggregated group
//! counts, projected metadata rows, or materialized sequences. Per-partition
//! producers materialize one record batch per row-id batch; sinks
//! (NDJSON writer, FASTA writer, in-memory collector) consume them.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::io::Write;

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::alphabet::{AminoAcid, Nucleotide};
use crate::compression::DictDecompressor;
use crate::database::Database;
use crate::error::QueryError;
use crate::storage::column::{day_to_date, SequenceStorePartition};
use crate::storage::{ColumnType, DatabasePartition};

/// What to do with the rows selected by the filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    /// Number of matching rows.
    Count,
    /// Per-group row counts. An empty `groupByFields` yields one global
    /// group.
    #[serde(alias = "Aggregated")]
    Aggregate {
        #[serde(rename = "groupByFields", default)]
        group_by_fields: Vec<String>,
    },
    /// Project metadata columns and stream rows.
    Details {
        #[serde(default)]
        fields: Vec<String>,
        #[serde(rename = "orderByFields", default)]
        order_by_fields: Vec<String>,
        #[serde(default)]
        limit: Option<u32>,
        #[serde(default)]
        offset: Option<u32>,
    },
    /// Materialize unaligned (input) sequences.
    Fasta {
        #[serde(rename = "sequenceNames", default)]
        sequence_names: Vec<String>,
    },
    /// Materialize aligned sequences.
    FastaAligned {
        #[serde(rename = "sequenceNames", default)]
        sequence_names: Vec<String>,
    },
}

/// One output record as a JSON object.
pub type OutputRow = serde_json::Map<String, serde_json::Value>;

/// In-memory result of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Count { count: u64 },
    Rows(Vec<OutputRow>),
}

impl QueryOutput {
    pub fn count(&self) -> Option<u64> {
        match self {
            QueryOutput::Count { count } => Some(*count),
            QueryOutput::Rows(_) => None,
        }
    }

    pub fn rows(&self) -> Option<&[OutputRow]> {
        match self {
            QueryOutput::Count { .. } => None,
            QueryOutput::Rows(rows) => Some(rows),
        }
    }
}

/// A float usable as a grouping/ordering key. Null floats never reach keys
/// (they map to [`Key::Null`]), so NaN handling reduces to total ordering.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FloatKey(pub f64);

impl PartialEq for FloatKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0).is_eq()
    }
}

impl Eq for FloatKey {}

impl PartialOrd for FloatKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for FloatKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.to_bits());
    }
}

/// A typed column value usable as a grouping or ordering key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum Key {
    Null,
    Bool(bool),
    Int(i64),
    Float(FloatKey),
    Date(u32),
    String(String),
}

impl Key {
    pub(crate) fn to_json(&self) -> serde_json::Value {
        match self {
            Key::Null => serde_json::Value::Null,
            Key::Bool(value) => serde_json::Value::Bool(*value),
            Key::Int(value) => serde_json::Value::from(*value),
            Key::Float(value) => serde_json::Number::from_f64(value.0)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Key::Date(day) => match day_to_date(*day) {
                Some(date) => serde_json::Value::String(date.format("%Y-%m-%d").to_string()),
                None => serde_json::Value::Null,
            },
            Key::String(value) => serde_json::Value::String(value.clone()),
        }
    }
}

/// A projected field with its resolved type.
pub(crate) type ResolvedField = (String, ColumnType);

/// Resolve field names against the schema; unknown names are bad requests.
pub(crate) fn resolve_fields(
    database: &Database,
    fields: &[String],
) -> Result<Vec<ResolvedField>, QueryError> {
    fields
        .iter()
        .map(|name| {
            database
                .schema()
                .column_type(name)
                .map(|column_type| (name.clone(), column_type))
                .ok_or_else(|| QueryError::BadRequest(format!("unknown column: '{name}'")))
        })
        .collect()
}

/// All declared columns, in schema order. The default projection.
pub(crate) fn all_fields(database: &Database) -> Vec<ResolvedField> {
    database
        .schema()
        .columns
        .iter()
        .map(|column| (column.name.clone(), column.column_type))
        .collect()
}

/// Typed key of one `(row, column)` cell.
pub(crate) fn key_for(
    database: &Database,
    partition: &DatabasePartition,
    field: &ResolvedField,
    row: u32,
) -> Key {
    let (name, column_type) = field;
    match column_type {
        ColumnType::String => {
            let id = partition
                .string_column(name)
                .map_or(0, |column| column.value_id(row));
            match database.dictionary(name).and_then(|d| d.value(id)) {
                Some(value) => Key::String(value.to_string()),
                None => Key::Null,
            }
        }
        ColumnType::Int => partition
            .int_column(name)
            .and_then(|column| column.value(row))
            .map_or(Key::Null, Key::Int),
        ColumnType::Float => partition
            .float_column(name)
            .and_then(|column| column.value(row))
            .map_or(Key::Null, |value| Key::Float(FloatKey(value))),
        ColumnType::Bool => partition
            .bool_column(name)
            .and_then(|column| column.value(row))
            .map_or(Key::Null, Key::Bool),
        ColumnType::Date => partition
            .date_column(name)
            .map_or(Key::Null, |column| match column.day(row) {
                0 => Key::Null,
                day => Key::Date(day),
            }),
        ColumnType::Lineage => {
            let idx = partition
                .lineage_column(name)
                .and_then(|column| column.lineage_idx(row));
            match idx {
                Some(idx) => Key::String(database.lineage_tree().name(idx).to_string()),
                None => Key::Null,
            }
        }
    }
}

/// Materialize one batch of rows into projected records.
pub(crate) fn materialize_details(
    database: &Database,
    partition: &DatabasePartition,
    fields: &[ResolvedField],
    batch: &RoaringBitmap,
) -> Vec<OutputRow> {
    batch
        .iter()
        .map(|row| {
            let mut record = OutputRow::new();
            for field in fields {
                record.insert(
                    field.0.clone(),
                    key_for(database, partition, field, row).to_json(),
                );
            }
            record
        })
        .collect()
}

/// A sequence store of either alphabet, by name.
pub(crate) enum StoreRef<'p> {
    Nucleotide(&'p SequenceStorePartition<Nucleotide>),
    AminoAcid(&'p SequenceStorePartition<AminoAcid>),
}

impl<'p> StoreRef<'p> {
    fn reference(&self) -> &'p str {
        match self {
            StoreRef::Nucleotide(store) => store.reference(),
            StoreRef::AminoAcid(store) => store.reference(),
        }
    }

    fn aligned(&self, row: u32, decompressor: &mut DictDecompressor) -> std::io::Result<String> {
        match self {
            StoreRef::Nucleotide(store) => store.aligned_sequence(row, decompressor),
            StoreRef::AminoAcid(store) => store.aligned_sequence(row, decompressor),
        }
    }

    fn unaligned(
        &self,
        row: u32,
        decompressor: &mut DictDecompressor,
    ) -> std::io::Result<Option<String>> {
        match self {
            StoreRef::Nucleotide(store) => store.unaligned_sequence(row, decompressor),
            StoreRef::AminoAcid(store) => store.unaligned_sequence(row, decompressor),
        }
    }
}

/// Per-partition sequence materializer: one decompression context per store.
pub(crate) struct SequenceMaterializer<'p> {
    primary_key: ResolvedField,
    stores: Vec<(String, StoreRef<'p>, DictDecompressor)>,
    aligned: bool,
}

impl<'p> SequenceMaterializer<'p> {
    pub(crate) fn new(
        database: &'p Database,
        partition: &'p DatabasePartition,
        sequence_names: &[String],
        aligned: bool,
    ) -> Result<Self, QueryError> {
        let mut names: Vec<String> = sequence_names.to_vec();
        if names.is_empty() {
            let default = database.default_nucleotide_sequence().ok_or_else(|| {
                QueryError::BadRequest(
                    "no sequenceNames given and no unique default nucleotide sequence".to_string(),
                )
            })?;
            names.push(default.to_string());
        }
        let mut stores = Vec::with_capacity(names.len());
        for name in names {
            let store = if let Some(store) = partition.nucleotide_sequence(&name) {
                StoreRef::Nucleotide(store)
            } else if let Some(store) = partition.amino_acid_sequence(&name) {
                StoreRef::AminoAcid(store)
            } else {
                return Err(QueryError::BadRequest(format!(
                    "unknown sequence: '{name}'"
                )));
            };
            let decompressor = DictDecompressor::new(store.reference().as_bytes())?;
            stores.push((name, store, decompressor));
        }
        Ok(SequenceMaterializer {
            primary_key: (
                database.schema().primary_key.clone(),
                ColumnType::String,
            ),
            stores,
            aligned,
        })
    }

    /// Materialize one batch: primary key plus one field per sequence name.
    pub(crate) fn materialize(
        &mut self,
        database: &Database,
        partition: &DatabasePartition,
        batch: &RoaringBitmap,
    ) -> Result<Vec<OutputRow>, QueryError> {
        let mut records = Vec::with_capacity(batch.len() as usize);
        for row in batch {
            let mut record = OutputRow::new();
            record.insert(
                self.primary_key.0.clone(),
                key_for(database, partition, &self.primary_key, row).to_json(),
            );
            for (name, store, decompressor) in &mut self.stores {
                let sequence = if self.aligned {
                    Some(store.aligned(row, decompressor)?)
                } else {
                    // Unaligned output falls back to the aligned sequence
                    // for rows whose raw input was not retained.
                    match store.unaligned(row, decompressor)? {
                        Some(sequence) => Some(sequence),
                        None => Some(store.aligned(row, decompressor)?),
                    }
                };
                record.insert(
                    name.clone(),
                    sequence.map_or(serde_json::Value::Null, serde_json::Value::String),
                );
            }
            records.push(record);
        }
        Ok(records)
    }
}

/// Additive map-merge of per-partition group counts.
pub(crate) fn merge_group_counts(
    mut accumulated: HashMap<Vec<Key>, u64>,
    partial: HashMap<Vec<Key>, u64>,
) -> HashMap<Vec<Key>, u64> {
    for (key, count) in partial {
        *accumulated.entry(key).or_insert(0) += count;
    }
    accumulated
}

/// Batch consumer on the output side of the executor.
pub trait RecordSink {
    fn write_batch(&mut self, rows: Vec<OutputRow>) -> Result<(), QueryError>;
}

/// Writes one JSON object per row.
pub struct NdjsonWriter<W: Write> {
    writer: W,
}

impl<W: Write> NdjsonWriter<W> {
    pub fn new(writer: W) -> Self {
        NdjsonWriter { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordSink for NdjsonWriter<W> {
    fn write_batch(&mut self, rows: Vec<OutputRow>) -> Result<(), QueryError> {
        for row in rows {
            serde_json::to_writer(&mut self.writer, &row)?;
            self.writer.write_all(b"\n")?;
        }
        Ok(())
    }
}

/// Writes `>primary_key\nSEQUENCE\n` records. With several sequence names
/// per row, headers carry a `|sequence_name` suffix.
pub struct FastaWriter<W: Write> {
    writer: W,
    primary_key: String,
    sequence_names: Vec<String>,
}

impl<W: Write> FastaWriter<W> {
    pub fn new(writer: W, primary_key: String, sequence_names: Vec<String>) -> Self {
        FastaWriter {
            writer,
            primary_key,
            sequence_names,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordSink for FastaWriter<W> {
    fn write_batch(&mut self, rows: Vec<OutputRow>) -> Result<(), QueryError> {
        for row in rows {
            let key = row
                .get(&self.primary_key)
                .and_then(serde_json::Value::as_str)
                .unwrap_or("");
            for name in &self.sequence_names {
                let Some(sequence) = row.get(name).and_then(serde_json::Value::as_str) else {
                    continue;
                };
                if self.sequence_names.len() > 1 {
                    writeln!(self.writer, ">{key}|{name}")?;
                } else {
                    writeln!(self.writer, ">{key}")?;
                }
                writeln!(self.writer, "{sequence}")?;
            }
        }
        Ok(())
    }
}

/// Collects batches in memory; the sink behind [`QueryOutput::Rows`].
#[derive(Default)]
pub struct CollectingSink {
    rows: Vec<OutputRow>,
}

impl CollectingSink {
    pub fn new() -> Self {
        CollectingSink::default()
    }

    pub fn into_rows(self) -> Vec<OutputRow> {
        self.rows
    }
}

impl RecordSink for CollectingSink {
    fn write_batch(&mut self, rows: Vec<OutputRow>) -> Result<(), QueryError> {
        self.rows.extend(rows);
        Ok(())
    }
}

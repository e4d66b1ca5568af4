//! Snapshot persistence: round trips, version gating, corruption detection.

use std::fs;

use genolith::config::BuildConfig;
use genolith::preprocessing::{MetadataValue, RowInput};
use genolith::query::Query;
use genolith::storage::{ColumnDef, ColumnType};
use genolith::{
    load_database, save_database, Database, DatabaseBuilder, DatabaseSchema, LineageTree,
    LoadDatabaseError, QueryEngine, ReferenceGenomes,
};
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

fn build_database() -> Database {
    let schema = DatabaseSchema {
        primary_key: "accession".to_string(),
        partition_by: None,
        columns: vec![
            ColumnDef {
                name: "accession".to_string(),
                column_type: ColumnType::String,
            },
            ColumnDef {
                name: "date".to_string(),
                column_type: ColumnType::Date,
            },
            ColumnDef {
                name: "lineage".to_string(),
                column_type: ColumnType::Lineage,
            },
        ],
    };
    let mut genomes = ReferenceGenomes::default();
    genomes
        .nucleotide_sequences
        .insert("main".to_string(), "ACGT".to_string());
    let lineages = LineageTree::from_edges(&[("B", None), ("B.1", Some("B"))])
        .expect("valid lineage tree");

    let mut config = BuildConfig::default();
    config.partition_capacity = 2;
    let mut builder =
        DatabaseBuilder::new(schema, genomes, lineages, config).expect("valid schema");
    for (index, sequence) in ["ACGT", "ACGA", "TCGT"].iter().enumerate() {
        let mut input = RowInput::default();
        input.metadata.insert(
            "accession".to_string(),
            MetadataValue::String(format!("s{index}")),
        );
        input.metadata.insert(
            "date".to_string(),
            MetadataValue::String(format!("2021-06-0{}", index + 1)),
        );
        input.metadata.insert(
            "lineage".to_string(),
            MetadataValue::String(if index == 0 { "B" } else { "B.1" }.to_string()),
        );
        input
            .aligned_nucleotide_sequences
            .insert("main".to_string(), Some((*sequence).to_string()));
        builder.add_row(input).expect("row accepted");
    }
    builder.build().expect("build succeeds")
}

fn count(database: &Database, filter: &str) -> u64 {
    let query = Query::from_json(&format!(
        r#"{{"action": {{"type": "Count"}}, "filterExpression": {filter}}}"#
    ))
    .expect("valid query");
    QueryEngine::new()
        .execute(database, &query)
        .expect("query succeeds")
        .count()
        .expect("count output")
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn test_save_load_roundtrip_preserves_queries() {
    let database = build_database();
    let temp = TempDir::new().expect("tempdir");
    save_database(&database, temp.path()).expect("save succeeds");

    let restored = load_database(temp.path()).expect("load succeeds");
    assert_eq!(restored.row_count(), database.row_count());
    assert_eq!(restored.partitions().len(), database.partitions().len());

    for filter in [
        r#"{"type": "NucleotideEquals", "position": 0, "symbol": "T"}"#,
        r#"{"type": "Lineage", "column": "lineage", "value": "B", "includeSublineages": true}"#,
        r#"{"type": "DateBetween", "column": "date", "from": "2021-06-02"}"#,
        r#"{"type": "IsNull", "column": "date"}"#,
    ] {
        assert_eq!(
            count(&restored, filter),
            count(&database, filter),
            "filter {filter}"
        );
    }
}

#[test]
fn test_roundtrip_preserves_sequences() {
    let database = build_database();
    let temp = TempDir::new().expect("tempdir");
    save_database(&database, temp.path()).expect("save succeeds");
    let restored = load_database(temp.path()).expect("load succeeds");

    let query = Query::from_json(
        r#"{"action": {"type": "FastaAligned", "sequenceNames": ["main"]},
            "filterExpression": {"type": "StringEquals",
                                 "column": "accession", "value": "s2"}}"#,
    )
    .expect("valid query");
    let output = QueryEngine::new()
        .execute(&restored, &query)
        .expect("fasta succeeds");
    let rows = output.rows().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["main"], serde_json::json!("TCGT"));
}

// ============================================================================
// Failure modes
// ============================================================================

#[test]
fn test_version_mismatch_is_rejected() {
    let database = build_database();
    let temp = TempDir::new().expect("tempdir");
    save_database(&database, temp.path()).expect("save succeeds");

    let manifest_path = temp.path().join("manifest.json");
    let manifest = fs::read_to_string(&manifest_path).expect("manifest readable");
    fs::write(
        &manifest_path,
        manifest.replace("\"format_version\": \"1\"", "\"format_version\": \"999\""),
    )
    .expect("manifest writable");

    let result = load_database(temp.path());
    assert!(matches!(
        result,
        Err(LoadDatabaseError::IncompatibleVersion { .. })
    ));
}

#[test]
fn test_corrupted_partition_is_rejected() {
    let database = build_database();
    let temp = TempDir::new().expect("tempdir");
    save_database(&database, temp.path()).expect("save succeeds");

    let partition_path = temp.path().join("partition_000.bin");
    let mut bytes = fs::read(&partition_path).expect("partition readable");
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0xff;
    fs::write(&partition_path, bytes).expect("partition writable");

    let result = load_database(temp.path());
    assert!(matches!(result, Err(LoadDatabaseError::Corrupt(_))));
}

#[test]
fn test_missing_snapshot_directory_fails() {
    let temp = TempDir::new().expect("tempdir");
    let result = load_database(&temp.path().join("nothing_here"));
    assert!(matches!(result, Err(LoadDatabaseError::Io(_))));
}

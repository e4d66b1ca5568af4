//! End-to-end filter and action tests on a small fixture database.
//!
//! The fixture holds three sequences `ACG / ATG / CCT` (reference `ACG`),
//! lineages `B.1 / B.1.1 / B.2`, and sampling dates in June, July, and
//! August 2021, plus one amino-acid gene.

use genolith::config::BuildConfig;
use genolith::preprocessing::{MetadataValue, RowInput};
use genolith::query::Query;
use genolith::storage::{ColumnDef, ColumnType};
use genolith::{
    Database, DatabaseBuilder, DatabaseSchema, LineageTree, QueryEngine, QueryError,
    ReferenceGenomes,
};

// ============================================================================
// Test Helpers
// ============================================================================

fn fixture_schema() -> DatabaseSchema {
    DatabaseSchema {
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
                name: "pango_lineage".to_string(),
                column_type: ColumnType::Lineage,
            },
            ColumnDef {
                name: "country".to_string(),
                column_type: ColumnType::String,
            },
            ColumnDef {
                name: "age".to_string(),
                column_type: ColumnType::Int,
            },
            ColumnDef {
                name: "qc_score".to_string(),
                column_type: ColumnType::Float,
            },
            ColumnDef {
                name: "vaccinated".to_string(),
                column_type: ColumnType::Bool,
            },
        ],
    }
}

fn fixture_references() -> ReferenceGenomes {
    let mut genomes = ReferenceGenomes::default();
    genomes
        .nucleotide_sequences
        .insert("main".to_string(), "ACG".to_string());
    genomes.aa_sequences.insert("S".to_string(), "MF".to_string());
    genomes
}

fn fixture_lineages() -> LineageTree {
    LineageTree::from_edges(&[
        ("B", None),
        ("B.1", Some("B")),
        ("B.1.1", Some("B.1")),
        ("B.2", Some("B")),
    ])
    .expect("valid lineage tree")
}

struct FixtureRow {
    accession: &'static str,
    date: Option<&'static str>,
    lineage: &'static str,
    country: Option<&'static str>,
    age: Option<i64>,
    qc_score: Option<f64>,
    vaccinated: Option<bool>,
    nucleotides: &'static str,
    amino_acids: &'static str,
}

fn fixture_rows() -> Vec<FixtureRow> {
    vec![
        FixtureRow {
            accession: "s0",
            date: Some("2021-06-01"),
            lineage: "B.1",
            country: Some("Switzerland"),
            age: Some(34),
            qc_score: Some(0.98),
            vaccinated: Some(true),
            nucleotides: "ACG",
            amino_acids: "MF",
        },
        FixtureRow {
            accession: "s1",
            date: Some("2021-07-01"),
            lineage: "B.1.1",
            country: Some("Germany"),
            age: None,
            qc_score: Some(0.87),
            vaccinated: Some(false),
            nucleotides: "ATG",
            amino_acids: "ML",
        },
        FixtureRow {
            accession: "s2",
            date: Some("2021-08-01"),
            lineage: "B.2",
            country: None,
            age: Some(61),
            qc_score: None,
            vaccinated: None,
            nucleotides: "CCT",
            amino_acids: "-F",
        },
    ]
}

fn fixture_database() -> Database {
    let mut builder = DatabaseBuilder::new(
        fixture_schema(),
        fixture_references(),
        fixture_lineages(),
        BuildConfig::default(),
    )
    .expect("valid schema");

    for row in fixture_rows() {
        let mut input = RowInput::default();
        input.metadata.insert(
            "accession".to_string(),
            MetadataValue::String(row.accession.to_string()),
        );
        if let Some(date) = row.date {
            input
                .metadata
                .insert("date".to_string(), MetadataValue::String(date.to_string()));
        }
        input.metadata.insert(
            "pango_lineage".to_string(),
            MetadataValue::String(row.lineage.to_string()),
        );
        if let Some(country) = row.country {
            input.metadata.insert(
                "country".to_string(),
                MetadataValue::String(country.to_string()),
            );
        }
        if let Some(age) = row.age {
            input
                .metadata
                .insert("age".to_string(), MetadataValue::Int(age));
        }
        if let Some(qc_score) = row.qc_score {
            input
                .metadata
                .insert("qc_score".to_string(), MetadataValue::Float(qc_score));
        }
        if let Some(vaccinated) = row.vaccinated {
            input
                .metadata
                .insert("vaccinated".to_string(), MetadataValue::Bool(vaccinated));
        }
        input
            .aligned_nucleotide_sequences
            .insert("main".to_string(), Some(row.nucleotides.to_string()));
        input
            .unaligned_nucleotide_sequences
            .insert("main".to_string(), Some(row.nucleotides.to_string()));
        input
            .aligned_amino_acid_sequences
            .insert("S".to_string(), Some(row.amino_acids.to_string()));
        builder.add_row(input).expect("fixture row accepted");
    }
    builder.build().expect("fixture build")
}

fn query(filter: &str, action: &str) -> Query {
    Query::from_json(&format!(
        r#"{{"action": {action}, "filterExpression": {filter}}}"#
    ))
    .expect("valid query json")
}

fn count(database: &Database, filter: &str) -> u64 {
    QueryEngine::new()
        .execute(database, &query(filter, r#"{"type": "Count"}"#))
        .expect("count query succeeds")
        .count()
        .expect("count output")
}

fn matching_accessions(database: &Database, filter: &str) -> Vec<String> {
    let output = QueryEngine::new()
        .execute(
            database,
            &query(filter, r#"{"type": "Details", "fields": ["accession"]}"#),
        )
        .expect("details query succeeds");
    let mut accessions: Vec<String> = output
        .rows()
        .expect("row output")
        .iter()
        .map(|row| row["accession"].as_str().expect("string").to_string())
        .collect();
    accessions.sort();
    accessions
}

// ============================================================================
// Positional symbol filters
// ============================================================================

#[test]
fn test_symbol_equals() {
    let database = fixture_database();
    assert_eq!(
        matching_accessions(
            &database,
            r#"{"type": "NucleotideEquals", "position": 1, "symbol": "C"}"#
        ),
        vec!["s0", "s2"]
    );
}

#[test]
fn test_symbol_equals_and_date_window() {
    let database = fixture_database();
    let filter = r#"{
        "type": "And",
        "children": [
            {"type": "NucleotideEquals", "position": 1, "symbol": "C"},
            {"type": "DateBetween", "column": "date",
             "from": "2021-07-01", "to": "2021-12-31"}
        ]
    }"#;
    assert_eq!(matching_accessions(&database, filter), vec!["s2"]);
}

#[test]
fn test_negated_symbol_equals() {
    let database = fixture_database();
    assert_eq!(
        matching_accessions(
            &database,
            r#"{"type": "Not",
                "child": {"type": "NucleotideEquals", "position": 2, "symbol": "G"}}"#
        ),
        vec!["s2"]
    );
}

#[test]
fn test_n_of_at_least() {
    let database = fixture_database();
    // Matches per child: {s0,s1}, {s0,s2}, {s0,s1} -> s0 in 3, s1 in 2, s2 in 1.
    let filter = r#"{
        "type": "NOf", "numberOfMatchers": 2, "matchExactly": false,
        "children": [
            {"type": "NucleotideEquals", "position": 0, "symbol": "A"},
            {"type": "NucleotideEquals", "position": 1, "symbol": "C"},
            {"type": "NucleotideEquals", "position": 2, "symbol": "G"}
        ]
    }"#;
    assert_eq!(matching_accessions(&database, filter), vec!["s0", "s1"]);
}

#[test]
fn test_n_of_exact() {
    let database = fixture_database();
    let filter = r#"{
        "type": "NOf", "numberOfMatchers": 2, "matchExactly": true,
        "children": [
            {"type": "NucleotideEquals", "position": 0, "symbol": "A"},
            {"type": "NucleotideEquals", "position": 1, "symbol": "C"},
            {"type": "NucleotideEquals", "position": 2, "symbol": "G"}
        ]
    }"#;
    assert_eq!(matching_accessions(&database, filter), vec!["s1"]);
}

#[test]
fn test_maybe_expands_ambiguity() {
    let database = fixture_database();
    // R covers A and G; rows start with A, A, C.
    assert_eq!(
        matching_accessions(
            &database,
            r#"{"type": "Maybe",
                "child": {"type": "NucleotideEquals", "position": 0, "symbol": "R"}}"#
        ),
        vec!["s0", "s1"]
    );
}

#[test]
fn test_strict_ambiguity_matches_nothing() {
    let database = fixture_database();
    // No stored symbol is literally R.
    assert_eq!(
        count(
            &database,
            r#"{"type": "NucleotideEquals", "position": 0, "symbol": "R"}"#
        ),
        0
    );
}

#[test]
fn test_has_nucleotide_mutation() {
    let database = fixture_database();
    // Position 1 reference is C; only s1 substitutes (T).
    assert_eq!(
        matching_accessions(
            &database,
            r#"{"type": "HasNucleotideMutation", "position": 1}"#
        ),
        vec!["s1"]
    );
}

#[test]
fn test_amino_acid_equals() {
    let database = fixture_database();
    assert_eq!(
        matching_accessions(
            &database,
            r#"{"type": "AminoAcidEquals", "gene": "S", "position": 1, "symbol": "F"}"#
        ),
        vec!["s0", "s2"]
    );
}

#[test]
fn test_position_out_of_range_is_bad_request() {
    let database = fixture_database();
    let result = QueryEngine::new().execute(
        &database,
        &query(
            r#"{"type": "NucleotideEquals", "position": 99, "symbol": "A"}"#,
            r#"{"type": "Count"}"#,
        ),
    );
    assert!(matches!(result, Err(QueryError::BadRequest(_))));
}

// ============================================================================
// Lineage filters
// ============================================================================

#[test]
fn test_lineage_including_sublineages() {
    let database = fixture_database();
    assert_eq!(
        matching_accessions(
            &database,
            r#"{"type": "Lineage", "column": "pango_lineage",
                "value": "B.1", "includeSublineages": true}"#
        ),
        vec!["s0", "s1"]
    );
}

#[test]
fn test_lineage_exact() {
    let database = fixture_database();
    assert_eq!(
        matching_accessions(
            &database,
            r#"{"type": "Lineage", "column": "pango_lineage",
                "value": "B.1", "includeSublineages": false}"#
        ),
        vec!["s0"]
    );
}

#[test]
fn test_lineage_root_covers_everything() {
    let database = fixture_database();
    assert_eq!(
        count(
            &database,
            r#"{"type": "Lineage", "column": "pango_lineage",
                "value": "B", "includeSublineages": true}"#
        ),
        3
    );
}

#[test]
fn test_unknown_lineage_matches_nothing() {
    let database = fixture_database();
    assert_eq!(
        count(
            &database,
            r#"{"type": "Lineage", "column": "pango_lineage",
                "value": "XBB.1.5", "includeSublineages": true}"#
        ),
        0
    );
}

// ============================================================================
// Metadata filters
// ============================================================================

#[test]
fn test_string_equals() {
    let database = fixture_database();
    assert_eq!(
        matching_accessions(
            &database,
            r#"{"type": "StringEquals", "column": "country", "value": "Germany"}"#
        ),
        vec!["s1"]
    );
    // Unknown dictionary value: empty result, not an error.
    assert_eq!(
        count(
            &database,
            r#"{"type": "StringEquals", "column": "country", "value": "Atlantis"}"#
        ),
        0
    );
}

#[test]
fn test_int_filters() {
    let database = fixture_database();
    assert_eq!(
        matching_accessions(
            &database,
            r#"{"type": "IntEquals", "column": "age", "value": 61}"#
        ),
        vec!["s2"]
    );
    // Null age (s1) never matches a range.
    assert_eq!(
        matching_accessions(
            &database,
            r#"{"type": "IntBetween", "column": "age", "from": 0, "to": 200}"#
        ),
        vec!["s0", "s2"]
    );
}

#[test]
fn test_float_between() {
    let database = fixture_database();
    assert_eq!(
        matching_accessions(
            &database,
            r#"{"type": "FloatBetween", "column": "qc_score", "from": 0.9}"#
        ),
        vec!["s0"]
    );
}

#[test]
fn test_bool_equals() {
    let database = fixture_database();
    assert_eq!(
        matching_accessions(
            &database,
            r#"{"type": "BoolEquals", "column": "vaccinated", "value": false}"#
        ),
        vec!["s1"]
    );
    // value null selects null rows.
    assert_eq!(
        matching_accessions(
            &database,
            r#"{"type": "BoolEquals", "column": "vaccinated", "value": null}"#
        ),
        vec!["s2"]
    );
}

#[test]
fn test_is_null() {
    let database = fixture_database();
    assert_eq!(
        matching_accessions(&database, r#"{"type": "IsNull", "column": "country"}"#),
        vec!["s2"]
    );
    assert_eq!(
        matching_accessions(
            &database,
            r#"{"type": "Not", "child": {"type": "IsNull", "column": "age"}}"#
        ),
        vec!["s0", "s2"]
    );
}

#[test]
fn test_unknown_column_is_bad_request() {
    let database = fixture_database();
    let result = QueryEngine::new().execute(
        &database,
        &query(
            r#"{"type": "StringEquals", "column": "mystery", "value": "x"}"#,
            r#"{"type": "Count"}"#,
        ),
    );
    assert!(matches!(result, Err(QueryError::BadRequest(_))));
}

#[test]
fn test_type_mismatch_is_bad_request() {
    let database = fixture_database();
    let result = QueryEngine::new().execute(
        &database,
        &query(
            r#"{"type": "StringEquals", "column": "date", "value": "2021-06-01"}"#,
            r#"{"type": "Count"}"#,
        ),
    );
    assert!(matches!(result, Err(QueryError::BadRequest(_))));
}

#[test]
fn test_constant_folding() {
    let database = fixture_database();
    assert_eq!(count(&database, r#"{"type": "True"}"#), 3);
    assert_eq!(count(&database, r#"{"type": "False"}"#), 0);
    assert_eq!(
        count(
            &database,
            r#"{"type": "And", "children": [{"type": "True"}, {"type": "False"}]}"#
        ),
        0
    );
    assert_eq!(
        count(
            &database,
            r#"{"type": "Or", "children": [{"type": "False"}, {"type": "True"}]}"#
        ),
        3
    );
}

// ============================================================================
// Actions
// ============================================================================

#[test]
fn test_aggregate_by_lineage() {
    let database = fixture_database();
    let output = QueryEngine::new()
        .execute(
            &database,
            &query(
                r#"{"type": "True"}"#,
                r#"{"type": "Aggregated", "groupByFields": ["pango_lineage"]}"#,
            ),
        )
        .expect("aggregate succeeds");
    let rows = output.rows().expect("rows");
    let groups: Vec<(String, u64)> = rows
        .iter()
        .map(|row| {
            (
                row["pango_lineage"].as_str().expect("name").to_string(),
                row["count"].as_u64().expect("count"),
            )
        })
        .collect();
    assert_eq!(
        groups,
        vec![
            ("B.1".to_string(), 1),
            ("B.1.1".to_string(), 1),
            ("B.2".to_string(), 1)
        ]
    );
}

#[test]
fn test_aggregate_without_groups_counts_everything() {
    let database = fixture_database();
    let output = QueryEngine::new()
        .execute(
            &database,
            &query(r#"{"type": "True"}"#, r#"{"type": "Aggregated"}"#),
        )
        .expect("aggregate succeeds");
    let rows = output.rows().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["count"].as_u64(), Some(3));
}

#[test]
fn test_details_order_by_and_window() {
    let database = fixture_database();
    let output = QueryEngine::new()
        .execute(
            &database,
            &query(
                r#"{"type": "True"}"#,
                r#"{"type": "Details", "fields": ["accession", "date"],
                    "orderByFields": ["date"], "limit": 2, "offset": 1}"#,
            ),
        )
        .expect("details succeeds");
    let accessions: Vec<&str> = output
        .rows()
        .expect("rows")
        .iter()
        .map(|row| row["accession"].as_str().expect("string"))
        .collect();
    assert_eq!(accessions, vec!["s1", "s2"]);
}

#[test]
fn test_details_projects_typed_values() {
    let database = fixture_database();
    let output = QueryEngine::new()
        .execute(
            &database,
            &query(
                r#"{"type": "StringEquals", "column": "accession", "value": "s0"}"#,
                r#"{"type": "Details"}"#,
            ),
        )
        .expect("details succeeds");
    let row = &output.rows().expect("rows")[0];
    assert_eq!(row["accession"], serde_json::json!("s0"));
    assert_eq!(row["date"], serde_json::json!("2021-06-01"));
    assert_eq!(row["pango_lineage"], serde_json::json!("B.1"));
    assert_eq!(row["age"], serde_json::json!(34));
    assert_eq!(row["vaccinated"], serde_json::json!(true));
}

#[test]
fn test_fasta_aligned_roundtrip() {
    let database = fixture_database();
    let output = QueryEngine::new()
        .execute(
            &database,
            &query(
                r#"{"type": "StringEquals", "column": "accession", "value": "s1"}"#,
                r#"{"type": "FastaAligned", "sequenceNames": ["main"]}"#,
            ),
        )
        .expect("fasta succeeds");
    let rows = output.rows().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["main"], serde_json::json!("ATG"));
}

#[test]
fn test_fasta_writer_output() {
    let database = fixture_database();
    let buffer = QueryEngine::new()
        .execute_to_writer(
            &database,
            &query(
                r#"{"type": "StringEquals", "column": "accession", "value": "s2"}"#,
                r#"{"type": "Fasta", "sequenceNames": ["main"]}"#,
            ),
            Vec::new(),
        )
        .expect("fasta succeeds");
    assert_eq!(String::from_utf8(buffer).expect("utf8"), ">s2\nCCT\n");
}

#[test]
fn test_count_to_writer_emits_single_document() {
    let database = fixture_database();
    let buffer = QueryEngine::new()
        .execute_to_writer(
            &database,
            &query(r#"{"type": "True"}"#, r#"{"type": "Count"}"#),
            Vec::new(),
        )
        .expect("count succeeds");
    assert_eq!(String::from_utf8(buffer).expect("utf8"), "{\"count\":3}\n");
}

#[test]
fn test_details_streamed_ndjson() {
    let database = fixture_database();
    let buffer = QueryEngine::new()
        .execute_to_writer(
            &database,
            &query(
                r#"{"type": "True"}"#,
                r#"{"type": "Details", "fields": ["accession"]}"#,
            ),
            Vec::new(),
        )
        .expect("details succeeds");
    let text = String::from_utf8(buffer).expect("utf8");
    let mut lines: Vec<&str> = text.lines().collect();
    lines.sort_unstable();
    assert_eq!(
        lines,
        vec![
            "{\"accession\":\"s0\"}",
            "{\"accession\":\"s1\"}",
            "{\"accession\":\"s2\"}"
        ]
    );
}

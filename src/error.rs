//! Engine Error Types
//!
//! Errors are grouped by lifecycle phase:
//! - [`QueryError`]: failures while compiling or evaluating a query; recovered
//!   at the request boundary and mapped to structured responses.
//! - [`PreprocessingError`]: failures while building a database from input
//!   records; the build run fails and no partial database is published.
//! - [`LoadDatabaseError`]: failures while reading a persisted snapshot; fails
//!   startup.
//!
//! Invariant violations (bitmap outside the row domain, null in a non-nullable
//! slot, reference mismatch) are not represented as errors; they panic via
//! [`crate::panic::invariant_violation`].

use std::io;
use thiserror::Error;

/// Errors surfaced on the query path.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Malformed request: unknown expression type, type mismatch,
    /// unresolvable column, bounds violation.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The compiler produced or encountered an operator it cannot support in
    /// context. Indicates an internal defect rather than a bad request.
    #[error("Query compilation error: {0}")]
    Compilation(String),

    /// The query exceeded its deadline.
    #[error("Query timed out after {timeout_ms}ms (ran for {elapsed_ms}ms)")]
    Timeout { timeout_ms: u64, elapsed_ms: u64 },

    /// The query was cancelled via its cancellation handle.
    #[error("Query cancelled")]
    Cancelled,

    /// I/O error while writing to an output sink.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON error while parsing a request or serializing a response row.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors raised while building a database from input records.
#[derive(Debug, Error)]
pub enum PreprocessingError {
    /// Metadata key not declared in the schema.
    #[error("Unknown metadata column: {0}")]
    UnknownColumn(String),

    /// A metadata value does not match the declared column type.
    #[error("Type mismatch in column '{column}': expected {expected}, got {got}")]
    TypeMismatch {
        column: String,
        expected: String,
        got: String,
    },

    /// A date value could not be parsed as `YYYY-MM-DD` after the epoch.
    #[error("Invalid date in column '{column}': {value}")]
    InvalidDate { column: String, value: String },

    /// A sequence contained a character outside its alphabet.
    #[error("Illegal character '{character}' in sequence '{sequence}'")]
    IllegalSymbol { sequence: String, character: char },

    /// An aligned sequence does not have the reference length.
    #[error("Sequence '{sequence}' has length {got}, reference length is {expected}")]
    LengthMismatch {
        sequence: String,
        expected: usize,
        got: usize,
    },

    /// Sequence name not present in the reference genomes.
    #[error("Unknown sequence name: {0}")]
    UnknownSequence(String),

    /// Lineage value not present in the lineage tree.
    #[error("Unknown lineage value: {0}")]
    UnknownLineage(String),

    /// The child-parent relation contains a cycle.
    #[error("Lineage tree contains a cycle through '{0}'")]
    LineageCycle(String),

    /// Primary key column missing or null for a row.
    #[error("Row {row} is missing its primary key")]
    MissingPrimaryKey { row: usize },

    /// Two rows share the same primary key.
    #[error("Duplicate primary key: {0}")]
    DuplicatePrimaryKey(String),

    /// More rows than a partition's `u32` row-id space can address.
    #[error("Row count overflows the per-partition row-id space")]
    RowCountOverflow,

    /// Schema is internally inconsistent (e.g. primary key not a declared
    /// string column).
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// I/O error while reading input or writing the snapshot.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON error while reading structured input.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Snapshot encoding error.
    #[error("Encode error: {0}")]
    Encode(#[from] bincode::Error),
}

/// Errors raised while loading a persisted snapshot.
#[derive(Debug, Error)]
pub enum LoadDatabaseError {
    /// Snapshot directory or file unreadable.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Checksum mismatch in a snapshot file.
    #[error("Corrupt snapshot file: {0}")]
    Corrupt(String),

    /// The snapshot was written by an incompatible format version.
    #[error("Incompatible snapshot version: found {found}, expected {expected}")]
    IncompatibleVersion { found: String, expected: String },

    /// Manifest or reference genomes unreadable as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Snapshot payload undecodable.
    #[error("Decode error: {0}")]
    Decode(#[from] bincode::Error),
}

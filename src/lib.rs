//! # Genolith
//!
//! A read-optimized, in-memory columnar engine for querying large
//! collections of biological sequences (nucleotide and amino-acid) together
//! with per-sequence metadata (dates, lineages, strings, numbers, booleans).
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Query JSON
//!     ↓
//! [Expression parse]        → FilterExpression + Action
//!     ↓  (once per partition, in parallel)
//! [Compiler]                → Operator tree (rewrites, negation pushdown)
//!     ↓
//! [Operator evaluation]     → copy-on-write row-id bitmap
//!     ↓
//! [Batched reader]          → ascending row-id batches
//!     ↓
//! [Action producers]        → record batches
//!     ↓
//! [Coordinator]             → merged counts / groups / ordered rows
//! ```
//!
//! ## Storage Model
//!
//! ```text
//! Database
//!   ├── DatabaseSchema            declared metadata columns
//!   ├── Dictionaries              shared string-id mappings
//!   ├── LineageTree               taxonomy with ancestor closure
//!   └── DatabasePartition (×N)    disjoint row ranges
//!         ├── typed columns       string/int/float/bool/date/lineage
//!         └── sequence stores     vertical bitmap index per position
//!                                 + zstd-compressed horizontal data
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use genolith::{DatabaseBuilder, Query, QueryEngine};
//!
//! let mut builder = DatabaseBuilder::new(schema, references, lineages, config)?;
//! for record in records {
//!     builder.add_row(record)?;
//! }
//! let database = builder.build()?;
//!
//! let query = Query::from_json(r#"{
//!     "action": {"type": "Count"},
//!     "filterExpression": {"type": "NucleotideEquals",
//!                          "position": 23403, "symbol": "G"}
//! }"#)?;
//! let result = QueryEngine::new().execute(&database, &query)?;
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `alphabet` | Nucleotide / amino-acid symbol enumerations, ambiguity |
//! | `bitmap` | Copy-on-write roaring bitmaps, batched iteration |
//! | `compression` | zstd dictionary compression for sequences |
//! | `storage` | Typed column partitions, dictionaries, lineage index |
//! | `database` | Frozen database, reload handle, info surface |
//! | `query` | Expression algebra → operators → parallel execution |
//! | `preprocessing` | One-shot build from structured input records |
//! | `snapshot` | Checksummed on-disk persistence |

pub mod alphabet;
pub mod bitmap;
pub mod compression;
pub mod config;
pub mod database;
pub mod error;
pub mod preprocessing;
pub mod query;
pub mod snapshot;
pub mod storage;

mod panic;

// Re-export the primary API surface.
pub use config::Config;
pub use database::{Database, DatabaseHandle, DatabaseInfo, ReferenceGenomes};
pub use error::{LoadDatabaseError, PreprocessingError, QueryError};
pub use preprocessing::{DatabaseBuilder, MetadataValue, RowInput};
pub use query::{
    Action, CancelHandle, FilterExpression, Query, QueryDeadline, QueryEngine, QueryOutput,
};
pub use snapshot::{load_database, save_database};
pub use storage::{ColumnDef, ColumnType, DatabaseSchema, LineageTree};

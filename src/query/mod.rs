//! Query engine: expression algebra, operator tree, compiler, actions, and
//! the partitioned executor.
//!
//! ## Pipeline
//!
//! ```text
//! Query JSON
//!     ↓
//! [Expression parse]       → FilterExpression + Action (serde)
//!     ↓  per partition
//! [Compiler]               → Operator tree (rewrites, negation pushdown)
//!     ↓
//! [Operator::evaluate]     → copy-on-write row-id bitmap
//!     ↓
//! [BatchedBitmapReader]    → row-id batches
//!     ↓
//! [Action producer]        → record batches → sink (NDJSON, FASTA, counts)
//!     ↓
//! [Coordinator]            → merge partials, ordering, limit/offset
//! ```

pub mod actions;
pub mod compiler;
pub mod deadline;
pub mod executor;
pub mod expression;
pub mod operators;

pub use actions::{Action, OutputRow, QueryOutput};
pub use compiler::compile;
pub use deadline::{CancelHandle, QueryDeadline};
pub use executor::QueryEngine;
pub use expression::FilterExpression;
pub use operators::{Comparator, Operator, OperatorKind};

use serde::{Deserialize, Serialize};

/// A complete query: what to select and what to do with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub action: Action,
    #[serde(rename = "filterExpression")]
    pub filter_expression: FilterExpression,
}

impl Query {
    pub fn from_json(json: &str) -> Result<Self, crate::error::QueryError> {
        Ok(serde_json::from_str(json)?)
    }
}

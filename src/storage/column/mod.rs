//! Typed column partitions.
//!
//! One column partition exists per `(partition, attribute)`. All variants
//! share the same build-phase surface (`insert`, `insert_null`, `reserve`)
//! and read-phase surface (`num_values`, typed getter, `is_null`,
//! `null_bitmap`), plus a type-specific filter primitive the compiler lowers
//! predicates onto.

mod bool_column;
mod date_column;
mod float_column;
mod int_column;
mod sequence_column;
mod string_column;

pub use bool_column::{BoolColumnPartition, OptionalBool};
pub use date_column::{date_to_day, day_to_date, DateColumnPartition, NULL_DAY};
pub use float_column::FloatColumnPartition;
pub use int_column::IntColumnPartition;
pub use sequence_column::{PositionIndex, SequenceStoreBuilder, SequenceStorePartition};
pub use string_column::StringColumnPartition;

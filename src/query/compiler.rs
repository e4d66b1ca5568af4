//! Expression compiler: lowers a filter expression to a per-partition
//! operator tree.
//!
//! Compilation is a recursive descent that resolves names against the
//! database (schema types, dictionary ids, lineage ids, sequence names) and
//! applies the structural rewrites:
//!
//! - nested `And`/`Or` of the same kind are flattened;
//! - `And` children are split into positives and negatives, negatives
//!   becoming subtracted children of the intersection;
//! - `Not` elsewhere compiles its child under the swapped ambiguity mode and
//!   negates the result structurally;
//! - constants fold (`And(.., False, ..)` → empty, `Or(.., True, ..)` →
//!   full, identities stripped) and degenerate `NOf` bounds collapse;
//! - an unknown string or lineage *value* compiles to the empty operator,
//!   while an unknown *column* is a `BadRequest`.
//!
//! Compilation is deterministic: child order is preserved as given.

use crate::alphabet::{symbols_matching, Alphabet, AmbiguityMode};
use crate::bitmap::CowBitmap;
use crate::database::Database;
use crate::error::QueryError;
use crate::query::expression::FilterExpression;
use crate::query::operators::{Comparator, Operator, OperatorKind, ScalarValue, SelectionColumn};
use crate::storage::column::{date_to_day, SequenceStorePartition};
use crate::storage::{ColumnType, DatabasePartition};

/// Compile `expression` against one partition.
pub fn compile<'p>(
    expression: &FilterExpression,
    database: &'p Database,
    partition: &'p DatabasePartition,
    mode: AmbiguityMode,
) -> Result<Operator<'p>, QueryError> {
    let row_count = partition.row_count();
    match expression {
        FilterExpression::True => Ok(Operator::Full { row_count }),
        FilterExpression::False => Ok(Operator::Empty { row_count }),
        FilterExpression::And { children } => compile_and(children, database, partition, mode),
        FilterExpression::Or { children } => compile_or(children, database, partition, mode),
        FilterExpression::Not { child } => Ok(Operator::negate(compile(
            child,
            database,
            partition,
            mode.swapped(),
        )?)),
        FilterExpression::StringEquals { column, value } => {
            compile_string_equals(column, value, database, partition)
        }
        FilterExpression::IntEquals { column, value } => {
            compile_int_equals(column, *value, database, partition)
        }
        FilterExpression::IntBetween { column, from, to } => {
            compile_int_between(column, *from, *to, database, partition)
        }
        FilterExpression::FloatBetween { column, from, to } => {
            compile_float_between(column, *from, *to, database, partition)
        }
        FilterExpression::BoolEquals { column, value } => {
            compile_bool_equals(column, *value, database, partition)
        }
        FilterExpression::DateBetween { column, from, to } => {
            let from_day = (*from).map(date_to_day);
            let to_day = (*to).map(date_to_day);
            compile_date_between(column, from_day, to_day, database, partition)
        }
        FilterExpression::IsNull { column } => compile_is_null(column, database, partition),
        FilterExpression::Lineage {
            column,
            value,
            include_sublineages,
        } => compile_lineage(column, value, *include_sublineages, database, partition),
        FilterExpression::NucleotideEquals {
            sequence_name,
            position,
            symbol,
        } => {
            let store = resolve_nucleotide(sequence_name.as_deref(), database, partition)?;
            compile_symbol_equals(store, *position, symbol, mode)
        }
        FilterExpression::AminoAcidEquals {
            gene,
            position,
            symbol,
        } => {
            let store = resolve_amino_acid(gene, database, partition)?;
            compile_symbol_equals(store, *position, symbol, mode)
        }
        FilterExpression::HasNucleotideMutation {
            sequence_name,
            position,
        } => {
            let store = resolve_nucleotide(sequence_name.as_deref(), database, partition)?;
            compile_has_mutation(store, *position)
        }
        FilterExpression::HasAminoAcidMutation { gene, position } => {
            let store = resolve_amino_acid(gene, database, partition)?;
            compile_has_mutation(store, *position)
        }
        FilterExpression::NOf {
            number_of_matchers,
            match_exactly,
            children,
        } => compile_n_of(
            *number_of_matchers,
            *match_exactly,
            children,
            database,
            partition,
            mode,
        ),
        FilterExpression::Maybe { child } => {
            compile(child, database, partition, AmbiguityMode::UpperBound)
        }
    }
}

fn bad_request(message: impl Into<String>) -> QueryError {
    QueryError::BadRequest(message.into())
}

/// Declared type of `column`, or a `BadRequest` naming it.
fn resolve_type(database: &Database, column: &str) -> Result<ColumnType, QueryError> {
    database
        .schema()
        .column_type(column)
        .ok_or_else(|| bad_request(format!("unknown column: '{column}'")))
}

fn expect_type(
    database: &Database,
    column: &str,
    expected: ColumnType,
) -> Result<(), QueryError> {
    let actual = resolve_type(database, column)?;
    if actual == expected {
        Ok(())
    } else {
        Err(bad_request(format!(
            "column '{column}' has type {}, expected {}",
            actual.as_str(),
            expected.as_str()
        )))
    }
}

/// A declared column must exist in every partition; a miss is an internal
/// inconsistency, not a bad request.
fn missing_partition_column(column: &str) -> QueryError {
    QueryError::Compilation(format!(
        "column '{column}' is declared but missing from a partition"
    ))
}

/// Flatten nested `And`/`Or` chains of the same kind.
fn flatten<'e>(
    children: &'e [FilterExpression],
    is_and: bool,
    flat: &mut Vec<&'e FilterExpression>,
) {
    for child in children {
        match child {
            FilterExpression::And { children } if is_and => flatten(children, true, flat),
            FilterExpression::Or { children } if !is_and => flatten(children, false, flat),
            other => flat.push(other),
        }
    }
}

fn compile_and<'p>(
    children: &[FilterExpression],
    database: &'p Database,
    partition: &'p DatabasePartition,
    mode: AmbiguityMode,
) -> Result<Operator<'p>, QueryError> {
    let row_count = partition.row_count();
    let mut flat = Vec::new();
    flatten(children, true, &mut flat);

    let mut positives = Vec::new();
    let mut negatives = Vec::new();
    for child in flat {
        match child {
            FilterExpression::False => return Ok(Operator::Empty { row_count }),
            FilterExpression::True => {}
            FilterExpression::Not { child } => {
                let compiled = compile(child, database, partition, mode.swapped())?;
                match compiled.kind() {
                    // Subtracting the full domain leaves nothing.
                    OperatorKind::Full => return Ok(Operator::Empty { row_count }),
                    OperatorKind::Empty => {}
                    _ => negatives.push(compiled),
                }
            }
            other => {
                let compiled = compile(other, database, partition, mode)?;
                match compiled.kind() {
                    OperatorKind::Empty => return Ok(Operator::Empty { row_count }),
                    OperatorKind::Full => {}
                    _ => positives.push(compiled),
                }
            }
        }
    }

    if negatives.is_empty() {
        return Ok(match positives.len() {
            0 => Operator::Full { row_count },
            1 => positives.into_iter().next().expect("length checked"),
            _ => Operator::Intersection {
                children: positives,
                negated_children: negatives,
                row_count,
            },
        });
    }
    Ok(Operator::Intersection {
        children: positives,
        negated_children: negatives,
        row_count,
    })
}

fn compile_or<'p>(
    children: &[FilterExpression],
    database: &'p Database,
    partition: &'p DatabasePartition,
    mode: AmbiguityMode,
) -> Result<Operator<'p>, QueryError> {
    let row_count = partition.row_count();
    let mut flat = Vec::new();
    flatten(children, false, &mut flat);

    let mut compiled_children = Vec::new();
    for child in flat {
        match child {
            FilterExpression::True => return Ok(Operator::Full { row_count }),
            FilterExpression::False => {}
            other => {
                let compiled = compile(other, database, partition, mode)?;
                match compiled.kind() {
                    OperatorKind::Full => return Ok(Operator::Full { row_count }),
                    OperatorKind::Empty => {}
                    _ => compiled_children.push(compiled),
                }
            }
        }
    }

    Ok(match compiled_children.len() {
        0 => Operator::Empty { row_count },
        1 => compiled_children
            .into_iter()
            .next()
            .expect("length checked"),
        _ => Operator::Union {
            children: compiled_children,
            row_count,
        },
    })
}

fn compile_string_equals<'p>(
    column: &str,
    value: &str,
    database: &'p Database,
    partition: &'p DatabasePartition,
) -> Result<Operator<'p>, QueryError> {
    expect_type(database, column, ColumnType::String)?;
    let row_count = partition.row_count();
    let dictionary = database
        .dictionary(column)
        .ok_or_else(|| missing_partition_column(column))?;
    // An unresolvable value means no row can match; it is not an error.
    let Some(value_id) = dictionary.lookup(value) else {
        return Ok(Operator::Empty { row_count });
    };
    let column_partition = partition
        .string_column(column)
        .ok_or_else(|| missing_partition_column(column))?;
    Ok(match column_partition.filter_equals(value_id) {
        Some(bitmap) => Operator::IndexScan { bitmap, row_count },
        None => Operator::Empty { row_count },
    })
}

fn compile_int_equals<'p>(
    column: &str,
    value: i64,
    database: &'p Database,
    partition: &'p DatabasePartition,
) -> Result<Operator<'p>, QueryError> {
    expect_type(database, column, ColumnType::Int)?;
    let row_count = partition.row_count();
    let column_partition = partition
        .int_column(column)
        .ok_or_else(|| missing_partition_column(column))?;
    Ok(match column_partition.filter_equals(value) {
        Some(Some(bitmap)) => Operator::IndexScan { bitmap, row_count },
        Some(None) => Operator::Empty { row_count },
        None => Operator::Selection {
            column: SelectionColumn::Int {
                values: column_partition.values(),
                nulls: column_partition.null_bitmap(),
            },
            comparator: Comparator::Equals,
            value: ScalarValue::Int(value),
            row_count,
        },
    })
}

fn compile_int_between<'p>(
    column: &str,
    from: Option<i64>,
    to: Option<i64>,
    database: &'p Database,
    partition: &'p DatabasePartition,
) -> Result<Operator<'p>, QueryError> {
    expect_type(database, column, ColumnType::Int)?;
    let row_count = partition.row_count();
    let column_partition = partition
        .int_column(column)
        .ok_or_else(|| missing_partition_column(column))?;
    let selection = |comparator, constant| Operator::Selection {
        column: SelectionColumn::Int {
            values: column_partition.values(),
            nulls: column_partition.null_bitmap(),
        },
        comparator,
        value: ScalarValue::Int(constant),
        row_count,
    };
    Ok(match (from, to) {
        (Some(from), Some(to)) => Operator::Intersection {
            children: vec![
                selection(Comparator::GreaterOrEquals, from),
                selection(Comparator::LessOrEquals, to),
            ],
            negated_children: Vec::new(),
            row_count,
        },
        (Some(from), None) => selection(Comparator::GreaterOrEquals, from),
        (None, Some(to)) => selection(Comparator::LessOrEquals, to),
        // Unbounded on both sides: every non-null value.
        (None, None) => selection(Comparator::GreaterOrEquals, i64::MIN),
    })
}

fn compile_float_between<'p>(
    column: &str,
    from: Option<f64>,
    to: Option<f64>,
    database: &'p Database,
    partition: &'p DatabasePartition,
) -> Result<Operator<'p>, QueryError> {
    expect_type(database, column, ColumnType::Float)?;
    let row_count = partition.row_count();
    let column_partition = partition
        .float_column(column)
        .ok_or_else(|| missing_partition_column(column))?;
    let selection = |comparator, constant| Operator::Selection {
        column: SelectionColumn::Float {
            values: column_partition.values(),
        },
        comparator,
        value: ScalarValue::Float(constant),
        row_count,
    };
    Ok(match (from, to) {
        (Some(from), Some(to)) => Operator::Intersection {
            children: vec![
                selection(Comparator::GreaterOrEquals, from),
                selection(Comparator::LessOrEquals, to),
            ],
            negated_children: Vec::new(),
            row_count,
        },
        (Some(from), None) => selection(Comparator::GreaterOrEquals, from),
        (None, Some(to)) => selection(Comparator::LessOrEquals, to),
        (None, None) => selection(Comparator::GreaterOrEquals, f64::NEG_INFINITY),
    })
}

fn compile_bool_equals<'p>(
    column: &str,
    value: Option<bool>,
    database: &'p Database,
    partition: &'p DatabasePartition,
) -> Result<Operator<'p>, QueryError> {
    expect_type(database, column, ColumnType::Bool)?;
    let row_count = partition.row_count();
    let column_partition = partition
        .bool_column(column)
        .ok_or_else(|| missing_partition_column(column))?;
    Ok(match value {
        Some(constant) => Operator::Selection {
            column: SelectionColumn::Bool {
                values: column_partition.values(),
            },
            comparator: Comparator::Equals,
            value: ScalarValue::Bool(constant),
            row_count,
        },
        None => Operator::IndexScan {
            bitmap: column_partition.null_bitmap(),
            row_count,
        },
    })
}

fn compile_date_between<'p>(
    column: &str,
    from_day: Option<Option<u32>>,
    to_day: Option<Option<u32>>,
    database: &'p Database,
    partition: &'p DatabasePartition,
) -> Result<Operator<'p>, QueryError> {
    expect_type(database, column, ColumnType::Date)?;
    let row_count = partition.row_count();
    let column_partition = partition
        .date_column(column)
        .ok_or_else(|| missing_partition_column(column))?;

    // A lower bound at or before the epoch constrains nothing; an upper
    // bound at or before the epoch excludes every storable date.
    let from_day = match from_day {
        Some(Some(day)) => Some(day),
        Some(None) | None => None,
    };
    let to_day = match to_day {
        Some(Some(day)) => Some(day),
        Some(None) => return Ok(Operator::Empty { row_count }),
        None => None,
    };

    if column_partition.is_sorted() {
        let (from_row, to_row) = column_partition.sorted_range(from_day, to_day);
        return Ok(Operator::RangeSelection {
            from_row,
            to_row,
            row_count,
        });
    }

    let selection = |comparator, constant| Operator::BitmapSelection {
        values: column_partition.days(),
        comparator,
        value: constant,
        row_count,
    };
    Ok(match (from_day, to_day) {
        (Some(from), Some(to)) => Operator::Intersection {
            children: vec![
                selection(Comparator::GreaterOrEquals, from),
                selection(Comparator::LessOrEquals, to),
            ],
            negated_children: Vec::new(),
            row_count,
        },
        (Some(from), None) => selection(Comparator::GreaterOrEquals, from),
        (None, Some(to)) => selection(Comparator::LessOrEquals, to),
        // Unbounded on both sides: every non-null date.
        (None, None) => selection(Comparator::GreaterOrEquals, 1),
    })
}

fn compile_is_null<'p>(
    column: &str,
    database: &'p Database,
    partition: &'p DatabasePartition,
) -> Result<Operator<'p>, QueryError> {
    resolve_type(database, column)?;
    let row_count = partition.row_count();
    let bitmap = partition
        .null_bitmap(column)
        .ok_or_else(|| missing_partition_column(column))?;
    Ok(Operator::IndexScan { bitmap, row_count })
}

fn compile_lineage<'p>(
    column: &str,
    value: &str,
    include_sublineages: bool,
    database: &'p Database,
    partition: &'p DatabasePartition,
) -> Result<Operator<'p>, QueryError> {
    expect_type(database, column, ColumnType::Lineage)?;
    let row_count = partition.row_count();
    // Unknown lineage values match nothing.
    let Some(idx) = database.lineage_tree().lookup(value) else {
        return Ok(Operator::Empty { row_count });
    };
    let column_partition = partition
        .lineage_column(column)
        .ok_or_else(|| missing_partition_column(column))?;
    let bitmap = if include_sublineages {
        column_partition.filter_including_sublineages(idx)
    } else {
        column_partition.filter_exactly(idx)
    };
    Ok(match bitmap {
        Some(bitmap) => Operator::IndexScan { bitmap, row_count },
        None => Operator::Empty { row_count },
    })
}

fn resolve_nucleotide<'p>(
    sequence_name: Option<&str>,
    database: &'p Database,
    partition: &'p DatabasePartition,
) -> Result<&'p SequenceStorePartition<crate::alphabet::Nucleotide>, QueryError> {
    let name = match sequence_name {
        Some(name) => name,
        None => database.default_nucleotide_sequence().ok_or_else(|| {
            bad_request("no sequenceName given and no unique default nucleotide sequence")
        })?,
    };
    if !database
        .reference_genomes()
        .nucleotide_sequences
        .contains_key(name)
    {
        return Err(bad_request(format!("unknown nucleotide sequence: '{name}'")));
    }
    partition
        .nucleotide_sequence(name)
        .ok_or_else(|| missing_partition_column(name))
}

fn resolve_amino_acid<'p>(
    gene: &str,
    database: &'p Database,
    partition: &'p DatabasePartition,
) -> Result<&'p SequenceStorePartition<crate::alphabet::AminoAcid>, QueryError> {
    if !database
        .reference_genomes()
        .aa_sequences
        .contains_key(gene)
    {
        return Err(bad_request(format!("unknown gene: '{gene}'")));
    }
    partition
        .amino_acid_sequence(gene)
        .ok_or_else(|| missing_partition_column(gene))
}

/// One `(position, symbol)` index access: a scan of the stored slot, or the
/// deferred complement for the flipped symbol.
fn symbol_operator<'p, A: Alphabet>(
    store: &'p SequenceStorePartition<A>,
    position: usize,
    symbol: A,
) -> Operator<'p> {
    let row_count = store.row_count();
    match store.stored_bitmap(position, symbol) {
        Some(bitmap) => Operator::IndexScan { bitmap, row_count },
        None => Operator::BitmapProducer {
            producer: Box::new(move || CowBitmap::Owned(store.reconstruct_flipped(position))),
            row_count,
        },
    }
}

fn check_position<A: Alphabet>(
    store: &SequenceStorePartition<A>,
    position: u32,
) -> Result<usize, QueryError> {
    let position = position as usize;
    if position >= store.sequence_length() {
        return Err(bad_request(format!(
            "position {position} out of range, sequence length is {}",
            store.sequence_length()
        )));
    }
    Ok(position)
}

fn compile_symbol_equals<'p, A: Alphabet>(
    store: &'p SequenceStorePartition<A>,
    position: u32,
    symbol_text: &str,
    mode: AmbiguityMode,
) -> Result<Operator<'p>, QueryError> {
    let position = check_position(store, position)?;
    let mut characters = symbol_text.chars();
    let symbol = match (characters.next(), characters.next()) {
        (Some(character), None) => A::from_char(character).ok_or_else(|| {
            bad_request(format!(
                "'{character}' is not a {} symbol",
                A::NAME
            ))
        })?,
        _ => {
            return Err(bad_request(format!(
                "symbol must be a single character, got '{symbol_text}'"
            )))
        }
    };

    let matching = symbols_matching(symbol, mode);
    let row_count = store.row_count();
    let mut children: Vec<Operator<'p>> = matching
        .into_iter()
        .map(|candidate| symbol_operator(store, position, candidate))
        .collect();
    Ok(match children.len() {
        0 => Operator::Empty { row_count },
        1 => children.pop().expect("length checked"),
        _ => Operator::Union {
            children,
            row_count,
        },
    })
}

/// Rows whose symbol is a concrete residue different from the reference.
/// Ambiguity codes and gaps do not count as mutations.
fn compile_has_mutation<'p, A: Alphabet>(
    store: &'p SequenceStorePartition<A>,
    position: u32,
) -> Result<Operator<'p>, QueryError> {
    let position = check_position(store, position)?;
    let reference = store.reference_symbol(position);
    let row_count = store.row_count();
    let children: Vec<Operator<'p>> = A::symbols()
        .iter()
        .copied()
        .filter(|&symbol| symbol.is_base() && symbol != A::GAP && symbol != reference)
        .map(|symbol| symbol_operator(store, position, symbol))
        .collect();
    Ok(Operator::Union {
        children,
        row_count,
    })
}

fn compile_n_of<'p>(
    number_of_matchers: u32,
    match_exactly: bool,
    children: &[FilterExpression],
    database: &'p Database,
    partition: &'p DatabasePartition,
    mode: AmbiguityMode,
) -> Result<Operator<'p>, QueryError> {
    let row_count = partition.row_count();
    let child_count = children.len() as u32;

    if number_of_matchers > child_count {
        return Ok(Operator::Empty { row_count });
    }
    if number_of_matchers == 0 {
        if !match_exactly {
            return Ok(Operator::Full { row_count });
        }
        // Exactly zero matchers: no child may match.
        let compiled = compile_children(children, database, partition, mode)?;
        return Ok(Operator::Intersection {
            children: Vec::new(),
            negated_children: compiled,
            row_count,
        });
    }

    // Degenerate thresholds fold into plain set operations.
    if !match_exactly && number_of_matchers == 1 {
        return compile_or(children, database, partition, mode);
    }
    if !match_exactly && number_of_matchers == child_count {
        let compiled = compile_children(children, database, partition, mode)?;
        return Ok(Operator::Intersection {
            children: compiled,
            negated_children: Vec::new(),
            row_count,
        });
    }

    let compiled = compile_children(children, database, partition, mode)?;
    Ok(Operator::Threshold {
        children: compiled,
        threshold: number_of_matchers,
        match_exactly,
        row_count,
    })
}

fn compile_children<'p>(
    children: &[FilterExpression],
    database: &'p Database,
    partition: &'p DatabasePartition,
    mode: AmbiguityMode,
) -> Result<Vec<Operator<'p>>, QueryError> {
    children
        .iter()
        .map(|child| compile(child, database, partition, mode))
        .collect()
}

//! Bitmap-producing filter operators.
//!
//! The compiler lowers a filter expression to a tree of these operators, one
//! tree per partition. `evaluate` is pure: operators hold shared references
//! into the partition's frozen indices plus owned constants, and the same
//! tree always produces the same bitmap. Logical rewrites (negation
//! pushdown, De Morgan, constant folding) happen structurally via
//! [`Operator::negate`] and the compiler, not during evaluation.
//!
//! Every evaluated bitmap stays within the partition's row domain
//! `[0, row_count)`.

use std::fmt;

use roaring::RoaringBitmap;

use crate::bitmap::{complement_within, full_bitmap, intersect_many, union_many, CowBitmap};
use crate::panic::engine_assert;
use crate::storage::column::OptionalBool;

/// Discriminant of an operator node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    Empty,
    Full,
    IndexScan,
    BitmapProducer,
    BitmapSelection,
    RangeSelection,
    Selection,
    Intersection,
    Union,
    Complement,
    Threshold,
}

/// Comparison predicate for scan-based operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equals,
    NotEquals,
    Less,
    LessOrEquals,
    Greater,
    GreaterOrEquals,
}

impl Comparator {
    fn matches<T: PartialOrd>(self, value: &T, constant: &T) -> bool {
        let Some(ordering) = value.partial_cmp(constant) else {
            // Incomparable values (NaN) never match.
            return false;
        };
        match self {
            Comparator::Equals => ordering.is_eq(),
            Comparator::NotEquals => ordering.is_ne(),
            Comparator::Less => ordering.is_lt(),
            Comparator::LessOrEquals => ordering.is_le(),
            Comparator::Greater => ordering.is_gt(),
            Comparator::GreaterOrEquals => ordering.is_ge(),
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Comparator::Equals => "=",
            Comparator::NotEquals => "!=",
            Comparator::Less => "<",
            Comparator::LessOrEquals => "<=",
            Comparator::Greater => ">",
            Comparator::GreaterOrEquals => ">=",
        };
        f.write_str(symbol)
    }
}

/// Typed view of a column for scan-based selection.
pub enum SelectionColumn<'a> {
    Int {
        values: &'a [i64],
        nulls: &'a RoaringBitmap,
    },
    Float {
        values: &'a [f64],
    },
    Bool {
        values: &'a [OptionalBool],
    },
}

/// Constant compared against by a [`SelectionColumn`] scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Int(value) => write!(f, "{value}"),
            ScalarValue::Float(value) => write!(f, "{value}"),
            ScalarValue::Bool(value) => write!(f, "{value}"),
        }
    }
}

/// Deferred bitmap computation; the fallback representation for negations
/// and reconstructed index slots.
pub type BitmapClosure<'a> = Box<dyn Fn() -> CowBitmap<'a> + Send + Sync + 'a>;

/// A node in the per-partition filter plan.
pub enum Operator<'a> {
    /// The empty set.
    Empty { row_count: u32 },
    /// The whole row domain.
    Full { row_count: u32 },
    /// Copy-on-write view of a stored index bitmap.
    IndexScan {
        bitmap: &'a RoaringBitmap,
        row_count: u32,
    },
    /// Owned bitmap produced by a closure.
    BitmapProducer {
        producer: BitmapClosure<'a>,
        row_count: u32,
    },
    /// Comparator scan over a raw `u32` value vector (day numbers, ids),
    /// where 0 is the null sentinel and never matches.
    BitmapSelection {
        values: &'a [u32],
        comparator: Comparator,
        value: u32,
        row_count: u32,
    },
    /// Contiguous row range `[from_row, to_row)` of a sorted column.
    RangeSelection {
        from_row: u32,
        to_row: u32,
        row_count: u32,
    },
    /// Comparator scan over a typed column; null rows never match.
    Selection {
        column: SelectionColumn<'a>,
        comparator: Comparator,
        value: ScalarValue,
        row_count: u32,
    },
    /// Intersection of `children` minus the union of `negated_children`.
    Intersection {
        children: Vec<Operator<'a>>,
        negated_children: Vec<Operator<'a>>,
        row_count: u32,
    },
    /// Union of all children.
    Union {
        children: Vec<Operator<'a>>,
        row_count: u32,
    },
    /// Row domain minus the child.
    Complement {
        child: Box<Operator<'a>>,
        row_count: u32,
    },
    /// Rows contained in at least (or exactly) `threshold` children.
    Threshold {
        children: Vec<Operator<'a>>,
        threshold: u32,
        match_exactly: bool,
        row_count: u32,
    },
}

impl<'a> Operator<'a> {
    pub fn kind(&self) -> OperatorKind {
        match self {
            Operator::Empty { .. } => OperatorKind::Empty,
            Operator::Full { .. } => OperatorKind::Full,
            Operator::IndexScan { .. } => OperatorKind::IndexScan,
            Operator::BitmapProducer { .. } => OperatorKind::BitmapProducer,
            Operator::BitmapSelection { .. } => OperatorKind::BitmapSelection,
            Operator::RangeSelection { .. } => OperatorKind::RangeSelection,
            Operator::Selection { .. } => OperatorKind::Selection,
            Operator::Intersection { .. } => OperatorKind::Intersection,
            Operator::Union { .. } => OperatorKind::Union,
            Operator::Complement { .. } => OperatorKind::Complement,
            Operator::Threshold { .. } => OperatorKind::Threshold,
        }
    }

    pub fn row_count(&self) -> u32 {
        match self {
            Operator::Empty { row_count }
            | Operator::Full { row_count }
            | Operator::IndexScan { row_count, .. }
            | Operator::BitmapProducer { row_count, .. }
            | Operator::BitmapSelection { row_count, .. }
            | Operator::RangeSelection { row_count, .. }
            | Operator::Selection { row_count, .. }
            | Operator::Intersection { row_count, .. }
            | Operator::Union { row_count, .. }
            | Operator::Complement { row_count, .. }
            | Operator::Threshold { row_count, .. } => *row_count,
        }
    }

    /// Evaluate the subtree to a row-id bitmap.
    pub fn evaluate(&self) -> CowBitmap<'a> {
        match self {
            Operator::Empty { .. } => CowBitmap::empty(),
            Operator::Full { row_count } => CowBitmap::full(*row_count),
            Operator::IndexScan { bitmap, .. } => CowBitmap::Borrowed(*bitmap),
            Operator::BitmapProducer { producer, .. } => producer(),
            Operator::BitmapSelection {
                values,
                comparator,
                value,
                ..
            } => {
                let mut result = RoaringBitmap::new();
                for (row, &stored) in values.iter().enumerate() {
                    if stored != 0 && comparator.matches(&stored, value) {
                        result.insert(row as u32);
                    }
                }
                CowBitmap::Owned(result)
            }
            Operator::RangeSelection {
                from_row, to_row, ..
            } => {
                let mut result = RoaringBitmap::new();
                result.insert_range(*from_row..*to_row);
                CowBitmap::Owned(result)
            }
            Operator::Selection {
                column,
                comparator,
                value,
                ..
            } => CowBitmap::Owned(evaluate_selection(column, *comparator, *value)),
            Operator::Intersection {
                children,
                negated_children,
                row_count,
            } => {
                let mut result = if children.is_empty() {
                    CowBitmap::full(*row_count)
                } else {
                    intersect_many(children.iter().map(Operator::evaluate).collect())
                };
                for negated in negated_children {
                    if result.is_empty() {
                        break;
                    }
                    *result.to_mut() -= negated.evaluate().as_bitmap();
                }
                result
            }
            Operator::Union { children, .. } => {
                union_many(children.iter().map(Operator::evaluate).collect())
            }
            Operator::Complement { child, row_count } => CowBitmap::Owned(complement_within(
                child.evaluate().as_bitmap(),
                *row_count,
            )),
            Operator::Threshold {
                children,
                threshold,
                match_exactly,
                ..
            } => evaluate_threshold(children, *threshold, *match_exactly),
        }
    }

    /// A logically complemented tree.
    ///
    /// Rewrites structurally where a cheaper form exists; the generic
    /// fallback wraps in [`Operator::Complement`].
    pub fn negate(operator: Operator<'a>) -> Operator<'a> {
        match operator {
            Operator::Empty { row_count } => Operator::Full { row_count },
            Operator::Full { row_count } => Operator::Empty { row_count },
            Operator::Complement { child, .. } => *child,
            Operator::Intersection {
                children,
                negated_children,
                row_count,
            } => {
                // ¬(a ∩ b − c − d) = ¬a ∪ ¬b ∪ c ∪ d
                let mut union_children: Vec<Operator<'a>> =
                    children.into_iter().map(Operator::negate).collect();
                union_children.extend(negated_children);
                Operator::Union {
                    children: union_children,
                    row_count,
                }
            }
            Operator::Union {
                children,
                row_count,
            } => {
                // De Morgan, rendered with subtracted children so the
                // negations stay implicit.
                Operator::Intersection {
                    children: Vec::new(),
                    negated_children: children,
                    row_count,
                }
            }
            Operator::IndexScan { bitmap, row_count } => Operator::BitmapProducer {
                producer: Box::new(move || {
                    CowBitmap::Owned(complement_within(bitmap, row_count))
                }),
                row_count,
            },
            other => {
                let row_count = other.row_count();
                Operator::Complement {
                    child: Box::new(other),
                    row_count,
                }
            }
        }
    }
}

fn evaluate_selection(
    column: &SelectionColumn<'_>,
    comparator: Comparator,
    value: ScalarValue,
) -> RoaringBitmap {
    let mut result = RoaringBitmap::new();
    match (column, value) {
        (SelectionColumn::Int { values, nulls }, ScalarValue::Int(constant)) => {
            for (row, stored) in values.iter().enumerate() {
                if !nulls.contains(row as u32) && comparator.matches(stored, &constant) {
                    result.insert(row as u32);
                }
            }
        }
        (SelectionColumn::Float { values }, ScalarValue::Float(constant)) => {
            for (row, stored) in values.iter().enumerate() {
                // NaN (the null sentinel) is incomparable and never matches.
                if comparator.matches(stored, &constant) {
                    result.insert(row as u32);
                }
            }
        }
        (SelectionColumn::Bool { values }, ScalarValue::Bool(constant)) => {
            for (row, stored) in values.iter().enumerate() {
                if let Some(stored) = stored.as_option() {
                    if comparator.matches(&stored, &constant) {
                        result.insert(row as u32);
                    }
                }
            }
        }
        _ => crate::panic::invariant_violation("selection column and constant types disagree"),
    }
    result
}

/// Counting merge: `counts[j]` holds rows contained in at least `j + 1` of
/// the children folded so far.
fn evaluate_threshold<'a>(
    children: &[Operator<'a>],
    threshold: u32,
    match_exactly: bool,
) -> CowBitmap<'a> {
    engine_assert!(threshold >= 1, "threshold {threshold} must be positive");
    let target = threshold as usize;
    let layers = if match_exactly { target + 1 } else { target };
    let mut counts: Vec<RoaringBitmap> = vec![RoaringBitmap::new(); layers];
    for child in children {
        let evaluated = child.evaluate();
        let bitmap = evaluated.as_bitmap();
        for layer in (0..layers - 1).rev() {
            let promoted = &counts[layer] & bitmap;
            counts[layer + 1] |= promoted;
        }
        counts[0] |= bitmap;
    }
    let mut result = std::mem::take(&mut counts[target - 1]);
    if match_exactly {
        result -= &counts[target];
    }
    CowBitmap::Owned(result)
}

impl fmt::Display for Operator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Empty { .. } => write!(f, "Empty"),
            Operator::Full { .. } => write!(f, "Full"),
            Operator::IndexScan { bitmap, .. } => {
                write!(f, "IndexScan(cardinality: {})", bitmap.len())
            }
            Operator::BitmapProducer { row_count, .. } => {
                write!(f, "BitmapProducer(row_count: {row_count})")
            }
            Operator::BitmapSelection {
                comparator, value, ..
            } => write!(f, "BitmapSelection({comparator} {value})"),
            Operator::RangeSelection {
                from_row, to_row, ..
            } => write!(f, "RangeSelection([{from_row}, {to_row}))"),
            Operator::Selection {
                comparator, value, ..
            } => write!(f, "Selection({comparator} {value})"),
            Operator::Intersection {
                children,
                negated_children,
                ..
            } => {
                write!(f, "Intersection(")?;
                for (index, child) in children.iter().enumerate() {
                    if index > 0 {
                        write!(f, " & ")?;
                    }
                    write!(f, "{child}")?;
                }
                for child in negated_children {
                    write!(f, " - {child}")?;
                }
                write!(f, ")")
            }
            Operator::Union { children, .. } => {
                write!(f, "Union(")?;
                for (index, child) in children.iter().enumerate() {
                    if index > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
            Operator::Complement { child, .. } => write!(f, "Complement({child})"),
            Operator::Threshold {
                children,
                threshold,
                match_exactly,
                ..
            } => write!(
                f,
                "Threshold({} children, threshold: {threshold}, exact: {match_exactly})",
                children.len()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap_of(values: &[u32]) -> RoaringBitmap {
        values.iter().copied().collect()
    }

    fn scan(bitmap: &RoaringBitmap, row_count: u32) -> Operator<'_> {
        Operator::IndexScan { bitmap, row_count }
    }

    #[test]
    fn test_constants() {
        let empty = Operator::Empty { row_count: 4 };
        assert!(empty.evaluate().is_empty());
        let full = Operator::Full { row_count: 4 };
        assert_eq!(full.evaluate().as_bitmap(), &bitmap_of(&[0, 1, 2, 3]));
    }

    #[test]
    fn test_index_scan_borrows() {
        let stored = bitmap_of(&[1, 3]);
        let operator = scan(&stored, 4);
        assert_eq!(operator.kind(), OperatorKind::IndexScan);
        match operator.evaluate() {
            CowBitmap::Borrowed(bitmap) => assert_eq!(bitmap, &stored),
            CowBitmap::Owned(_) => panic!("index scans must not copy"),
        }
    }

    #[test]
    fn test_intersection_with_negated_children() {
        let a = bitmap_of(&[0, 1, 2, 3]);
        let b = bitmap_of(&[1, 2, 3]);
        let c = bitmap_of(&[2]);
        let operator = Operator::Intersection {
            children: vec![scan(&a, 5), scan(&b, 5)],
            negated_children: vec![scan(&c, 5)],
            row_count: 5,
        };
        assert_eq!(operator.evaluate().as_bitmap(), &bitmap_of(&[1, 3]));
    }

    #[test]
    fn test_intersection_without_positives_starts_full() {
        let c = bitmap_of(&[0, 4]);
        let operator = Operator::Intersection {
            children: Vec::new(),
            negated_children: vec![scan(&c, 5)],
            row_count: 5,
        };
        assert_eq!(operator.evaluate().as_bitmap(), &bitmap_of(&[1, 2, 3]));
    }

    #[test]
    fn test_union() {
        let a = bitmap_of(&[0]);
        let b = bitmap_of(&[2]);
        let operator = Operator::Union {
            children: vec![scan(&a, 4), scan(&b, 4)],
            row_count: 4,
        };
        assert_eq!(operator.evaluate().as_bitmap(), &bitmap_of(&[0, 2]));
    }

    #[test]
    fn test_complement() {
        let a = bitmap_of(&[0, 2]);
        let operator = Operator::Complement {
            child: Box::new(scan(&a, 4)),
            row_count: 4,
        };
        assert_eq!(operator.evaluate().as_bitmap(), &bitmap_of(&[1, 3]));
    }

    #[test]
    fn test_threshold_at_least() {
        let a = bitmap_of(&[0, 1, 2]);
        let b = bitmap_of(&[0, 1]);
        let c = bitmap_of(&[0, 2]);
        let operator = Operator::Threshold {
            children: vec![scan(&a, 4), scan(&b, 4), scan(&c, 4)],
            threshold: 2,
            match_exactly: false,
            row_count: 4,
        };
        assert_eq!(operator.evaluate().as_bitmap(), &bitmap_of(&[0, 1, 2]));
    }

    #[test]
    fn test_threshold_exact() {
        let a = bitmap_of(&[0, 1, 2]);
        let b = bitmap_of(&[0, 1]);
        let c = bitmap_of(&[0, 2]);
        let operator = Operator::Threshold {
            children: vec![scan(&a, 4), scan(&b, 4), scan(&c, 4)],
            threshold: 2,
            match_exactly: true,
            row_count: 4,
        };
        assert_eq!(operator.evaluate().as_bitmap(), &bitmap_of(&[1, 2]));
    }

    #[test]
    fn test_threshold_more_than_children_is_empty() {
        let a = bitmap_of(&[0]);
        let operator = Operator::Threshold {
            children: vec![scan(&a, 2)],
            threshold: 2,
            match_exactly: false,
            row_count: 2,
        };
        assert!(operator.evaluate().is_empty());
    }

    #[test]
    fn test_negate_constants() {
        assert_eq!(
            Operator::negate(Operator::Empty { row_count: 3 }).kind(),
            OperatorKind::Full
        );
        assert_eq!(
            Operator::negate(Operator::Full { row_count: 3 }).kind(),
            OperatorKind::Empty
        );
    }

    #[test]
    fn test_negate_unwraps_complement() {
        let a = bitmap_of(&[1]);
        let operator = Operator::Complement {
            child: Box::new(scan(&a, 3)),
            row_count: 3,
        };
        let negated = Operator::negate(operator);
        assert_eq!(negated.kind(), OperatorKind::IndexScan);
        assert_eq!(negated.evaluate().as_bitmap(), &a);
    }

    #[test]
    fn test_negate_index_scan_becomes_producer() {
        let a = bitmap_of(&[0, 2]);
        let negated = Operator::negate(scan(&a, 4));
        assert_eq!(negated.kind(), OperatorKind::BitmapProducer);
        assert_eq!(negated.evaluate().as_bitmap(), &bitmap_of(&[1, 3]));
    }

    #[test]
    fn test_negate_union_uses_subtracted_intersection() {
        let a = bitmap_of(&[0]);
        let b = bitmap_of(&[1]);
        let union = Operator::Union {
            children: vec![scan(&a, 4), scan(&b, 4)],
            row_count: 4,
        };
        let negated = Operator::negate(union);
        assert_eq!(negated.kind(), OperatorKind::Intersection);
        assert_eq!(negated.evaluate().as_bitmap(), &bitmap_of(&[2, 3]));
    }

    #[test]
    fn test_double_negation_is_identity() {
        let a = bitmap_of(&[0, 3, 4]);
        let b = bitmap_of(&[1, 3]);
        let tree = Operator::Intersection {
            children: vec![scan(&a, 6)],
            negated_children: vec![scan(&b, 6)],
            row_count: 6,
        };
        let expected = tree.evaluate().into_owned();
        let twice = Operator::negate(Operator::negate(tree));
        assert_eq!(twice.evaluate().as_bitmap(), &expected);
    }

    #[test]
    fn test_bitmap_selection_skips_null_sentinel() {
        let values = vec![0u32, 5, 10, 0, 7];
        let operator = Operator::BitmapSelection {
            values: &values,
            comparator: Comparator::GreaterOrEquals,
            value: 1,
            row_count: 5,
        };
        // Rows 0 and 3 hold the null sentinel and never match.
        assert_eq!(operator.evaluate().as_bitmap(), &bitmap_of(&[1, 2, 4]));
    }

    #[test]
    fn test_selection_skips_nulls() {
        let values = vec![10i64, 0, 20];
        let nulls = bitmap_of(&[1]);
        let operator = Operator::Selection {
            column: SelectionColumn::Int {
                values: &values,
                nulls: &nulls,
            },
            comparator: Comparator::LessOrEquals,
            value: ScalarValue::Int(15),
            row_count: 3,
        };
        // Row 1 stores 0 but is null; comparisons never match it.
        assert_eq!(operator.evaluate().as_bitmap(), &bitmap_of(&[0]));
    }

    #[test]
    fn test_float_nan_never_matches() {
        let values = vec![1.5f64, f64::NAN, 3.0];
        let operator = Operator::Selection {
            column: SelectionColumn::Float { values: &values },
            comparator: Comparator::NotEquals,
            value: ScalarValue::Float(99.0),
            row_count: 3,
        };
        assert_eq!(operator.evaluate().as_bitmap(), &bitmap_of(&[0, 2]));
    }

    #[test]
    fn test_to_string() {
        let a = bitmap_of(&[1, 2]);
        let operator = Operator::Union {
            children: vec![
                scan(&a, 4),
                Operator::Empty { row_count: 4 },
            ],
            row_count: 4,
        };
        assert_eq!(operator.to_string(), "Union(IndexScan(cardinality: 2) | Empty)");
    }
}

//! The filter-expression algebra of the JSON query surface.
//!
//! Every node carries a `"type"` tag. Expressions are pure descriptions;
//! resolution against a concrete database (column types, dictionary ids,
//! lineage ids, sequence names) happens in the compiler.
//!
//! Positions in mutation nodes are 0-based. Dates are `YYYY-MM-DD`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A parsed filter expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FilterExpression {
    /// Matches every row.
    True,
    /// Matches no row.
    False,
    And {
        children: Vec<FilterExpression>,
    },
    Or {
        children: Vec<FilterExpression>,
    },
    Not {
        child: Box<FilterExpression>,
    },
    /// Exact match on a dictionary-encoded string column.
    StringEquals {
        column: String,
        value: String,
    },
    IntEquals {
        column: String,
        value: i64,
    },
    /// Closed range; either bound may be omitted.
    IntBetween {
        column: String,
        #[serde(default)]
        from: Option<i64>,
        #[serde(default)]
        to: Option<i64>,
    },
    FloatBetween {
        column: String,
        #[serde(default)]
        from: Option<f64>,
        #[serde(default)]
        to: Option<f64>,
    },
    /// `value: null` selects rows where the column is null.
    BoolEquals {
        column: String,
        value: Option<bool>,
    },
    DateBetween {
        column: String,
        #[serde(default)]
        from: Option<NaiveDate>,
        #[serde(default)]
        to: Option<NaiveDate>,
    },
    IsNull {
        column: String,
    },
    /// Lineage match, optionally covering the whole subtree.
    #[serde(alias = "LineageFilter", alias = "PangoLineage")]
    Lineage {
        column: String,
        value: String,
        #[serde(rename = "includeSublineages", default)]
        include_sublineages: bool,
    },
    /// Symbol match at a nucleotide position. `sequenceName` defaults to the
    /// database's single nucleotide sequence.
    NucleotideEquals {
        #[serde(rename = "sequenceName", default)]
        sequence_name: Option<String>,
        position: u32,
        symbol: String,
    },
    /// Symbol match at an amino-acid position of a gene.
    AminoAcidEquals {
        gene: String,
        position: u32,
        symbol: String,
    },
    /// Any concrete base other than the reference base at this position.
    HasNucleotideMutation {
        #[serde(rename = "sequenceName", default)]
        sequence_name: Option<String>,
        position: u32,
    },
    HasAminoAcidMutation {
        gene: String,
        position: u32,
    },
    /// At least (or exactly) `numberOfMatchers` children match.
    NOf {
        #[serde(rename = "numberOfMatchers")]
        number_of_matchers: u32,
        #[serde(rename = "matchExactly", default)]
        match_exactly: bool,
        children: Vec<FilterExpression>,
    },
    /// Evaluate the child permissively: ambiguity codes match any stored
    /// symbol they could represent.
    Maybe {
        child: Box<FilterExpression>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_node_shape() {
        let expression: FilterExpression = serde_json::from_str(
            r#"{"type": "NucleotideEquals", "position": 23403, "symbol": "G"}"#,
        )
        .expect("valid");
        match expression {
            FilterExpression::NucleotideEquals {
                sequence_name,
                position,
                symbol,
            } => {
                assert_eq!(sequence_name, None);
                assert_eq!(position, 23403);
                assert_eq!(symbol, "G");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_lineage_filter_aliases() {
        for type_name in ["Lineage", "LineageFilter", "PangoLineage"] {
            let json = format!(
                r#"{{"type": "{type_name}", "column": "pango_lineage",
                     "value": "B.1.617.2", "includeSublineages": true}}"#
            );
            let expression: FilterExpression =
                serde_json::from_str(&json).expect("alias accepted");
            assert!(matches!(
                expression,
                FilterExpression::Lineage {
                    include_sublineages: true,
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_date_bounds_parse_as_iso_dates() {
        let expression: FilterExpression = serde_json::from_str(
            r#"{"type": "DateBetween", "column": "date", "from": "2021-06-01"}"#,
        )
        .expect("valid");
        match expression {
            FilterExpression::DateBetween { from, to, .. } => {
                assert_eq!(from, NaiveDate::from_ymd_opt(2021, 6, 1));
                assert_eq!(to, None);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_n_of_shape() {
        let expression: FilterExpression = serde_json::from_str(
            r#"{"type": "NOf", "numberOfMatchers": 2, "matchExactly": false,
                "children": [{"type": "True"}, {"type": "False"}]}"#,
        )
        .expect("valid");
        assert!(matches!(
            expression,
            FilterExpression::NOf {
                number_of_matchers: 2,
                match_exactly: false,
                ..
            }
        ));
    }
}

//! Metadata filter predicates.
//!
//! Narrower than a generic field/value filter system: the leaves are
//! pinned to the recognized [`crate::metadata::MetadataRecord`] slots.
//! Composition (AND/OR/NOT) and short-circuit evaluation work the usual way.

use serde::{Deserialize, Serialize};

use crate::metadata::{Bias, MetadataRecord};

/// A numeric comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericOp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `=`
    Eq,
    /// `>=`
    Ge,
    /// `>`
    Gt,
}

impl NumericOp {
    fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Eq => (lhs - rhs).abs() < f64::EPSILON,
            Self::Ge => lhs >= rhs,
            Self::Gt => lhs > rhs,
        }
    }
}

/// A metadata filter predicate, composable via AND/OR/NOT.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    /// `doc_type == value`.
    DocType {
        /// Expected document type.
        value: String,
    },
    /// `date ∈ [from, to]`, inclusive. A null/missing date never matches.
    DateRange {
        /// Inclusive lower bound (`YYYY-MM-DD`).
        from: String,
        /// Inclusive upper bound (`YYYY-MM-DD`).
        to: String,
    },
    /// `asset_tag == value`.
    AssetTag {
        /// Expected asset tag.
        value: String,
    },
    /// `bias ∈ values`.
    BiasIn {
        /// Acceptable bias values.
        values: Vec<Bias>,
    },
    /// `numeric_attribute_name op x`.
    Numeric {
        /// Attribute name to read from the record's numeric/extra bag.
        field: String,
        /// Comparison operator.
        op: NumericOp,
        /// Right-hand side constant.
        value: f64,
    },
    /// Logical AND of all sub-predicates (empty list is vacuously true).
    And(Vec<Predicate>),
    /// Logical OR of all sub-predicates (empty list is vacuously false).
    Or(Vec<Predicate>),
    /// Logical negation.
    Not(Box<Predicate>),
}

impl Predicate {
    /// Evaluates the predicate against a metadata record. O(predicate depth).
    #[must_use]
    pub fn matches(&self, record: &MetadataRecord) -> bool {
        match self {
            Self::DocType { value } => record.doc_type.as_deref() == Some(value.as_str()),
            Self::DateRange { from, to } => record
                .date
                .as_deref()
                .is_some_and(|d| d >= from.as_str() && d <= to.as_str()),
            Self::AssetTag { value } => record.asset_tag.as_deref() == Some(value.as_str()),
            Self::BiasIn { values } => record.bias.is_some_and(|b| values.contains(&b)),
            Self::Numeric { field, op, value } => record
                .numeric_attr(field)
                .is_some_and(|v| op.apply(v, *value)),
            Self::And(preds) => preds.iter().all(|p| p.matches(record)),
            Self::Or(preds) => preds.iter().any(|p| p.matches(record)),
            Self::Not(inner) => !inner.matches(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(doc_type: &str, date: &str) -> MetadataRecord {
        MetadataRecord {
            doc_type: Some(doc_type.into()),
            date: Some(date.into()),
            ..MetadataRecord::empty()
        }
    }

    #[test]
    fn doc_type_matches_exact() {
        let p = Predicate::DocType {
            value: "journal".into(),
        };
        assert!(p.matches(&record("journal", "2024-01-01")));
        assert!(!p.matches(&record("chart", "2024-01-01")));
    }

    #[test]
    fn date_range_is_inclusive_and_null_never_matches() {
        let p = Predicate::DateRange {
            from: "2024-01-01".into(),
            to: "2024-12-31".into(),
        };
        assert!(p.matches(&record("journal", "2024-06-15")));
        assert!(p.matches(&record("journal", "2024-01-01")));
        assert!(!p.matches(&record("journal", "2023-12-31")));
        assert!(!p.matches(&MetadataRecord::empty()));
    }

    #[test]
    fn numeric_op_ge() {
        let mut rec = MetadataRecord::empty();
        rec.numeric.insert("confidence".into(), 0.8);
        let p = Predicate::Numeric {
            field: "confidence".into(),
            op: NumericOp::Ge,
            value: 0.5,
        };
        assert!(p.matches(&rec));
    }

    #[test]
    fn and_or_not_compose() {
        let rec = record("journal", "2024-06-01");
        let p = Predicate::And(vec![
            Predicate::DocType {
                value: "journal".into(),
            },
            Predicate::Not(Box::new(Predicate::DocType {
                value: "chart".into(),
            })),
        ]);
        assert!(p.matches(&rec));

        let p2 = Predicate::Or(vec![
            Predicate::DocType {
                value: "chart".into(),
            },
            Predicate::DocType {
                value: "journal".into(),
            },
        ]);
        assert!(p2.matches(&rec));
    }
}

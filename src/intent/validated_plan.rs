//! Validated Plan
//!
//! Output of the plan validator. Field names are whitelisted, aggregations are
//! compatible with their fields and every filter carries exactly the operands its
//! operator needs.

use crate::semantic::field::{Aggregation, FilterOp};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ValidatedPlan {
    /// Terminal: ask the caller a follow-up question, execute nothing
    Clarification { dataset: String, question: String },
    Query(ValidatedQuery),
}

impl ValidatedPlan {
    pub fn as_query(&self) -> Option<&ValidatedQuery> {
        match self {
            ValidatedPlan::Query(q) => Some(q),
            ValidatedPlan::Clarification { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedQuery {
    /// Canonical dataset code
    pub dataset: String,
    pub dimensions: Vec<ValidatedDimension>,
    pub measures: Vec<ValidatedMeasure>,
    pub filters: Vec<ValidatedFilter>,
    pub order_by: Vec<ValidatedOrder>,
    /// Within `[1, max_limit]`
    pub limit: u32,
    /// Every field referenced anywhere in the plan
    pub used_fields: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedDimension {
    pub field: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedMeasure {
    pub agg: Aggregation,
    pub field: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedFilter {
    pub field: String,
    pub predicate: Predicate,
}

/// Filter operator together with the operand shape it requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Predicate {
    Compare { op: CompareOp, value: String },
    In { values: Vec<String> },
    Between { from: String, to: String },
}

impl Predicate {
    pub fn op(&self) -> FilterOp {
        match self {
            Predicate::Compare { op, .. } => op.filter_op(),
            Predicate::In { .. } => FilterOp::In,
            Predicate::Between { .. } => FilterOp::Between,
        }
    }

    /// Number of `?` placeholders this predicate compiles to.
    pub fn placeholder_count(&self) -> usize {
        match self {
            Predicate::Compare { .. } => 1,
            Predicate::In { values } => values.len(),
            Predicate::Between { .. } => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    /// `None` for IN and BETWEEN, which are not single-operand comparisons.
    pub fn from_filter_op(op: FilterOp) -> Option<Self> {
        match op {
            FilterOp::Eq => Some(CompareOp::Eq),
            FilterOp::Ne => Some(CompareOp::Ne),
            FilterOp::Gt => Some(CompareOp::Gt),
            FilterOp::Gte => Some(CompareOp::Gte),
            FilterOp::Lt => Some(CompareOp::Lt),
            FilterOp::Lte => Some(CompareOp::Lte),
            FilterOp::In | FilterOp::Between => None,
        }
    }

    pub fn filter_op(&self) -> FilterOp {
        match self {
            CompareOp::Eq => FilterOp::Eq,
            CompareOp::Ne => FilterOp::Ne,
            CompareOp::Gt => FilterOp::Gt,
            CompareOp::Gte => FilterOp::Gte,
            CompareOp::Lt => FilterOp::Lt,
            CompareOp::Lte => FilterOp::Lte,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedOrder {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ASC" => Some(SortDirection::Asc),
            "DESC" => Some(SortDirection::Desc),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_op_mapping() {
        for op in FilterOp::ALL {
            match CompareOp::from_filter_op(op) {
                Some(cmp) => assert_eq!(cmp.filter_op(), op),
                None => assert!(matches!(op, FilterOp::In | FilterOp::Between)),
            }
        }
        assert_eq!(CompareOp::Ne.as_sql(), "<>");
    }

    #[test]
    fn test_placeholder_count() {
        let p = Predicate::In {
            values: vec!["A".into(), "B".into(), "C".into()],
        };
        assert_eq!(p.placeholder_count(), 3);
        assert_eq!(p.op(), FilterOp::In);
        let b = Predicate::Between {
            from: "1".into(),
            to: "2".into(),
        };
        assert_eq!(b.placeholder_count(), 2);
    }

    #[test]
    fn test_sort_direction_parse() {
        assert_eq!(SortDirection::parse(" desc "), Some(SortDirection::Desc));
        assert_eq!(SortDirection::parse("ASC"), Some(SortDirection::Asc));
        assert_eq!(SortDirection::parse("DOWN"), None);
    }
}

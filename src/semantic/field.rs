//! Field Definitions
//!
//! Logical fields, their storage expressions and the aggregation / filter vocabulary
//! the compiler understands.

use serde::{Deserialize, Serialize};

/// Declared value type of a field, used to cast filter operands before binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Integer,
    Decimal,
    Timestamp,
    Text,
}

/// SQL flavor a field expression is rendered in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    MySql,
    Sqlite,
}

/// Aggregation function type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Aggregation {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregation {
    pub const ALL: [Aggregation; 6] = [
        Aggregation::Count,
        Aggregation::CountDistinct,
        Aggregation::Sum,
        Aggregation::Avg,
        Aggregation::Min,
        Aggregation::Max,
    ];

    /// Plan-level code, e.g. `COUNT_DISTINCT`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Count => "COUNT",
            Aggregation::CountDistinct => "COUNT_DISTINCT",
            Aggregation::Sum => "SUM",
            Aggregation::Avg => "AVG",
            Aggregation::Min => "MIN",
            Aggregation::Max => "MAX",
        }
    }

    /// Case-insensitive parse of a plan-level code.
    pub fn parse(raw: &str) -> Option<Self> {
        let code = raw.trim().to_ascii_uppercase();
        Self::ALL.into_iter().find(|agg| agg.as_str() == code)
    }

    /// COUNT and COUNT_DISTINCT apply to every field; the rest need a numeric field.
    pub fn requires_numeric(&self) -> bool {
        !matches!(self, Aggregation::Count | Aggregation::CountDistinct)
    }

    /// Wrap a storage expression in this aggregation.
    pub fn wrap(&self, expr: &str) -> String {
        match self {
            Aggregation::Count => format!("COUNT({})", expr),
            Aggregation::CountDistinct => format!("COUNT(DISTINCT {})", expr),
            Aggregation::Sum => format!("SUM({})", expr),
            Aggregation::Avg => format!("AVG({})", expr),
            Aggregation::Min => format!("MIN({})", expr),
            Aggregation::Max => format!("MAX({})", expr),
        }
    }
}

/// Filter operators accepted in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterOp {
    Eq,
    Ne,
    In,
    Gt,
    Gte,
    Lt,
    Lte,
    Between,
}

impl FilterOp {
    pub const ALL: [FilterOp; 8] = [
        FilterOp::Eq,
        FilterOp::Ne,
        FilterOp::In,
        FilterOp::Gt,
        FilterOp::Gte,
        FilterOp::Lt,
        FilterOp::Lte,
        FilterOp::Between,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "EQ",
            FilterOp::Ne => "NE",
            FilterOp::In => "IN",
            FilterOp::Gt => "GT",
            FilterOp::Gte => "GTE",
            FilterOp::Lt => "LT",
            FilterOp::Lte => "LTE",
            FilterOp::Between => "BETWEEN",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let code = raw.trim().to_ascii_uppercase();
        Self::ALL.into_iter().find(|op| op.as_str() == code)
    }
}

/// One logical field of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub name: &'static str,
    /// SQL expression over the base relation and its joins (MySQL)
    pub expression: &'static str,
    /// Replacement for `expression` on SQLite, when the MySQL form does not run there
    pub sqlite_expression: Option<&'static str>,
    pub value_type: ValueType,
    /// Expression references a joined table
    pub requires_join: bool,
    /// SUM / AVG / MIN / MAX are legal on this field
    pub numeric_aggregate: bool,
}

impl FieldDefinition {
    pub const fn new(name: &'static str, expression: &'static str, value_type: ValueType) -> Self {
        Self {
            name,
            expression,
            sqlite_expression: None,
            value_type,
            requires_join: false,
            numeric_aggregate: false,
        }
    }

    pub const fn joined(mut self) -> Self {
        self.requires_join = true;
        self
    }

    pub const fn numeric(mut self) -> Self {
        self.numeric_aggregate = true;
        self
    }

    pub const fn on_sqlite(mut self, expression: &'static str) -> Self {
        self.sqlite_expression = Some(expression);
        self
    }

    pub fn expression_in(&self, dialect: SqlDialect) -> &'static str {
        match (dialect, self.sqlite_expression) {
            (SqlDialect::Sqlite, Some(expr)) => expr,
            _ => self.expression,
        }
    }

    pub fn supports(&self, agg: Aggregation) -> bool {
        !agg.requires_numeric() || self.numeric_aggregate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregation_parse_is_case_insensitive() {
        assert_eq!(Aggregation::parse(" count_distinct "), Some(Aggregation::CountDistinct));
        assert_eq!(Aggregation::parse("Sum"), Some(Aggregation::Sum));
        assert_eq!(Aggregation::parse("MEDIAN"), None);
    }

    #[test]
    fn test_aggregation_wrap() {
        assert_eq!(Aggregation::CountDistinct.wrap("t.assignee_id"), "COUNT(DISTINCT t.assignee_id)");
        assert_eq!(Aggregation::Avg.wrap("t.workload_man_day"), "AVG(t.workload_man_day)");
    }

    #[test]
    fn test_field_supports() {
        let id = FieldDefinition::new("TASK_ID", "t.id", ValueType::Integer);
        let workload =
            FieldDefinition::new("WORKLOAD_MAN_DAY", "t.workload_man_day", ValueType::Decimal).numeric();

        assert!(id.supports(Aggregation::Count));
        assert!(id.supports(Aggregation::CountDistinct));
        assert!(!id.supports(Aggregation::Sum));
        assert!(workload.supports(Aggregation::Max));
    }

    #[test]
    fn test_dialect_expression() {
        let plain = FieldDefinition::new("STATUS", "t.status", ValueType::Text);
        assert_eq!(plain.expression_in(SqlDialect::Sqlite), "t.status");

        let age = FieldDefinition::new("AGE", "TIMESTAMPDIFF(DAY, t.c, NOW())", ValueType::Integer)
            .on_sqlite("CAST(julianday('now') - julianday(t.c) AS INTEGER)");
        assert_eq!(age.expression_in(SqlDialect::MySql), "TIMESTAMPDIFF(DAY, t.c, NOW())");
        assert!(age.expression_in(SqlDialect::Sqlite).starts_with("CAST(julianday"));
    }

    #[test]
    fn test_filter_op_parse() {
        assert_eq!(FilterOp::parse("between"), Some(FilterOp::Between));
        assert_eq!(FilterOp::parse("LIKE"), None);
    }
}

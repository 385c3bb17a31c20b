//! SQL Compiler - Deterministic SQL generation from a validated plan
//!
//! Every identifier comes from the schema registry and every user-supplied value is
//! bound through a `?` placeholder, so nothing from the plan is ever spliced into
//! the SQL text except sanitized display names, which only appear in `columns`.

use crate::error::{ChatBiError, Result};
use crate::intent::validated_plan::{Predicate, ValidatedFilter, ValidatedQuery};
use crate::semantic::field::{FieldDefinition, SqlDialect, ValueType};
use crate::semantic::registry::{DatasetSchema, SchemaRegistry, SCHEMA_REGISTRY};
use chrono::{NaiveDate, NaiveDateTime};
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

lazy_static! {
    static ref DISPLAY_NAME_ILLEGAL: Regex = Regex::new(r"[^0-9A-Za-z_\x{4e00}-\x{9fa5}]").unwrap();
}

/// A bound parameter, typed by the declared type of the field it filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlParam {
    Integer(i64),
    Decimal(f64),
    Timestamp(NaiveDateTime),
    Text(String),
}

/// Parameterized SELECT ready for execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltQuery {
    /// SQL text with `?` placeholders
    pub sql: String,
    /// Positional parameters, one per placeholder
    pub params: Vec<SqlParam>,
    /// Display name of each select item, in order
    pub columns: Vec<String>,
}

impl BuiltQuery {
    pub fn placeholder_count(&self) -> usize {
        self.sql.matches('?').count()
    }
}

/// Replace anything outside `[0-9A-Za-z_]` and CJK ideographs with `_`.
///
/// A blank `raw` falls back to `fallback`.
pub fn sanitize_display_name(raw: Option<&str>, fallback: &str) -> String {
    let value = raw
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(fallback);
    DISPLAY_NAME_ILLEGAL.replace_all(value, "_").into_owned()
}

/// SQL compiler over a schema registry
pub struct SqlCompiler<'r> {
    registry: &'r SchemaRegistry,
    dialect: SqlDialect,
}

impl<'r> SqlCompiler<'r> {
    pub fn new(registry: &'r SchemaRegistry) -> Self {
        Self {
            registry,
            dialect: SqlDialect::default(),
        }
    }

    /// Render field expressions for the engine that will run the query.
    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Build the parameterized query for a validated plan.
    pub fn build(&self, plan: &ValidatedQuery) -> Result<BuiltQuery> {
        info!("🔧 Compiling validated plan for dataset {}", plan.dataset);

        let schema = self
            .registry
            .dataset(&plan.dataset)
            .ok_or_else(|| ChatBiError::UnsupportedDataset(plan.dataset.clone()))?;

        // Step 1: SELECT items and GROUP BY expressions
        let mut select_parts = Vec::new();
        let mut group_by_parts = Vec::new();
        let mut columns = Vec::new();

        for dim in &plan.dimensions {
            let expr = schema.expression_in(&dim.field, self.dialect)?;
            select_parts.push(format!("{} AS c{}", expr, select_parts.len()));
            group_by_parts.push(expr);
            columns.push(sanitize_display_name(Some(&dim.alias), &dim.field));
        }

        for measure in &plan.measures {
            let expr = schema.expression_in(&measure.field, self.dialect)?;
            if !schema.is_agg_field_compatible(measure.agg, &measure.field) {
                return Err(ChatBiError::UnsupportedAggregation(format!(
                    "{} on {}",
                    measure.agg.as_str(),
                    measure.field
                )));
            }
            select_parts.push(format!("{} AS c{}", measure.agg.wrap(expr), select_parts.len()));
            let fallback = format!("{}_{}", measure.agg.as_str(), measure.field);
            columns.push(sanitize_display_name(Some(&measure.alias), &fallback));
        }

        if select_parts.is_empty() {
            return Err(ChatBiError::InvalidPlan(
                "plan has nothing to select".to_string(),
            ));
        }

        // Step 2: WHERE, soft-delete predicate first
        let mut where_parts = vec![schema.soft_delete_predicate.to_string()];
        let mut params = Vec::new();
        for filter in &plan.filters {
            where_parts.push(compile_filter(schema, self.dialect, filter, &mut params)?);
        }

        // Step 3: ORDER BY
        let mut order_by_parts = Vec::new();
        for order in &plan.order_by {
            let expr = schema.expression_in(&order.field, self.dialect)?;
            order_by_parts.push(format!("{} {}", expr, order.direction.as_sql()));
        }

        // Combine all clauses
        let mut sql_parts = vec![
            format!("SELECT {}", select_parts.join(", ")),
            format!("FROM {}", schema.from_clause()),
        ];
        if schema.requires_join(&plan.used_fields) {
            sql_parts.extend(schema.joins.iter().map(|j| j.sql.to_string()));
        }
        sql_parts.push(format!("WHERE {}", where_parts.join(" AND ")));
        if !group_by_parts.is_empty() {
            sql_parts.push(format!("GROUP BY {}", group_by_parts.join(", ")));
        }
        if !order_by_parts.is_empty() {
            sql_parts.push(format!("ORDER BY {}", order_by_parts.join(", ")));
        }
        sql_parts.push(format!("LIMIT {}", plan.limit));

        let sql = sql_parts.join(" ");
        debug!(params = params.len(), "✅ Generated SQL: {}", sql);

        Ok(BuiltQuery {
            sql,
            params,
            columns,
        })
    }
}

/// Build against the process-wide registry.
pub fn build(plan: &ValidatedQuery) -> Result<BuiltQuery> {
    SqlCompiler::new(&SCHEMA_REGISTRY).build(plan)
}

fn compile_filter(
    schema: &DatasetSchema,
    dialect: SqlDialect,
    filter: &ValidatedFilter,
    params: &mut Vec<SqlParam>,
) -> Result<String> {
    let field = schema
        .field(&filter.field)
        .ok_or_else(|| ChatBiError::UnsupportedField(filter.field.clone()))?;
    let expr = field.expression_in(dialect);

    match &filter.predicate {
        Predicate::Compare { op, value } => {
            params.push(cast_param(field, value)?);
            Ok(format!("{} {} ?", expr, op.as_sql()))
        }
        Predicate::In { values } => {
            if values.is_empty() {
                return Err(ChatBiError::InvalidPlan(format!(
                    "IN on {} has no values",
                    field.name
                )));
            }
            for value in values {
                params.push(cast_param(field, value)?);
            }
            Ok(format!(
                "{} IN ({})",
                expr,
                std::iter::repeat("?").take(values.len()).join(",")
            ))
        }
        Predicate::Between { from, to } => {
            params.push(cast_param(field, from)?);
            params.push(cast_param(field, to)?);
            Ok(format!("{} BETWEEN ? AND ?", expr))
        }
    }
}

fn cast_param(field: &FieldDefinition, raw: &str) -> Result<SqlParam> {
    let trimmed = raw.trim();
    match field.value_type {
        ValueType::Integer => trimmed
            .parse::<i64>()
            .map(SqlParam::Integer)
            .map_err(|_| ChatBiError::InvalidPlan(format!("{} must be a number", field.name))),
        ValueType::Decimal => match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(SqlParam::Decimal(v)),
            _ => Err(ChatBiError::InvalidPlan(format!(
                "{} must be a number",
                field.name
            ))),
        },
        ValueType::Timestamp => parse_timestamp_loose(trimmed).map(SqlParam::Timestamp),
        ValueType::Text => Ok(SqlParam::Text(trimmed.to_string())),
    }
}

/// Accepts `yyyy-MM-dd`, `yyyy-MM-dd HH:mm` and `yyyy-MM-dd HH:mm:ss`.
pub fn parse_timestamp_loose(input: &str) -> Result<NaiveDateTime> {
    let trimmed = input.trim();
    let parsed = match trimmed.chars().count() {
        10 => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0)),
        16 => NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M").ok(),
        _ => NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S").ok(),
    };
    parsed.ok_or_else(|| ChatBiError::InvalidPlan(format!("cannot parse timestamp '{}'", input)))
}

//! Intent Validator - Rejects hallucinated or unsafe plans
//!
//! Validates an untrusted `QueryPlan` against the schema registry before any SQL is
//! generated: unknown fields, illegal aggregation/field pairs, malformed filters and
//! out-of-range limits are rejected with a reason naming the offending path.

use crate::error::{ChatBiError, Result};
use crate::intent::query_plan::{non_blank, Filter, QueryPlan};
use crate::intent::validated_plan::{
    CompareOp, Predicate, SortDirection, ValidatedDimension, ValidatedFilter, ValidatedMeasure,
    ValidatedOrder, ValidatedPlan, ValidatedQuery,
};
use crate::semantic::field::{Aggregation, FilterOp};
use crate::semantic::registry::{DatasetSchema, SchemaRegistry, SCHEMA_REGISTRY};
use crate::sql_compiler::sanitize_display_name;
use std::collections::BTreeSet;
use tracing::debug;

pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 200;

/// Row limit applied to every plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
        }
    }
}

impl LimitPolicy {
    /// Absent or non-positive limits fall back to the default. The result always lies in
    /// `[1, max_limit]`, even for a policy with a zero default or max.
    pub fn normalize(&self, raw: Option<i64>) -> u32 {
        let value = match raw {
            Some(v) if v > 0 => v,
            _ => i64::from(self.default_limit),
        };
        let max = i64::from(self.max_limit.max(1));
        value.clamp(1, max) as u32
    }
}

/// Plan validator bound to a registry and a limit policy
pub struct PlanValidator<'r> {
    registry: &'r SchemaRegistry,
    limits: LimitPolicy,
}

impl<'r> PlanValidator<'r> {
    pub fn new(registry: &'r SchemaRegistry) -> Self {
        Self {
            registry,
            limits: LimitPolicy::default(),
        }
    }

    pub fn with_limits(mut self, limits: LimitPolicy) -> Self {
        self.limits = limits;
        self
    }

    /// Validate and normalize a plan.
    ///
    /// Checks, in order:
    /// 1. The dataset is registered
    /// 2. A clarification plan carries a question (and stops here)
    /// 3. At least one measure is present
    /// 4. Dimensions, measures, filters and orderBy only reference whitelisted fields
    /// 5. Aggregations fit their fields, filter operands fit their operators
    pub fn validate(&self, plan: &QueryPlan) -> Result<ValidatedPlan> {
        let dataset_raw = plan.dataset.as_deref().unwrap_or("");
        let schema = self.registry.dataset(dataset_raw).ok_or_else(|| {
            ChatBiError::InvalidPlan(format!("dataset: unsupported dataset '{}'", dataset_raw))
        })?;

        if plan.is_clarification() {
            let question = non_blank(plan.clarifying_question.as_deref()).ok_or_else(|| {
                ChatBiError::InvalidPlan(
                    "clarifyingQuestion: required when needClarification is true".to_string(),
                )
            })?;
            return Ok(ValidatedPlan::Clarification {
                dataset: schema.code.to_string(),
                question: question.to_string(),
            });
        }

        if plan.measures.is_empty() {
            return Err(ChatBiError::InvalidPlan(
                "measures: plan has no measures".to_string(),
            ));
        }

        let limit = self.limits.normalize(plan.limit);
        let mut used_fields = BTreeSet::new();

        let mut dimensions = Vec::with_capacity(plan.dimensions.len());
        for dim in &plan.dimensions {
            let field = validate_field(schema, dim.field.as_deref(), "dimensions.field")?;
            let alias = sanitize_display_name(dim.alias.as_deref(), field);
            used_fields.insert(field.to_string());
            dimensions.push(ValidatedDimension {
                field: field.to_string(),
                alias,
            });
        }

        let mut measures = Vec::with_capacity(plan.measures.len());
        for measure in &plan.measures {
            let agg_raw = require_text(measure.agg.as_deref(), "measures.agg")?;
            let field_raw = require_text(measure.field.as_deref(), "measures.field")?;
            let agg = Aggregation::parse(agg_raw)
                .filter(|a| schema.allowed_aggregations().contains(a))
                .ok_or_else(|| {
                    ChatBiError::InvalidPlan(format!(
                        "measures.agg: unsupported aggregation '{}'",
                        agg_raw
                    ))
                })?;
            let field = validate_field(schema, Some(field_raw), "measures.field")?;
            if !schema.is_agg_field_compatible(agg, field) {
                return Err(ChatBiError::InvalidPlan(format!(
                    "measures: aggregation {} only applies to {}",
                    agg.as_str(),
                    schema.numeric_fields().join(" or ")
                )));
            }
            let fallback = format!("{}_{}", agg.as_str(), field);
            let alias = sanitize_display_name(measure.alias.as_deref(), &fallback);
            used_fields.insert(field.to_string());
            measures.push(ValidatedMeasure {
                agg,
                field: field.to_string(),
                alias,
            });
        }

        let mut filters = Vec::with_capacity(plan.filters.len());
        for filter in &plan.filters {
            let validated = validate_filter(schema, filter)?;
            used_fields.insert(validated.field.clone());
            filters.push(validated);
        }

        let mut order_by = Vec::with_capacity(plan.order_by.len());
        for order in &plan.order_by {
            let field = validate_field(schema, order.field.as_deref(), "orderBy.field")?;
            let raw_direction = order.direction.as_deref().unwrap_or("");
            let direction = SortDirection::parse(raw_direction).ok_or_else(|| {
                ChatBiError::InvalidPlan(format!(
                    "orderBy.direction: unsupported sort direction '{}'",
                    raw_direction
                ))
            })?;
            used_fields.insert(field.to_string());
            order_by.push(ValidatedOrder {
                field: field.to_string(),
                direction,
            });
        }

        debug!(
            dataset = schema.code,
            measures = measures.len(),
            dimensions = dimensions.len(),
            filters = filters.len(),
            limit,
            "plan validated"
        );

        Ok(ValidatedPlan::Query(ValidatedQuery {
            dataset: schema.code.to_string(),
            dimensions,
            measures,
            filters,
            order_by,
            limit,
            used_fields,
        }))
    }
}

/// Validate against the process-wide registry with the default limit policy.
pub fn validate(plan: &QueryPlan) -> Result<ValidatedPlan> {
    PlanValidator::new(&SCHEMA_REGISTRY).validate(plan)
}

fn require_text<'a>(value: Option<&'a str>, path: &str) -> Result<&'a str> {
    non_blank(value).ok_or_else(|| ChatBiError::InvalidPlan(format!("{} must not be blank", path)))
}

fn validate_field<'a>(schema: &DatasetSchema, raw: Option<&'a str>, path: &str) -> Result<&'a str> {
    let field = require_text(raw, path)?;
    if schema.field(field).is_none() {
        return Err(ChatBiError::InvalidPlan(format!(
            "{}: unsupported field '{}'",
            path, field
        )));
    }
    Ok(field)
}

fn validate_filter(schema: &DatasetSchema, filter: &Filter) -> Result<ValidatedFilter> {
    let field = validate_field(schema, filter.field.as_deref(), "filters.field")?;
    let op_raw = require_text(filter.op.as_deref(), "filters.op")?;
    let op = FilterOp::parse(op_raw)
        .filter(|op| schema.allowed_filter_ops().contains(op))
        .ok_or_else(|| {
            ChatBiError::InvalidPlan(format!("filters.op: unsupported filter operator '{}'", op_raw))
        })?;

    let predicate = match op {
        FilterOp::In => {
            if filter.values.is_empty() {
                return Err(ChatBiError::InvalidPlan(
                    "filters.values: IN requires values".to_string(),
                ));
            }
            let values: Vec<String> = filter
                .values
                .iter()
                .filter_map(|v| non_blank(Some(v)))
                .map(str::to_string)
                .collect();
            if values.is_empty() {
                return Err(ChatBiError::InvalidPlan(
                    "filters.values: IN requires non-blank values".to_string(),
                ));
            }
            Predicate::In { values }
        }
        FilterOp::Between => {
            match (non_blank(filter.from.as_deref()), non_blank(filter.to.as_deref())) {
                (Some(from), Some(to)) => Predicate::Between {
                    from: from.to_string(),
                    to: to.to_string(),
                },
                _ => {
                    return Err(ChatBiError::InvalidPlan(
                        "filters.from/to: BETWEEN requires both from and to".to_string(),
                    ))
                }
            }
        }
        other => {
            let cmp = CompareOp::from_filter_op(other).ok_or_else(|| {
                ChatBiError::InvalidPlan(format!("filters.op: unsupported filter operator '{}'", op_raw))
            })?;
            let value = non_blank(filter.value.as_deref()).ok_or_else(|| {
                ChatBiError::InvalidPlan(format!("filters.value: {} requires a value", other.as_str()))
            })?;
            Predicate::Compare {
                op: cmp,
                value: value.to_string(),
            }
        }
    };

    Ok(ValidatedFilter {
        field: field.to_string(),
        predicate,
    })
}

//! Query Plan
//!
//! Untrusted, model-generated description of a question: what to measure, group by,
//! filter, sort and limit. Every field is optional here; shape and vocabulary are
//! enforced later by the plan validator.

use crate::error::{ChatBiError, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    /// Dataset code, only `TASK` is supported
    #[serde(default)]
    pub dataset: Option<String>,

    /// When true nothing is executed and `clarifying_question` is returned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub need_clarification: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarifying_question: Option<String>,

    #[serde(default, deserialize_with = "null_to_default")]
    pub measures: Vec<Measure>,

    #[serde(default, deserialize_with = "null_to_default")]
    pub dimensions: Vec<Dimension>,

    #[serde(default, deserialize_with = "null_to_default")]
    pub filters: Vec<Filter>,

    #[serde(default, deserialize_with = "null_to_default")]
    pub order_by: Vec<OrderBy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    /// COUNT, COUNT_DISTINCT, SUM, AVG, MIN, MAX
    #[serde(default)]
    pub agg: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub field: Option<String>,

    /// EQ, NE, IN, GT, GTE, LT, LTE, BETWEEN
    #[serde(default)]
    pub op: Option<String>,

    /// Single operand
    #[serde(default, deserialize_with = "scalar_as_string", skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Operands for IN
    #[serde(default, deserialize_with = "scalars_as_strings", skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,

    /// Lower bound for BETWEEN
    #[serde(default, deserialize_with = "scalar_as_string", skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// Upper bound for BETWEEN
    #[serde(default, deserialize_with = "scalar_as_string", skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    #[serde(default)]
    pub field: Option<String>,
    /// ASC / DESC
    #[serde(default)]
    pub direction: Option<String>,
}

impl QueryPlan {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: Some(dataset.into()),
            ..Default::default()
        }
    }

    /// Terminal plan asking the caller a follow-up question.
    pub fn clarification(dataset: Option<String>, question: impl Into<String>) -> Self {
        Self {
            dataset,
            need_clarification: Some(true),
            clarifying_question: Some(question.into()),
            ..Default::default()
        }
    }

    pub fn is_clarification(&self) -> bool {
        self.need_clarification == Some(true)
    }

    pub fn with_measure(mut self, measure: Measure) -> Self {
        self.measures.push(measure);
        self
    }

    pub fn with_dimension(mut self, dimension: Dimension) -> Self {
        self.dimensions.push(dimension);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse raw model output, tolerating a surrounding Markdown code fence.
    pub fn from_model_output(text: &str) -> Result<Self> {
        let json = extract_json(text);
        serde_json::from_str(json)
            .map_err(|e| ChatBiError::ModelClient(format!("model returned an unreadable plan: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl Measure {
    pub fn new(agg: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            agg: Some(agg.into()),
            field: Some(field.into()),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

impl Dimension {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

impl Filter {
    /// Single-operand filter (EQ, NE, GT, GTE, LT, LTE).
    pub fn compare(field: impl Into<String>, op: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            op: Some(op.into()),
            value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(field, "EQ", value)
    }

    pub fn one_of<I, S>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            field: Some(field.into()),
            op: Some("IN".to_string()),
            values: values.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn between(field: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            op: Some("BETWEEN".to_string()),
            from: Some(from.into()),
            to: Some(to.into()),
            ..Default::default()
        }
    }
}

impl OrderBy {
    pub fn new(field: impl Into<String>, direction: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            direction: Some(direction.into()),
        }
    }
}

/// Trimmed text, or `None` when absent or blank.
pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn extract_json(text: &str) -> &str {
    // Remove markdown code blocks if present
    let text = text.trim();
    let body = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```JSON"))
        .or_else(|| text.strip_prefix("```"));
    match body {
        Some(inner) => inner.trim_end().strip_suffix("```").unwrap_or(inner).trim(),
        None => text,
    }
}

fn null_to_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn scalar_to_string<E: serde::de::Error>(value: Value) -> std::result::Result<Option<String>, E> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(E::custom(format!("expected a scalar operand, found {}", other))),
    }
}

fn scalar_as_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        Some(value) => scalar_to_string(value),
        None => Ok(None),
    }
}

fn scalars_as_strings<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => return Err(D::Error::custom(format!("expected a list of operands, found {}", other))),
    };
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        if let Some(s) = scalar_to_string(value)? {
            out.push(s);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_camel_case_plan() {
        let json = r#"{
            "dataset": "TASK",
            "needClarification": false,
            "measures": [{"agg": "COUNT", "field": "TASK_ID"}],
            "dimensions": null,
            "filters": [{"field": "ASSIGNEE_ID", "op": "EQ", "value": 42},
                        {"field": "STATUS", "op": "IN", "values": ["DONE", null, "OPEN"]}],
            "orderBy": [{"field": "TASK_ID", "direction": "desc"}],
            "limit": 10
        }"#;
        let plan = QueryPlan::from_json(json).unwrap();
        assert_eq!(plan.dataset.as_deref(), Some("TASK"));
        assert!(plan.dimensions.is_empty());
        assert_eq!(plan.filters[0].value.as_deref(), Some("42"));
        assert_eq!(plan.filters[1].values, vec!["DONE", "OPEN"]);
        assert_eq!(plan.order_by[0].direction.as_deref(), Some("desc"));
        assert_eq!(plan.limit, Some(10));
        assert!(!plan.is_clarification());
    }

    #[test]
    fn test_rejects_structured_operand() {
        let json = r#"{"dataset":"TASK","filters":[{"field":"STATUS","op":"EQ","value":{"$ne":1}}]}"#;
        assert!(QueryPlan::from_json(json).is_err());
    }

    #[test]
    fn test_from_model_output_strips_fences() {
        let text = "```json\n{\"dataset\": \"TASK\", \"measures\": [{\"agg\": \"COUNT\", \"field\": \"TASK_ID\"}]}\n```";
        let plan = QueryPlan::from_model_output(text).unwrap();
        assert_eq!(plan.measures.len(), 1);

        let bare = "```\n{\"dataset\": \"TASK\"}\n```";
        assert_eq!(QueryPlan::from_model_output(bare).unwrap().dataset.as_deref(), Some("TASK"));

        let err = QueryPlan::from_model_output("I think you want tasks").unwrap_err();
        assert!(matches!(err, ChatBiError::ModelClient(_)));
    }

    #[test]
    fn test_clarification_round_trip() {
        let plan = QueryPlan::clarification(Some("TASK".into()), "Whose tasks?");
        assert!(plan.is_clarification());
        let json = plan.to_json().unwrap();
        assert!(json.contains("\"needClarification\":true"));
        assert!(json.contains("\"clarifyingQuestion\":\"Whose tasks?\""));
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("  x ")), Some("x"));
        assert_eq!(non_blank(Some("   ")), None);
        assert_eq!(non_blank(None), None);
    }
}

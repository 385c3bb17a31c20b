//! Schema Registry
//!
//! Central, immutable description of what a plan may express: datasets, their fields,
//! join shape, soft-delete predicate and table whitelist. Built once at first use and
//! shared read-only across requests.

use crate::error::{ChatBiError, Result};
use crate::semantic::field::{Aggregation, FieldDefinition, FilterOp, SqlDialect, ValueType};
use lazy_static::lazy_static;
use std::collections::{BTreeSet, HashMap};

/// Code of the task-tracking dataset.
pub const TASK_DATASET: &str = "TASK";

/// A LEFT JOIN the base relation may need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinClause {
    pub table: &'static str,
    pub sql: &'static str,
}

/// Everything the compiler knows about one logical dataset.
#[derive(Debug, Clone)]
pub struct DatasetSchema {
    pub code: &'static str,
    pub base_table: &'static str,
    pub base_alias: &'static str,
    /// Always AND-ed first into the WHERE clause
    pub soft_delete_predicate: &'static str,
    pub fields: Vec<FieldDefinition>,
    /// Emitted together, in order, when any used field requires a join
    pub joins: Vec<JoinClause>,
    /// Field bound to the caller's id for non-privileged principals
    pub scoped_field: &'static str,
    /// Grouping by one of these spans more than one person
    pub cross_person_fields: Vec<&'static str>,
    pub filter_ops: Vec<FilterOp>,
}

impl DatasetSchema {
    /// The task-tracking dataset backed by `project_task`.
    pub fn task() -> Self {
        Self {
            code: TASK_DATASET,
            base_table: "project_task",
            base_alias: "t",
            soft_delete_predicate: "t.deleted = 0",
            fields: vec![
                FieldDefinition::new("TASK_ID", "t.id", ValueType::Integer),
                FieldDefinition::new("BATCH_ID", "t.batch_id", ValueType::Integer),
                FieldDefinition::new("BATCH_TITLE", "b.title", ValueType::Text).joined(),
                FieldDefinition::new("TITLE", "t.title", ValueType::Text),
                FieldDefinition::new("STATUS", "t.status", ValueType::Text),
                FieldDefinition::new("ASSIGNEE_ID", "t.assignee_id", ValueType::Integer),
                FieldDefinition::new("ASSIGNEE_NAME", "u.username", ValueType::Text).joined(),
                FieldDefinition::new("CREATED_BY", "t.created_by", ValueType::Integer),
                FieldDefinition::new("PUBLISHED_TIME", "t.published_time", ValueType::Timestamp),
                FieldDefinition::new("WORKLOAD_MAN_DAY", "t.workload_man_day", ValueType::Decimal)
                    .numeric(),
                FieldDefinition::new(
                    "PUBLISHED_AGE_DAYS",
                    "TIMESTAMPDIFF(DAY, t.published_time, NOW())",
                    ValueType::Integer,
                )
                .on_sqlite("CAST(julianday('now', 'localtime') - julianday(t.published_time) AS INTEGER)")
                .numeric(),
            ],
            joins: vec![
                JoinClause {
                    table: "sys_user",
                    sql: "LEFT JOIN sys_user u ON u.id = t.assignee_id AND u.deleted = 0",
                },
                JoinClause {
                    table: "project_task_batch",
                    sql: "LEFT JOIN project_task_batch b ON b.id = t.batch_id AND b.deleted = 0",
                },
            ],
            scoped_field: "ASSIGNEE_ID",
            cross_person_fields: vec!["ASSIGNEE_ID", "ASSIGNEE_NAME"],
            filter_ops: FilterOp::ALL.to_vec(),
        }
    }

    /// Exact (trimmed, case-sensitive) field lookup.
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        let name = name.trim();
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn allowed_fields(&self) -> BTreeSet<&'static str> {
        self.fields.iter().map(|f| f.name).collect()
    }

    pub fn expression_for(&self, field: &str) -> Result<&'static str> {
        self.expression_in(field, SqlDialect::MySql)
    }

    pub fn expression_in(&self, field: &str, dialect: SqlDialect) -> Result<&'static str> {
        self.field(field)
            .map(|f| f.expression_in(dialect))
            .ok_or_else(|| ChatBiError::UnsupportedField(field.to_string()))
    }

    pub fn allowed_aggregations(&self) -> BTreeSet<Aggregation> {
        Aggregation::ALL.into_iter().collect()
    }

    pub fn is_agg_field_compatible(&self, agg: Aggregation, field: &str) -> bool {
        self.field(field).map_or(false, |f| f.supports(agg))
    }

    /// Fields accepting SUM / AVG / MIN / MAX, in declaration order.
    pub fn numeric_fields(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|f| f.numeric_aggregate)
            .map(|f| f.name)
            .collect()
    }

    pub fn allowed_filter_ops(&self) -> BTreeSet<FilterOp> {
        self.filter_ops.iter().copied().collect()
    }

    /// Lowercase table names the safety guard accepts.
    pub fn allowed_tables(&self) -> BTreeSet<String> {
        std::iter::once(self.base_table)
            .chain(self.joins.iter().map(|j| j.table))
            .map(|t| t.to_lowercase())
            .collect()
    }

    pub fn requires_join<'a, I>(&self, used_fields: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        used_fields
            .into_iter()
            .any(|name| self.field(name).map_or(false, |f| f.requires_join))
    }

    /// `project_task t`
    pub fn from_clause(&self) -> String {
        format!("{} {}", self.base_table, self.base_alias)
    }

    pub fn is_cross_person_field(&self, field: &str) -> bool {
        let field = field.trim();
        self.cross_person_fields.iter().any(|f| *f == field)
    }
}

/// In-memory registry of datasets keyed by code.
pub struct SchemaRegistry {
    datasets: HashMap<String, DatasetSchema>,
    default_dataset: String,
}

impl SchemaRegistry {
    pub fn new(default_dataset: DatasetSchema) -> Self {
        let default_code = default_dataset.code.to_string();
        let mut datasets = HashMap::new();
        datasets.insert(default_code.clone(), default_dataset);
        Self {
            datasets,
            default_dataset: default_code,
        }
    }

    /// Registry holding only the built-in TASK dataset.
    pub fn builtin() -> Self {
        Self::new(DatasetSchema::task())
    }

    /// Case-insensitive dataset lookup.
    pub fn dataset(&self, code: &str) -> Option<&DatasetSchema> {
        let code = code.trim();
        if let Some(d) = self.datasets.get(code) {
            return Some(d);
        }
        self.datasets
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(code))
            .map(|(_, d)| d)
    }

    pub fn default_dataset(&self) -> &DatasetSchema {
        &self.datasets[&self.default_dataset]
    }

    /// Dataset named by a plan, falling back to the default when absent or unknown.
    pub fn dataset_or_default(&self, code: Option<&str>) -> &DatasetSchema {
        code.and_then(|c| self.dataset(c))
            .unwrap_or_else(|| self.default_dataset())
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

lazy_static! {
    /// Process-wide registry, read-only after initialization.
    pub static ref SCHEMA_REGISTRY: SchemaRegistry = SchemaRegistry::builtin();
}

//! SQL Safety Guardrails
//!
//! Structural second check on compiled SQL, independent of the plan whitelist.
//! Only a single plain SELECT over whitelisted tables passes.

use crate::error::{ChatBiError, Result};
use crate::semantic::registry::{DatasetSchema, SCHEMA_REGISTRY};
use itertools::Itertools;
use sqlparser::ast::{Expr, ObjectName, Query, SetExpr, Statement, TableFactor, Visit, Visitor};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeSet;
use std::ops::ControlFlow;
use tracing::{error, warn};

/// Safety guard holding the lowercase table whitelist
#[derive(Debug, Clone)]
pub struct SqlSafetyGuard {
    allowed_tables: BTreeSet<String>,
}

impl SqlSafetyGuard {
    pub fn new(allowed_tables: BTreeSet<String>) -> Self {
        Self {
            allowed_tables: allowed_tables.into_iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    pub fn for_dataset(schema: &DatasetSchema) -> Self {
        Self::new(schema.allowed_tables())
    }

    pub fn allowed_tables(&self) -> &BTreeSet<String> {
        &self.allowed_tables
    }

    /// Fail with `UnsafeSql` unless `sql` is exactly one SELECT over allowed tables.
    pub fn assert_safe_select(&self, sql: &str) -> Result<()> {
        let result = self.check(sql);
        if let Err(ChatBiError::UnsafeSql(reason)) = &result {
            error!(reason = %reason, sql = %sql, "rejected unsafe SQL");
        }
        result
    }

    fn check(&self, sql: &str) -> Result<()> {
        if sql.trim().is_empty() {
            return Err(unsafe_sql("SQL is empty"));
        }

        // placeholders become dummy literals so the grammar accepts them
        let sql_for_parse = sql.replace('?', "0").split_whitespace().join(" ");

        let statements = match Parser::parse_sql(&MySqlDialect {}, &sql_for_parse) {
            Ok(statements) => statements,
            Err(e) => {
                warn!("SQL parsing failed: {}, sql={}", e, sql_for_parse);
                return Err(unsafe_sql("SQL failed to parse"));
            }
        };

        if statements.len() != 1 {
            return Err(unsafe_sql(&format!(
                "expected exactly one statement, found {}",
                statements.len()
            )));
        }
        let statement = &statements[0];
        let query = match statement {
            Statement::Query(query) => query,
            _ => return Err(unsafe_sql("only a single SELECT query is allowed")),
        };
        inspect_query(query).map_err(|reason| unsafe_sql(&reason))?;

        let mut inspector = SelectInspector {
            allowed_tables: &self.allowed_tables,
        };
        match statement.visit(&mut inspector) {
            ControlFlow::Break(reason) => Err(unsafe_sql(&reason)),
            ControlFlow::Continue(()) => Ok(()),
        }
    }
}

/// Check against the default dataset of the process-wide registry.
pub fn assert_safe_select(sql: &str) -> Result<()> {
    SqlSafetyGuard::for_dataset(SCHEMA_REGISTRY.default_dataset()).assert_safe_select(sql)
}

fn unsafe_sql(reason: &str) -> ChatBiError {
    ChatBiError::UnsafeSql(reason.to_string())
}

/// Rejects locking clauses, `INTO` targets and any body other than a plain SELECT.
/// CTE bodies are checked too; nested subqueries are reached by `SelectInspector`.
fn inspect_query(query: &Query) -> std::result::Result<(), String> {
    if !query.locks.is_empty() {
        return Err("locking clauses are not allowed".to_string());
    }
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            inspect_query(&cte.query)?;
        }
    }
    match query.body.as_ref() {
        SetExpr::Select(select) if select.into.is_some() => {
            Err("SELECT ... INTO is not allowed".to_string())
        }
        SetExpr::Select(_) => Ok(()),
        SetExpr::Query(inner) => inspect_query(inner),
        SetExpr::SetOperation { .. } => Err("UNION/INTERSECT/EXCEPT is not allowed".to_string()),
        _ => Err("only plain SELECT bodies are allowed".to_string()),
    }
}

fn flow(checked: std::result::Result<(), String>) -> ControlFlow<String> {
    match checked {
        Ok(()) => ControlFlow::Continue(()),
        Err(reason) => ControlFlow::Break(reason),
    }
}

/// Walks every table factor, relation and expression, including those in subqueries.
struct SelectInspector<'a> {
    allowed_tables: &'a BTreeSet<String>,
}

impl Visitor for SelectInspector<'_> {
    type Break = String;

    fn pre_visit_table_factor(&mut self, table_factor: &TableFactor) -> ControlFlow<Self::Break> {
        match table_factor {
            TableFactor::Table { .. } | TableFactor::NestedJoin { .. } => ControlFlow::Continue(()),
            TableFactor::Derived { subquery, .. } => flow(inspect_query(subquery)),
            other => ControlFlow::Break(format!("table source not allowed: {}", other)),
        }
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        let name = relation
            .0
            .iter()
            .map(|ident| ident.value.trim().to_lowercase())
            .join(".");
        if self.allowed_tables.contains(&name) {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(format!("table not allowed: {}", name))
        }
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Subquery(subquery)
            | Expr::ArraySubquery(subquery)
            | Expr::InSubquery { subquery, .. }
            | Expr::Exists { subquery, .. } => flow(inspect_query(subquery)),
            _ => ControlFlow::Continue(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(sql: &str) -> String {
        match assert_safe_select(sql) {
            Err(ChatBiError::UnsafeSql(reason)) => reason,
            other => panic!("expected UnsafeSql for {}, got {:?}", sql, other),
        }
    }

    #[test]
    fn test_accepts_compiled_shapes() {
        let sqls = [
            "SELECT COUNT(t.id) AS c0 FROM project_task t WHERE t.deleted = 0 LIMIT 50",
            "SELECT COUNT(t.id) AS c0 FROM project_task t WHERE t.deleted = 0 AND t.assignee_id = ? LIMIT 50",
            "SELECT u.username AS c0, SUM(t.workload_man_day) AS c1 FROM project_task t \
             LEFT JOIN sys_user u ON u.id = t.assignee_id AND u.deleted = 0 \
             LEFT JOIN project_task_batch b ON b.id = t.batch_id AND b.deleted = 0 \
             WHERE t.deleted = 0 AND t.status IN (?,?) AND t.published_time BETWEEN ? AND ? \
             GROUP BY u.username ORDER BY t.workload_man_day DESC LIMIT 10",
            "SELECT COUNT(DISTINCT t.assignee_id) AS c0 FROM project_task t WHERE t.deleted = 0 LIMIT 200",
        ];
        for sql in sqls {
            assert!(assert_safe_select(sql).is_ok(), "{}", sql);
        }
    }

    #[test]
    fn test_table_names_case_insensitive() {
        assert!(assert_safe_select("SELECT id FROM PROJECT_TASK").is_ok());
        assert!(assert_safe_select("SELECT id FROM `Project_Task` t").is_ok());
    }

    #[test]
    fn test_rejects_stacked_statements() {
        let r = reason("SELECT * FROM project_task; DROP TABLE project_task;");
        assert!(r.contains("exactly one statement"), "{}", r);
    }

    #[test]
    fn test_rejects_non_select() {
        assert_eq!(reason("DELETE FROM project_task"), "only a single SELECT query is allowed");
        assert_eq!(
            reason("UPDATE project_task SET status = 'X'"),
            "only a single SELECT query is allowed"
        );
    }

    #[test]
    fn test_rejects_set_operations() {
        let r = reason("SELECT id FROM project_task UNION SELECT id FROM sys_user");
        assert!(r.contains("UNION"), "{}", r);
        // both sides whitelisted: still one statement, still rejected
        let r = reason("SELECT id FROM project_task EXCEPT SELECT id FROM project_task_batch");
        assert!(r.contains("EXCEPT"), "{}", r);
    }

    #[test]
    fn test_rejects_select_into() {
        let r = reason("SELECT id INTO tmp_tasks FROM project_task");
        assert_eq!(r, "SELECT ... INTO is not allowed");
    }

    #[test]
    fn test_rejects_foreign_tables() {
        assert_eq!(reason("SELECT * FROM sys_role"), "table not allowed: sys_role");
        assert_eq!(
            reason("SELECT t.id FROM project_task t JOIN secrets s ON s.id = t.id"),
            "table not allowed: secrets"
        );
        assert_eq!(
            reason("SELECT id FROM information_schema.tables"),
            "table not allowed: information_schema.tables"
        );
    }

    #[test]
    fn test_rejects_foreign_tables_in_subqueries() {
        let r = reason(
            "SELECT t.id FROM project_task t WHERE t.assignee_id IN (SELECT id FROM sys_role)",
        );
        assert_eq!(r, "table not allowed: sys_role");
        let r = reason("SELECT x.id FROM (SELECT id FROM audit_log) x");
        assert_eq!(r, "table not allowed: audit_log");
        // nested set operation inside a subquery
        let r = reason(
            "SELECT t.id FROM project_task t WHERE t.id IN (SELECT id FROM project_task UNION SELECT id FROM sys_user)",
        );
        assert!(r.contains("UNION"), "{}", r);
        let r = reason(
            "SELECT t.id FROM project_task t WHERE EXISTS (SELECT id FROM project_task UNION ALL SELECT id FROM project_task_batch)",
        );
        assert!(r.contains("UNION"), "{}", r);
        let r = reason("SELECT x.id FROM (SELECT id FROM project_task INTERSECT SELECT id FROM sys_user) x");
        assert!(r.contains("UNION/INTERSECT/EXCEPT"), "{}", r);
        let r = reason("SELECT (SELECT MAX(id) FROM sys_role) AS m FROM project_task");
        assert_eq!(r, "table not allowed: sys_role");
    }

    #[test]
    fn test_rejects_locking_and_cte_set_operations() {
        let r = reason("SELECT id FROM project_task FOR UPDATE");
        assert_eq!(r, "locking clauses are not allowed");
        let r = reason(
            "WITH x AS (SELECT id FROM project_task UNION SELECT id FROM sys_user) SELECT id FROM project_task",
        );
        assert!(r.contains("UNION"), "{}", r);
    }

    #[test]
    fn test_rejects_blank_and_garbage() {
        assert_eq!(reason(""), "SQL is empty");
        assert_eq!(reason("   \n\t "), "SQL is empty");
        assert_eq!(reason("SELEC id FRM project_task"), "SQL failed to parse");
    }

    #[test]
    fn test_custom_whitelist() {
        let guard = SqlSafetyGuard::new(["Orders".to_string()].into_iter().collect());
        assert!(guard.allowed_tables().contains("orders"));
        assert!(guard.assert_safe_select("SELECT * FROM orders").is_ok());
        assert!(guard.assert_safe_select("SELECT * FROM project_task").is_err());
    }
}

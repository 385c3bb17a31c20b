use chatbi_core::config::ChatBiConfig;
use chatbi_core::execution::SqliteExecutor;
use chatbi_core::intent::{Dimension, Filter, Measure, OrderBy, QueryPlan};
use chatbi_core::query_engine::{AskResponse, ChatBiEngine, RecordedPlan};
use chatbi_core::security::UserContext;
use chrono::{Local, NaiveDate};
use serde_json::json;

const FIXTURE: &str = "
CREATE TABLE sys_user (id INTEGER PRIMARY KEY, username TEXT, deleted INTEGER DEFAULT 0);
CREATE TABLE project_task_batch (id INTEGER PRIMARY KEY, title TEXT, deleted INTEGER DEFAULT 0);
CREATE TABLE project_task (
    id INTEGER PRIMARY KEY,
    batch_id INTEGER,
    title TEXT,
    status TEXT,
    assignee_id INTEGER,
    created_by INTEGER,
    published_time TEXT,
    workload_man_day REAL,
    deleted INTEGER DEFAULT 0
);
INSERT INTO sys_user (id, username) VALUES (42, 'alice'), (7, 'bob');
INSERT INTO project_task_batch (id, title) VALUES (1, 'Sprint 1');
INSERT INTO project_task VALUES (1, 1, 'Write docs', 'DONE', 42, 1, '2024-01-05 09:00:00', 1.5, 0);
INSERT INTO project_task VALUES (2, 1, 'Fix bug', 'OPEN', 42, 1, '2024-02-10 10:00:00', 2.0, 0);
INSERT INTO project_task VALUES (3, 1, 'Review', 'OPEN', 7, 1, '2024-01-20 11:00:00', 0.5, 0);
INSERT INTO project_task VALUES (4, 1, 'Old task', 'DONE', 42, 1, '2024-01-06 09:00:00', 3.0, 1);
";

fn ask(user: &UserContext, question: &str, plan: QueryPlan) -> AskResponse {
    let executor = SqliteExecutor::open_in_memory().unwrap();
    executor.execute_batch(FIXTURE).unwrap();
    let engine = ChatBiEngine::new(RecordedPlan(plan), executor, ChatBiConfig::default());
    engine.ask(user, question).unwrap()
}

fn count_tasks() -> QueryPlan {
    QueryPlan::new("TASK").with_measure(Measure::new("COUNT", "TASK_ID"))
}

#[test]
fn user_counts_only_own_live_tasks() {
    let response = ask(&UserContext::user(42, "alice"), "how many tasks do I have", count_tasks());
    assert_eq!(response.answer, "Result: COUNT_TASK_ID=2");
    assert!(response.debug_sql.is_none());
}

#[test]
fn foreign_assignee_filter_is_replaced() {
    let plan = count_tasks().with_filter(Filter::eq("ASSIGNEE_ID", "7"));
    let response = ask(&UserContext::user(42, "alice"), "tasks of user 7", plan);
    assert_eq!(response.answer, "Result: COUNT_TASK_ID=2");
}

#[test]
fn admin_groups_by_assignee_name() {
    let plan = count_tasks()
        .with_dimension(Dimension::new("ASSIGNEE_NAME"))
        .with_order_by(OrderBy::new("ASSIGNEE_NAME", "ASC"));
    let response = ask(&UserContext::admin(1, "root"), "tasks per person", plan);
    let result = response.result.unwrap();
    assert_eq!(result.columns, vec!["ASSIGNEE_NAME", "COUNT_TASK_ID"]);
    assert_eq!(result.rows, vec![vec![json!("alice"), json!(2)], vec![json!("bob"), json!(1)]]);
    assert_eq!(response.answer, "Returned 2 rows.");
    assert!(response.debug_sql.unwrap().contains("LEFT JOIN sys_user u"));
}

#[test]
fn timestamp_range_filter() {
    let plan = count_tasks().with_filter(Filter::between("PUBLISHED_TIME", "2024-01-01", "2024-01-31"));
    let response = ask(&UserContext::admin(1, "root"), "tasks published in January", plan);
    assert_eq!(response.answer, "Result: COUNT_TASK_ID=2");
}

#[test]
fn in_filter_and_text_values() {
    let plan = count_tasks().with_filter(Filter::one_of("STATUS", vec!["OPEN"]));
    let response = ask(&UserContext::admin(1, "root"), "open tasks", plan);
    assert_eq!(response.answer, "Result: COUNT_TASK_ID=2");
}

#[test]
fn user_sums_own_workload() {
    let plan = QueryPlan::new("TASK").with_measure(Measure::new("SUM", "WORKLOAD_MAN_DAY"));
    let response = ask(&UserContext::user(42, "alice"), "my total workload", plan);
    assert_eq!(response.answer, "Result: SUM_WORKLOAD_MAN_DAY=3.5");
}

#[test]
fn batch_title_dimension_joins_batches() {
    let plan = QueryPlan::new("TASK")
        .with_dimension(Dimension::new("BATCH_TITLE").with_alias("batch"))
        .with_measure(Measure::new("COUNT", "TASK_ID").with_alias("tasks"));
    let response = ask(&UserContext::admin(1, "root"), "tasks per batch", plan);
    assert_eq!(response.answer, "Result: batch=Sprint 1, tasks=3");
}

#[test]
fn empty_result_and_csv_output() {
    let plan = count_tasks()
        .with_dimension(Dimension::new("STATUS"))
        .with_filter(Filter::eq("STATUS", "ARCHIVED"));
    let response = ask(&UserContext::admin(1, "root"), "archived tasks", plan);
    assert_eq!(response.answer, "No matching data.");

    let plan = count_tasks()
        .with_dimension(Dimension::new("STATUS"))
        .with_order_by(OrderBy::new("STATUS", "ASC"));
    let response = ask(&UserContext::admin(1, "root"), "tasks by status", plan);
    let mut out = Vec::new();
    response.result.unwrap().write_csv(&mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "STATUS,COUNT_TASK_ID\nDONE,1\nOPEN,2\n");
}

#[test]
fn response_serializes_camel_case() {
    let response = ask(&UserContext::user(42, "alice"), "how many tasks do I have", count_tasks());
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["needClarification"], json!(false));
    assert_eq!(value["result"]["rowCount"], json!(1));
    assert!(value.get("debugSql").is_none());
}

#[test]
fn published_age_runs_on_sqlite() {
    let plan = QueryPlan::new("TASK").with_measure(Measure::new("AVG", "PUBLISHED_AGE_DAYS").with_alias("age"));
    let response = ask(&UserContext::user(42, "alice"), "average age of my tasks", plan);
    assert!(!response.need_clarification);
    let result = response.result.unwrap();
    let age = result.rows[0][0].as_f64().unwrap();

    let today = Local::now().date_naive();
    let newest = (today - NaiveDate::from_ymd_opt(2024, 2, 10).unwrap()).num_days() as f64;
    let oldest = (today - NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()).num_days() as f64;
    assert!(age >= newest - 1.0 && age <= oldest, "{}", age);

    let plan = count_tasks().with_filter(Filter::compare("PUBLISHED_AGE_DAYS", "GT", "100000"));
    let response = ask(&UserContext::admin(1, "root"), "very old tasks", plan);
    assert_eq!(response.answer, "Result: COUNT_TASK_ID=0");
    assert!(response.debug_sql.unwrap().contains("julianday(t.published_time)"));
}

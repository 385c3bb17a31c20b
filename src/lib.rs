pub mod config;
pub mod error;
pub mod execution;
pub mod intent;
pub mod intent_validator;
pub mod query_engine;
pub mod safety_guardrails;
pub mod security;
pub mod semantic;
pub mod sql_compiler;

pub use config::ChatBiConfig;
pub use error::{ChatBiError, ErrorKind, Result, GENERIC_FAILURE_MESSAGE};
pub use execution::{QueryExecutor, QueryResult, SqliteExecutor};
pub use intent::{Dimension, Filter, Measure, OrderBy, QueryPlan, ValidatedPlan, ValidatedQuery};
pub use intent_validator::{validate, LimitPolicy, PlanValidator};
pub use query_engine::{
    answer_text, AskResponse, ChatBiCompiler, ChatBiEngine, CompileOutcome, PlanGenerator,
    RecordedPlan, DEFAULT_CLARIFICATION,
};
pub use safety_guardrails::{assert_safe_select, SqlSafetyGuard};
pub use security::{
    apply_and_maybe_clarify, GuardResult, PermissionGuard, Role, UserContext,
    SELF_SCOPE_CLARIFICATION,
};
pub use semantic::{DatasetSchema, SchemaRegistry, SqlDialect, SCHEMA_REGISTRY, TASK_DATASET};
pub use sql_compiler::{build, sanitize_display_name, BuiltQuery, SqlCompiler, SqlParam};

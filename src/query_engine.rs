//! Query Engine - Question to answer pipeline
//!
//! Wires the stages together: plan generation, permission guard, plan validation,
//! SQL compilation, safety check and execution. Plan generation and execution are
//! collaborators behind traits; everything in between is deterministic.

use crate::config::ChatBiConfig;
use crate::error::{ChatBiError, Result};
use crate::execution::engine::QueryExecutor;
use crate::execution::result::QueryResult;
use crate::intent::query_plan::{non_blank, QueryPlan};
use crate::intent::validated_plan::ValidatedPlan;
use crate::intent_validator::{LimitPolicy, PlanValidator};
use crate::safety_guardrails::SqlSafetyGuard;
use crate::security::permission_guard::{GuardResult, PermissionGuard};
use crate::security::policy::UserContext;
use crate::semantic::field::SqlDialect;
use crate::semantic::registry::{SchemaRegistry, SCHEMA_REGISTRY};
use crate::sql_compiler::{BuiltQuery, SqlCompiler};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

/// Used when a clarification plan carries no question of its own.
pub const DEFAULT_CLARIFICATION: &str = "Please clarify your question.";

/// Produces a query plan for a question (usually a language model client).
pub trait PlanGenerator: Send + Sync {
    fn generate_plan(&self, user: &UserContext, question: &str) -> Result<QueryPlan>;
}

/// Replays a fixed plan regardless of the question.
#[derive(Debug, Clone)]
pub struct RecordedPlan(pub QueryPlan);

impl PlanGenerator for RecordedPlan {
    fn generate_plan(&self, _user: &UserContext, _question: &str) -> Result<QueryPlan> {
        Ok(self.0.clone())
    }
}

/// Result of compiling a plan for one caller
#[derive(Debug, Clone, PartialEq)]
pub enum CompileOutcome {
    /// Nothing to execute; ask `question` instead
    Clarify { plan: QueryPlan, question: String },
    /// Safety-checked query built from the guarded `plan`
    Ready { plan: QueryPlan, query: BuiltQuery },
}

impl CompileOutcome {
    /// The plan after permission scoping.
    pub fn plan(&self) -> &QueryPlan {
        match self {
            CompileOutcome::Clarify { plan, .. } | CompileOutcome::Ready { plan, .. } => plan,
        }
    }
}

/// Deterministic part of the pipeline, from untrusted plan to safe SQL
pub struct ChatBiCompiler<'r> {
    registry: &'r SchemaRegistry,
    guard: PermissionGuard<'r>,
    validator: PlanValidator<'r>,
    sql_compiler: SqlCompiler<'r>,
}

impl<'r> ChatBiCompiler<'r> {
    pub fn new(registry: &'r SchemaRegistry, limits: LimitPolicy) -> Self {
        Self {
            registry,
            guard: PermissionGuard::new(registry),
            validator: PlanValidator::new(registry).with_limits(limits),
            sql_compiler: SqlCompiler::new(registry),
        }
    }

    /// Compile field expressions for a specific engine (MySQL by default).
    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.sql_compiler = self.sql_compiler.with_dialect(dialect);
        self
    }

    /// Guard, validate, build and safety-check `plan` on behalf of `user`.
    pub fn compile(&self, user: &UserContext, question: &str, plan: QueryPlan) -> Result<CompileOutcome> {
        let guarded = self.guard(user, question, plan)?;
        self.compile_guarded(guarded)
    }

    pub fn guard(&self, user: &UserContext, question: &str, plan: QueryPlan) -> Result<GuardResult> {
        self.guard.apply_and_maybe_clarify(user, question, plan)
    }

    /// Everything after the permission guard.
    pub fn compile_guarded(&self, guarded: GuardResult) -> Result<CompileOutcome> {
        let GuardResult { allow_execute, plan } = guarded;

        if !allow_execute || plan.is_clarification() {
            let question = non_blank(plan.clarifying_question.as_deref())
                .unwrap_or(DEFAULT_CLARIFICATION)
                .to_string();
            debug!("plan needs clarification");
            return Ok(CompileOutcome::Clarify { plan, question });
        }

        let validated = match self.validator.validate(&plan)? {
            ValidatedPlan::Clarification { question, .. } => {
                return Ok(CompileOutcome::Clarify { plan, question })
            }
            ValidatedPlan::Query(query) => query,
        };

        let query = self.sql_compiler.build(&validated)?;
        let schema = self
            .registry
            .dataset(&validated.dataset)
            .ok_or_else(|| ChatBiError::UnsupportedDataset(validated.dataset.clone()))?;
        SqlSafetyGuard::for_dataset(schema).assert_safe_select(&query.sql)?;

        Ok(CompileOutcome::Ready { plan, query })
    }
}

impl Default for ChatBiCompiler<'static> {
    fn default() -> Self {
        Self::new(&SCHEMA_REGISTRY, LimitPolicy::default())
    }
}

/// Answer to one question
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    pub request_id: String,
    pub need_clarification: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarifying_question: Option<String>,
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<QueryResult>,
    /// Executed SQL, admins only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_sql: Option<String>,
    /// Guarded plan as JSON, admins only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_plan: Option<String>,
}

/// Full question-answering engine
pub struct ChatBiEngine<'r, G, E> {
    compiler: ChatBiCompiler<'r>,
    generator: G,
    executor: E,
    config: ChatBiConfig,
}

impl<G, E> ChatBiEngine<'static, G, E>
where
    G: PlanGenerator,
    E: QueryExecutor,
{
    pub fn new(generator: G, executor: E, config: ChatBiConfig) -> Self {
        Self::with_registry(&SCHEMA_REGISTRY, generator, executor, config)
    }
}

impl<'r, G, E> ChatBiEngine<'r, G, E>
where
    G: PlanGenerator,
    E: QueryExecutor,
{
    pub fn with_registry(registry: &'r SchemaRegistry, generator: G, executor: E, config: ChatBiConfig) -> Self {
        Self {
            compiler: ChatBiCompiler::new(registry, config.limit_policy()).with_dialect(executor.dialect()),
            generator,
            executor,
            config,
        }
    }

    pub fn config(&self) -> &ChatBiConfig {
        &self.config
    }

    /// Answer `question` for `user`.
    ///
    /// Rejected plans become a response carrying a generic message; failures of the
    /// plan generator or the executor are returned as errors.
    pub fn ask(&self, user: &UserContext, question: &str) -> Result<AskResponse> {
        let request_id = Uuid::new_v4().to_string();
        let span = info_span!("chatbi_ask", request_id = %request_id, user_id = user.user_id);
        let _enter = span.enter();

        let question = non_blank(Some(question))
            .ok_or_else(|| ChatBiError::InvalidPlan("question must not be blank".to_string()))?;
        info!(
            username = %user.username,
            role = user.role.as_str(),
            "🔍 ChatBI question: {}",
            question
        );

        let mut response = AskResponse {
            request_id,
            ..Default::default()
        };

        let plan = self.generator.generate_plan(user, question)?;

        let guarded = match self.compiler.guard(user, question, plan) {
            Ok(guarded) => guarded,
            Err(e) => return self.reject(e, response, user, None),
        };
        let plan_json = guarded.plan.to_json().ok();

        let outcome = match self.compiler.compile_guarded(guarded) {
            Ok(outcome) => outcome,
            Err(e) => return self.reject(e, response, user, plan_json),
        };

        match outcome {
            CompileOutcome::Clarify { question, .. } => {
                info!("asking for clarification");
                response.need_clarification = true;
                response.answer = question.clone();
                response.clarifying_question = Some(question);
                self.attach_debug(&mut response, user, None, plan_json);
            }
            CompileOutcome::Ready { query, .. } => {
                let mut result = self.executor.execute(&query)?;
                info!(
                    rows = result.row_count,
                    engine = self.executor.name(),
                    elapsed_ms = result.execution_time_ms,
                    "query executed"
                );
                response.answer = answer_text(&result);
                result.truncate(self.config.max_rows_rendered);
                response.result = Some(result);
                self.attach_debug(&mut response, user, Some(query.sql), plan_json);
            }
        }

        Ok(response)
    }

    fn reject(
        &self,
        err: ChatBiError,
        mut response: AskResponse,
        user: &UserContext,
        plan_json: Option<String>,
    ) -> Result<AskResponse> {
        if !err.is_pipeline_rejection() {
            return Err(err);
        }
        warn!(kind = ?err.kind(), "question rejected: {}", err);
        response.answer = err.user_message().to_string();
        self.attach_debug(&mut response, user, None, plan_json);
        Ok(response)
    }

    fn attach_debug(
        &self,
        response: &mut AskResponse,
        user: &UserContext,
        sql: Option<String>,
        plan_json: Option<String>,
    ) {
        if user.is_admin() && self.config.expose_debug_to_admin {
            response.debug_sql = sql;
            response.debug_plan = plan_json;
        } else {
            response.debug_sql = None;
            response.debug_plan = None;
        }
    }
}

/// Short natural-language summary of a result.
pub fn answer_text(result: &QueryResult) -> String {
    if result.is_empty() {
        return "No matching data.".to_string();
    }
    match result.rows.len() {
        1 => {
            let row = &result.rows[0];
            if row.is_empty() {
                return "No matching data.".to_string();
            }
            let parts: Vec<String> = row
                .iter()
                .enumerate()
                .map(|(i, value)| {
                    let column = result
                        .columns
                        .get(i)
                        .cloned()
                        .unwrap_or_else(|| format!("col{}", i));
                    format!("{}={}", column, display_value(value))
                })
                .collect();
            format!("Result: {}", parts.join(", "))
        }
        n => format!("Returned {} rows.", n),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

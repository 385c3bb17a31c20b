//! Permission Guard
//!
//! Row-level scoping for non-admin callers. A plain user only ever sees rows assigned
//! to them: questions that obviously span several people are turned into a
//! clarification, everything else gets a forced `ASSIGNEE_ID = <caller>` filter.

use crate::error::{ChatBiError, Result};
use crate::intent::query_plan::{non_blank, Filter, QueryPlan};
use crate::security::policy::UserContext;
use crate::semantic::field::{Aggregation, FilterOp};
use crate::semantic::registry::{DatasetSchema, SchemaRegistry, SCHEMA_REGISTRY};
use tracing::{debug, warn};

/// Asked when a plain user requests data about other people.
pub const SELF_SCOPE_CLARIFICATION: &str =
    "As a regular user I can only query your own tasks. Would you like the same statistics for your own tasks instead?";

/// Phrases that signal a question about several people.
const CROSS_PERSON_CUES: &[&str] = &[
    "多少人",
    "每个人",
    "所有人",
    "全员",
    "大家",
    "人员",
    "everyone",
    "everybody",
    "each person",
    "every person",
    "how many people",
    "all users",
    "per person",
    "whole team",
    "team members",
];

/// Guard decision
#[derive(Debug, Clone, PartialEq)]
pub struct GuardResult {
    /// False when `plan` is a clarification that must not be executed
    pub allow_execute: bool,
    pub plan: QueryPlan,
}

impl GuardResult {
    pub fn allow(plan: QueryPlan) -> Self {
        Self {
            allow_execute: true,
            plan,
        }
    }

    pub fn clarify(plan: QueryPlan) -> Self {
        Self {
            allow_execute: false,
            plan,
        }
    }
}

pub struct PermissionGuard<'r> {
    registry: &'r SchemaRegistry,
}

impl<'r> PermissionGuard<'r> {
    pub fn new(registry: &'r SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Scope `plan` to what `user` may see.
    ///
    /// Admins pass through untouched. For everyone else the first `ASSIGNEE_ID EQ`
    /// filter decides: if it already names the caller the plan is allowed as is.
    pub fn apply_and_maybe_clarify(
        &self,
        user: &UserContext,
        question: &str,
        plan: QueryPlan,
    ) -> Result<GuardResult> {
        if user.is_admin() {
            debug!(user_id = user.user_id, "admin caller, no row scoping");
            return Ok(GuardResult::allow(plan));
        }
        if user.user_id <= 0 {
            return Err(ChatBiError::Unauthorized(format!(
                "invalid user id {}",
                user.user_id
            )));
        }

        let schema = self.registry.dataset_or_default(plan.dataset.as_deref());
        let caller_id = user.user_id.to_string();

        if has_self_scope(schema, &plan, &caller_id) {
            debug!(user_id = user.user_id, "plan already scoped to caller");
            return Ok(GuardResult::allow(plan));
        }

        if looks_cross_person(schema, question, &plan) {
            warn!(
                user_id = user.user_id,
                "cross-person question from non-admin caller, asking for clarification"
            );
            return Ok(GuardResult::clarify(QueryPlan::clarification(
                plan.dataset,
                SELF_SCOPE_CLARIFICATION,
            )));
        }

        Ok(GuardResult::allow(enforce_scope(schema, plan, caller_id)))
    }
}

/// Guard against the process-wide registry.
pub fn apply_and_maybe_clarify(
    user: &UserContext,
    question: &str,
    plan: QueryPlan,
) -> Result<GuardResult> {
    PermissionGuard::new(&SCHEMA_REGISTRY).apply_and_maybe_clarify(user, question, plan)
}

fn is_scoped_field(schema: &DatasetSchema, filter: &Filter) -> bool {
    non_blank(filter.field.as_deref()) == Some(schema.scoped_field)
}

fn has_self_scope(schema: &DatasetSchema, plan: &QueryPlan, caller_id: &str) -> bool {
    plan.filters
        .iter()
        .filter(|f| is_scoped_field(schema, f))
        .find(|f| {
            f.op.as_deref().and_then(FilterOp::parse) == Some(FilterOp::Eq)
        })
        .map_or(false, |f| non_blank(f.value.as_deref()) == Some(caller_id))
}

fn looks_cross_person(schema: &DatasetSchema, question: &str, plan: &QueryPlan) -> bool {
    let grouped_by_person = plan.dimensions.iter().any(|d| {
        d.field
            .as_deref()
            .map_or(false, |f| schema.is_cross_person_field(f))
    });
    if grouped_by_person {
        return true;
    }

    let counts_people = plan.measures.iter().any(|m| {
        m.agg.as_deref().and_then(Aggregation::parse) == Some(Aggregation::CountDistinct)
            && non_blank(m.field.as_deref()) == Some(schema.scoped_field)
    });
    if counts_people {
        return true;
    }

    let question = question.trim().to_lowercase();
    !question.is_empty() && CROSS_PERSON_CUES.iter().any(|cue| question.contains(cue))
}

fn enforce_scope(schema: &DatasetSchema, mut plan: QueryPlan, caller_id: String) -> QueryPlan {
    let before = plan.filters.len();
    plan.filters.retain(|f| !is_scoped_field(schema, f));
    if plan.filters.len() != before {
        warn!(
            removed = before - plan.filters.len(),
            "dropped caller-supplied {} filters",
            schema.scoped_field
        );
    }
    plan.filters.push(Filter::eq(schema.scoped_field, caller_id));
    plan
}

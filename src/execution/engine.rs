//! Execution Engine abstraction

use crate::error::Result;
use crate::execution::result::QueryResult;
use crate::semantic::field::SqlDialect;
use crate::sql_compiler::BuiltQuery;

/// Runs a compiled, safety-checked query.
///
/// Implementations must bind `BuiltQuery::params` positionally and must never
/// interpolate them into the SQL text.
pub trait QueryExecutor: Send + Sync {
    /// Engine name (e.g., "sqlite")
    fn name(&self) -> &'static str;

    /// SQL flavor the engine expects field expressions in
    fn dialect(&self) -> SqlDialect {
        SqlDialect::MySql
    }

    fn execute(&self, query: &BuiltQuery) -> Result<QueryResult>;
}

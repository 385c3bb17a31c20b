//! SQLite Execution Engine
//!
//! Executes compiled queries over a `rusqlite` connection. Parameters are always bound
//! positionally; timestamps are bound as `yyyy-MM-dd HH:mm:ss` text.

use crate::error::{ChatBiError, Result};
use crate::execution::engine::QueryExecutor;
use crate::execution::result::QueryResult;
use crate::semantic::field::SqlDialect;
use crate::sql_compiler::{BuiltQuery, SqlParam};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use serde_json::{Number, Value};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlParam::Integer(v) => ToSqlOutput::from(*v),
            SqlParam::Decimal(v) => ToSqlOutput::from(*v),
            SqlParam::Timestamp(ts) => ToSqlOutput::from(ts.format(TIMESTAMP_FORMAT).to_string()),
            SqlParam::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

/// SQLite execution engine
pub struct SqliteExecutor {
    conn: Mutex<Connection>,
}

impl SqliteExecutor {
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening SQLite database {}", path.display());
        Ok(Self::from_connection(Connection::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    /// Run raw statements (schema setup, fixtures). Never used for compiled queries.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.connection()?.execute_batch(sql)?;
        Ok(())
    }

    fn connection(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ChatBiError::Execution("SQLite connection lock poisoned".to_string()))
    }
}

impl QueryExecutor for SqliteExecutor {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    fn execute(&self, query: &BuiltQuery) -> Result<QueryResult> {
        let start = Instant::now();
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&query.sql)?;

        let width = stmt.column_count();
        let columns = if query.columns.len() == width {
            query.columns.clone()
        } else {
            stmt.column_names().into_iter().map(str::to_string).collect()
        };

        let mut rows = Vec::new();
        let mut cursor = stmt.query(params_from_iter(query.params.iter()))?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(value_ref_to_json(row.get_ref(idx)?));
            }
            rows.push(values);
        }

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(rows = rows.len(), elapsed_ms = elapsed, "SQLite query finished");
        Ok(QueryResult::new(self.name(), columns, rows, elapsed))
    }
}

fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

//! Query Result - Standardized result format from execution engines

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;

/// Standardized query result from any execution engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Display names, one per select item
    pub columns: Vec<String>,

    /// Row values in column order
    pub rows: Vec<Vec<Value>>,

    /// Number of rows the engine returned, before any truncation
    pub row_count: usize,

    /// True when `rows` holds fewer rows than `row_count`
    #[serde(default)]
    pub truncated: bool,

    /// Execution time in milliseconds
    pub execution_time_ms: u64,

    /// Engine that executed the query
    pub engine_name: String,
}

impl QueryResult {
    pub fn new(
        engine_name: impl Into<String>,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            columns,
            row_count: rows.len(),
            rows,
            truncated: false,
            execution_time_ms,
            engine_name: engine_name.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Keep at most `max_rows` rows; `row_count` still reports the full size.
    pub fn truncate(&mut self, max_rows: usize) {
        if self.rows.len() > max_rows {
            self.rows.truncate(max_rows);
            self.truncated = true;
        }
    }

    /// Write a header line and one CSV record per row.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer
            .write_record(&self.columns)
            .map_err(std::io::Error::from)?;
        for row in &self.rows {
            csv_writer
                .write_record(row.iter().map(cell_text))
                .map_err(std::io::Error::from)?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

/// Plain text for a cell: strings unquoted, null empty.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

//! Compiled statements and execution results.

use crate::row::Row;
use crate::value::Value;

/// Which operation a compiled statement performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
    /// Hand-written SQL; the kind is unknown to the builder
    #[default]
    Raw,
}

/// SQL text plus its ordered parameter values, ready for a driver.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub parameters: Vec<Value>,
    pub kind: QueryKind,
}

impl CompiledQuery {
    pub fn new(kind: QueryKind, sql: impl Into<String>, parameters: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            parameters,
            kind,
        }
    }

    /// Wrap hand-written SQL.
    pub fn raw(sql: impl Into<String>, parameters: Vec<Value>) -> Self {
        Self::new(QueryKind::Raw, sql, parameters)
    }
}

/// Outcome of executing one statement.
///
/// `num_affected_rows` and `insert_id` are only present when the driver
/// reports them; read-only statements carry neither.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub num_affected_rows: Option<u64>,
    pub insert_id: Option<i64>,
}

impl QueryResult {
    /// Result carrying only rows.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// First row, if any.
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

//! A unit of SQL work that can cross threads.

use rusqlite::types::Value;

/// Callback receiving the ROWID generated by an INSERT, invoked on the
/// engine thread once the owning batch has committed.
pub type InsertCallback = Box<dyn FnOnce(i64) + Send>;

/// Callback receiving one materialized result row, invoked on the engine
/// thread once the owning batch has committed.
pub type RowCallback = Box<dyn FnMut(&[Value]) + Send>;

/// What a query produces.  Exactly one per query, fixed at construction.
pub(crate) enum Outcome {
    /// Fire and forget (DDL, UPDATE, DELETE).
    None,
    /// The statement inserts and the caller wants the new ROWID.
    InsertId(InsertCallback),
    /// The statement selects and the caller wants every row.
    Rows(RowCallback),
}

/// One SQL statement with owned parameter bindings.
///
/// Queries are submitted to the engine in batches; a batch of more than
/// one query executes inside a single transaction.  Parameters are owned
/// [`Value`]s so a query can be built on any thread and executed on the
/// engine's.
pub struct Query {
    pub(crate) sql: String,
    pub(crate) params: Vec<Value>,
    pub(crate) outcome: Outcome,
}

impl Query {
    /// A statement with no parameters and no result.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            outcome: Outcome::None,
        }
    }

    /// A statement with bound parameters and no result.
    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
            outcome: Outcome::None,
        }
    }

    /// An INSERT whose generated ROWID is handed to `on_insert` after the
    /// batch commits.  If the statement ends up inserting nothing (e.g.
    /// `INSERT OR IGNORE` hitting an existing row), the callback never
    /// runs.
    pub fn returning_id(
        sql: impl Into<String>,
        params: Vec<Value>,
        on_insert: impl FnOnce(i64) + Send + 'static,
    ) -> Self {
        Self {
            sql: sql.into(),
            params,
            outcome: Outcome::InsertId(Box::new(on_insert)),
        }
    }

    /// A SELECT whose rows are handed one by one to `on_row` after the
    /// batch commits.
    pub fn with_rows(
        sql: impl Into<String>,
        params: Vec<Value>,
        on_row: impl FnMut(&[Value]) + Send + 'static,
    ) -> Self {
        Self {
            sql: sql.into(),
            params,
            outcome: Outcome::Rows(Box::new(on_row)),
        }
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("sql", &self.sql)
            .field("params", &self.params.len())
            .finish()
    }
}

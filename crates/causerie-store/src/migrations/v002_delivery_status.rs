use crate::database::Database;
use crate::error::QueryError;
use crate::query::Query;

// Rows written before this version predate delivery tracking and are
// treated as delivered.
pub fn up(_db: &Database) -> Result<Vec<Query>, QueryError> {
    Ok(vec![Query::new(
        "ALTER TABLE history ADD COLUMN is_complete INTEGER NOT NULL DEFAULT 1",
    )])
}

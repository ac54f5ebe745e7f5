use crate::database::Database;
use crate::error::QueryError;
use crate::query::Query;

// Older rows have no captured sender name; the UI falls back to the
// live roster for them.
pub fn up(_db: &Database) -> Result<Vec<Query>, QueryError> {
    Ok(vec![Query::new(
        "ALTER TABLE history ADD COLUMN display_name TEXT NOT NULL DEFAULT ''",
    )])
}

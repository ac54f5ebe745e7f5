//! v001 -- Initial schema creation.
//!
//! Creates the two core tables: `peers` (surrogate ids for binary chat
//! identities) and `history` (message records), plus the chat/time index.

use crate::database::Database;
use crate::error::QueryError;
use crate::query::Query;

/// Statements executed when upgrading from version 0 to version 1; one
/// query per statement so the step commits as a single batch.
const UP_SQL: &[&str] = &[
    // ----------------------------------------------------------------
    // Peers: one row per identity ever referenced.  AUTOINCREMENT keeps
    // the id sequence monotonic, so the id of a deleted row is never
    // handed out again.
    // ----------------------------------------------------------------
    "CREATE TABLE IF NOT EXISTS peers (
        id       INTEGER PRIMARY KEY AUTOINCREMENT,
        identity BLOB NOT NULL UNIQUE             -- raw key material, 32 or 16 bytes
    )",
    // ----------------------------------------------------------------
    // History: one row per message.
    // ----------------------------------------------------------------
    "CREATE TABLE IF NOT EXISTS history (
        id        INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp INTEGER NOT NULL,               -- milliseconds since the Unix epoch
        chat_id   INTEGER NOT NULL REFERENCES peers(id) ON DELETE CASCADE,
        sender_id INTEGER REFERENCES peers(id) ON DELETE SET NULL,
        message   TEXT NOT NULL,
        is_sent   INTEGER NOT NULL DEFAULT 0      -- direction: 1 = sent by us
    )",
    "CREATE INDEX IF NOT EXISTS idx_history_chat_ts ON history(chat_id, timestamp)",
];

/// Build the initial migration batch.
pub fn up(_db: &Database) -> Result<Vec<Query>, QueryError> {
    Ok(UP_SQL.iter().map(|sql| Query::new(*sql)).collect())
}

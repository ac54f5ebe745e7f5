//! Schema upgrade chain.
//!
//! The stored version lives in SQLite's `user_version` pragma.  Each step
//! is a pure function from the engine handle to the batch that performs
//! it; the runner appends the version bump to that same batch, so a step
//! commits atomically with its version and can never half-apply or rerun.

pub mod v001_initial;
pub mod v002_delivery_status;
pub mod v003_display_names;

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::types::Value;

use crate::database::Database;
use crate::error::{QueryError, SchemaError};
use crate::query::Query;

/// Current schema version.  Bump this and add a new migration module
/// whenever the schema changes.
pub const SCHEMA_VERSION: u32 = 3;

/// One step of the upgrade chain.
struct Migration {
    version: u32,
    name: &'static str,
    up: fn(&Database) -> Result<Vec<Query>, QueryError>,
}

/// The whole chain, in order; versions are contiguous from 1.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial",
        up: v001_initial::up,
    },
    Migration {
        version: 2,
        name: "delivery status",
        up: v002_delivery_status::up,
    },
    Migration {
        version: 3,
        name: "display names",
        up: v003_display_names::up,
    },
];

/// Bring the open database up to [`SCHEMA_VERSION`].
///
/// This is the upgrade callback [`crate::History`] hands to
/// [`Database::open`]; tests drive partial chains through the same
/// mechanism.  A version newer than [`SCHEMA_VERSION`] means the file
/// belongs to a newer release and is refused rather than guessed at.
pub fn run_migrations(db: &Database) -> Result<(), SchemaError> {
    let current = schema_version(db).map_err(SchemaError::Version)?;

    if current > SCHEMA_VERSION {
        return Err(SchemaError::FromTheFuture {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }
    if current == SCHEMA_VERSION {
        tracing::debug!(version = current, "database schema up to date");
        return Ok(());
    }

    tracing::info!(
        current_version = current,
        target_version = SCHEMA_VERSION,
        "upgrading database schema"
    );

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        apply(db, migration)?;
    }
    Ok(())
}

/// Run a single step, bumping `user_version` in the same transaction.
fn apply(db: &Database, migration: &Migration) -> Result<(), SchemaError> {
    tracing::info!(
        version = migration.version,
        name = migration.name,
        "applying migration"
    );
    let mut batch = (migration.up)(db).map_err(|source| SchemaError::Migration {
        version: migration.version,
        source,
    })?;
    batch.push(Query::new(format!(
        "PRAGMA user_version = {}",
        migration.version
    )));
    db.exec_now(batch).map_err(|source| SchemaError::Migration {
        version: migration.version,
        source,
    })
}

/// Read the stored `user_version`.
pub fn schema_version(db: &Database) -> Result<u32, QueryError> {
    let version = Arc::new(Mutex::new(0u32));
    let sink = Arc::clone(&version);
    db.exec_now(vec![Query::with_rows(
        "PRAGMA user_version",
        Vec::new(),
        move |row| {
            if let Some(Value::Integer(v)) = row.first() {
                *sink.lock() = *v as u32;
            }
        },
    )])?;
    let current = *version.lock();
    Ok(current)
}

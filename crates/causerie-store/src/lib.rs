//! # causerie-store
//!
//! Persistent chat history for the Causerie application, backed by SQLite
//! (SQLCipher with the `sqlcipher` feature).
//!
//! A dedicated thread owns the `rusqlite::Connection`; callers hand it
//! batches of [`Query`] values through the [`Database`] handle, either
//! fire-and-forget or blocking.  [`History`] builds on that engine and
//! implements the message log itself: surrogate peer ids, schema
//! migrations, windowed reads and phrase search.

pub mod database;
pub mod history;
pub mod migrations;
pub mod models;
pub mod query;
pub mod search;

mod error;

pub use database::Database;
pub use error::{OpenError, QueryError, SchemaError};
pub use history::{History, NUM_MESSAGES_DEFAULT};
pub use models::*;
pub use query::{InsertCallback, Query, RowCallback};
pub use search::{SearchParams, SearchPeriod};

// Callers bind query parameters as `rusqlite::types::Value`.
pub use rusqlite;

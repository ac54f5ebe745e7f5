use thiserror::Error;

/// Errors produced while opening a history database.
///
/// Callers are expected to treat any of these as "history unavailable"
/// and keep running without persistence.
#[derive(Error, Debug)]
pub enum OpenError {
    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file could not be opened at all.
    #[error("Could not open database file: {0}")]
    Open(#[source] rusqlite::Error),

    /// The file exists but the supplied key does not unlock it.
    #[error("Database key rejected: {0}")]
    WrongKey(#[source] rusqlite::Error),

    /// No key was supplied and the file is not a readable database.
    #[error("Database file is corrupt or not a database: {0}")]
    Corrupt(#[source] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// The schema upgrade chain failed; the file is left untouched past
    /// the last good version.
    #[error("Schema upgrade failed: {0}")]
    Schema(#[from] SchemaError),
}

/// Errors produced by the schema upgrade chain.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// Could not read the stored schema version.
    #[error("Could not read schema version: {0}")]
    Version(#[source] QueryError),

    /// The file was written by a newer release.
    #[error("Database schema version {found} is newer than supported version {supported}")]
    FromTheFuture { found: u32, supported: u32 },

    /// One upgrade step failed and was rolled back.
    #[error("Migration to version {version} failed: {source}")]
    Migration { version: u32, source: QueryError },
}

/// Errors produced when executing a query batch.
#[derive(Error, Debug)]
pub enum QueryError {
    /// SQLite / SQLCipher error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The engine has shut down; the batch was not executed.
    #[error("Database is closed")]
    Closed,

    /// A message referenced an empty chat or sender identity.
    #[error("Empty identity")]
    EmptyIdentity,
}

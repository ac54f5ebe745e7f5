//! The execution engine: a worker thread owning the SQLite connection,
//! fed by an ordered queue of query batches.
//!
//! Every batch runs exactly as submitted, strictly in submission order,
//! no matter which thread submitted it.  A batch of more than one query
//! is wrapped in a transaction; a single query runs in autocommit, which
//! is what lets `VACUUM` through.  Callbacks attached to queries fire on
//! the worker thread after the batch commits, so a rolled-back batch
//! never leaks partial results.
//!
//! Note: SQLCipher (encrypted SQLite) requires OpenSSL at build time.
//! The default `sqlite-plain` feature builds plain SQLite, where the key
//! pragma is accepted and ignored; builds that ship encrypted history
//! enable the `sqlcipher` feature instead.

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use directories::ProjectDirs;
use parking_lot::Mutex;
use regex::{Regex, RegexBuilder};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::{Value, ValueRef};
use rusqlite::Connection;

use crate::error::{OpenError, QueryError, SchemaError};
use crate::query::{InsertCallback, Outcome, Query, RowCallback};

/// Work accepted by the worker thread.
enum Job {
    Batch(Batch),
    #[cfg(feature = "sqlcipher")]
    Rekey {
        key: [u8; 32],
        reply: Sender<Result<(), QueryError>>,
    },
}

struct Batch {
    queries: Vec<Query>,
    reply: Option<Sender<Result<(), QueryError>>>,
}

/// Handle to the single-writer database engine.
///
/// Every method takes `&self`; the handle is shared between threads
/// behind an `Arc`.  Dropping the last handle drains the queue and joins
/// the worker.
pub struct Database {
    /// The only `Sender` for the worker's queue.  [`close`](Self::close)
    /// takes it, which both rejects later submissions and disconnects
    /// the channel so the worker stops once the backlog is drained.
    jobs: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    path: PathBuf,
}

impl Database {
    /// Open (or create) a database at an explicit path and run `upgrade`
    /// against it before returning.
    ///
    /// `key` is the raw 256-bit encryption key, derived by the caller
    /// from the user passphrase; `None` opens an unencrypted database.
    /// The upgrade callback runs while this handle is still private, so
    /// no foreign batch can interleave with the schema work.
    pub fn open<F>(path: &Path, key: Option<&[u8; 32]>, upgrade: F) -> Result<Self, OpenError>
    where
        F: FnOnce(&Self) -> Result<(), SchemaError>,
    {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(path).map_err(OpenError::Open)?;

        if let Some(key) = key {
            // Raw-key form, bypassing the passphrase KDF.  Plain SQLite
            // accepts and ignores the pragma.
            conn.execute_batch(&format!("PRAGMA key = \"x'{}'\";", hex::encode(key)))
                .map_err(OpenError::Open)?;
        }

        // First real read of the file: this is where a wrong key or a
        // non-database file shows up.
        if let Err(e) = conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |_row| Ok(())) {
            return Err(match key {
                Some(_) => OpenError::WrongKey(e),
                None => OpenError::Corrupt(e),
            });
        }

        // Recommended SQLite settings.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(OpenError::Open)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(OpenError::Open)?;

        register_search_functions(&conn).map_err(OpenError::Open)?;

        let (jobs, queue) = unbounded::<Job>();
        let worker = std::thread::Builder::new()
            .name("causerie-db".into())
            .spawn(move || run_loop(conn, queue))?;

        let db = Self {
            jobs: Mutex::new(Some(jobs)),
            worker: Mutex::new(Some(worker)),
            path: path.to_path_buf(),
        };

        if let Err(e) = upgrade(&db) {
            db.close();
            return Err(OpenError::Schema(e));
        }

        Ok(db)
    }

    /// Open (or create) the default per-user database.
    ///
    /// The database file is placed in the platform-appropriate data
    /// directory:
    /// - Linux:   `~/.local/share/causerie/causerie.db`
    /// - macOS:   `~/Library/Application Support/org.causerie.causerie/causerie.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\causerie\causerie\data\causerie.db`
    pub fn open_default<F>(key: Option<&[u8; 32]>, upgrade: F) -> Result<Self, OpenError>
    where
        F: FnOnce(&Self) -> Result<(), SchemaError>,
    {
        let project_dirs =
            ProjectDirs::from("org", "causerie", "causerie").ok_or(OpenError::NoDataDir)?;
        let db_path = project_dirs.data_dir().join("causerie.db");
        Self::open(&db_path, key, upgrade)
    }

    /// Enqueue a batch and return without waiting for it.
    ///
    /// Failures are logged on the worker thread; `Err` here only means
    /// the engine has already closed.  An `Ok` batch is guaranteed to
    /// run, even if [`close`](Self::close) races with the submission.
    pub fn exec_later(&self, queries: Vec<Query>) -> Result<(), QueryError> {
        self.submit(Job::Batch(Batch {
            queries,
            reply: None,
        }))
    }

    /// Enqueue a batch and block until it has run, returning its outcome.
    /// All of its callbacks have fired by the time this returns.
    pub fn exec_now(&self, queries: Vec<Query>) -> Result<(), QueryError> {
        let (reply, done) = bounded(1);
        self.submit(Job::Batch(Batch {
            queries,
            reply: Some(reply),
        }))?;
        done.recv().map_err(|_| QueryError::Closed)?
    }

    /// Re-encrypt the database file under a new key, serialized with the
    /// batch queue.
    #[cfg(feature = "sqlcipher")]
    pub fn rekey(&self, new_key: &[u8; 32]) -> Result<(), QueryError> {
        let (reply, done) = bounded(1);
        self.submit(Job::Rekey {
            key: *new_key,
            reply,
        })?;
        done.recv().map_err(|_| QueryError::Closed)?
    }

    /// Hand a job to the worker, or refuse if the engine has closed.
    /// The lock makes the send atomic with the closed check: a job
    /// accepted here is already in the queue when `close` disconnects
    /// it, so the drain picks it up.
    fn submit(&self, job: Job) -> Result<(), QueryError> {
        match self.jobs.lock().as_ref() {
            Some(jobs) => jobs.send(job).map_err(|_| QueryError::Closed),
            None => Err(QueryError::Closed),
        }
    }

    /// The filesystem path this database was opened at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drain every batch enqueued so far, then stop the worker and
    /// release the connection.  Safe to call more than once; `Drop`
    /// calls it.
    pub fn close(&self) {
        // Dropping the only sender rejects everything submitted from
        // here on and lets the worker run the queue dry.
        drop(self.jobs.lock().take());
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        tracing::info!(path = %self.path.display(), "closing database");
        if handle.join().is_err() {
            tracing::error!("database worker thread panicked");
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Worker thread
// ---------------------------------------------------------------------------

/// Per-query results held back until the batch commits.
enum Pending {
    InsertId(InsertCallback, Option<i64>),
    Rows(RowCallback, Vec<Vec<Value>>),
}

fn run_loop(mut conn: Connection, jobs: Receiver<Job>) {
    // `iter` ends only once the sender is gone *and* the buffer is
    // empty, so every accepted job still runs after `close`.
    for job in jobs.iter() {
        match job {
            Job::Batch(Batch { queries, reply }) => {
                let result = execute_batch(&mut conn, queries);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            tracing::warn!(error = %e, "dropping failed write batch");
                        }
                    }
                }
            }
            #[cfg(feature = "sqlcipher")]
            Job::Rekey { key, reply } => {
                let result = conn
                    .execute_batch(&format!("PRAGMA rekey = \"x'{}'\";", hex::encode(key)))
                    .map_err(QueryError::from);
                let _ = reply.send(result);
            }
        }
    }
    if let Err((_conn, e)) = conn.close() {
        tracing::warn!(error = %e, "could not close database cleanly");
    }
}

/// Run one batch to completion, then deliver its callbacks.
///
/// Multi-query batches are transactional: the first failing statement
/// rolls back everything before it and skips everything after it.  No
/// callback observes a rolled-back batch.
fn execute_batch(conn: &mut Connection, queries: Vec<Query>) -> Result<(), QueryError> {
    let multi = queries.len() > 1;
    let mut pending: Vec<Pending> = Vec::with_capacity(queries.len());

    let result = (|| {
        if multi {
            let tx = conn.transaction().map_err(QueryError::Sqlite)?;
            for query in queries {
                run_query(&tx, query, &mut pending)?;
            }
            tx.commit().map_err(QueryError::Sqlite)?;
        } else {
            for query in queries {
                run_query(conn, query, &mut pending)?;
            }
        }
        Ok(())
    })();

    if let Err(e) = result {
        return Err(e);
    }

    for entry in pending {
        match entry {
            Pending::InsertId(callback, Some(id)) => callback(id),
            Pending::InsertId(_, None) => {}
            Pending::Rows(mut callback, rows) => {
                for row in &rows {
                    callback(row);
                }
            }
        }
    }
    Ok(())
}

fn run_query(conn: &Connection, query: Query, pending: &mut Vec<Pending>) -> Result<(), QueryError> {
    let Query {
        sql,
        params,
        outcome,
    } = query;
    let result = run_statement(conn, &sql, params, outcome, pending);
    if let Err(e) = &result {
        tracing::warn!(sql = %sql, error = %e, "query failed");
    }
    result.map_err(QueryError::Sqlite)
}

fn run_statement(
    conn: &Connection,
    sql: &str,
    params: Vec<Value>,
    outcome: Outcome,
    pending: &mut Vec<Pending>,
) -> Result<(), rusqlite::Error> {
    let mut stmt = conn.prepare(sql)?;
    match outcome {
        Outcome::None => {
            stmt.execute(rusqlite::params_from_iter(params))?;
        }
        Outcome::InsertId(callback) => {
            let inserted = stmt.execute(rusqlite::params_from_iter(params))?;
            // INSERT OR IGNORE hitting an existing row inserts nothing
            // and must not report a stale ROWID.
            let id = (inserted > 0).then(|| conn.last_insert_rowid());
            pending.push(Pending::InsertId(callback, id));
        }
        Outcome::Rows(callback) => {
            let columns = stmt.column_count();
            let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
            let mut buffered = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(columns);
                for index in 0..columns {
                    values.push(row.get::<_, Value>(index)?);
                }
                buffered.push(values);
            }
            pending.push(Pending::Rows(callback, buffered));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Search functions
// ---------------------------------------------------------------------------

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Register `regexp(pattern, text)` and `regexpsensitive(pattern, text)`.
///
/// SQLite routes its `REGEXP` operator to the `regexp` function, so the
/// history search can use either spelling.  The compiled pattern is
/// cached per statement through SQLite's aux-data slot.
fn register_search_functions(conn: &Connection) -> Result<(), rusqlite::Error> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    conn.create_scalar_function("regexp", 2, flags, |ctx| regexp_match(ctx, false))?;
    conn.create_scalar_function("regexpsensitive", 2, flags, |ctx| regexp_match(ctx, true))
}

fn regexp_match(ctx: &Context<'_>, case_sensitive: bool) -> Result<bool, rusqlite::Error> {
    let regex = ctx.get_or_create_aux(0, |pattern| -> Result<Regex, BoxError> {
        Ok(RegexBuilder::new(pattern.as_str()?)
            .case_insensitive(!case_sensitive)
            .build()?)
    })?;
    match ctx.get_raw(1) {
        ValueRef::Null => Ok(false),
        text => Ok(regex.is_match(text.as_str()?)),
    }
}

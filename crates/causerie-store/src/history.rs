//! Persistent chat history.
//!
//! [`History`] is the only read/write surface for stored messages.  It
//! owns the identity-to-row-id cache and turns every operation into a
//! batch for the engine: reads block on [`Database::exec_now`], writes go
//! through [`Database::exec_later`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use causerie_core::ChatId;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value;

use crate::database::Database;
use crate::error::{OpenError, QueryError};
use crate::migrations;
use crate::models::{DayCount, Message};
use crate::query::{InsertCallback, Query};
use crate::search::{SearchParams, SearchPeriod};

/// Window size of [`History::get_chat_history_default_num`].
pub const NUM_MESSAGES_DEFAULT: usize = 100;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Columns every message query selects, in [`message_from_row`] order.
const SELECT_MESSAGE: &str = "SELECT history.id, history.timestamp, chat.identity, \
     sender.identity, history.display_name, history.message, history.is_sent, \
     history.is_complete \
     FROM history \
     JOIN peers chat ON history.chat_id = chat.id \
     LEFT JOIN peers sender ON history.sender_id = sender.id";

/// The persistent message log of every conversation.
pub struct History {
    db: Arc<Database>,
    /// Identity -> `peers.id`.  Lazily filled; an entry leaves with its
    /// row, so a later reference creates a fresh id.
    peers: Arc<Mutex<HashMap<ChatId, i64>>>,
}

impl History {
    /// Open (or create) a history database at `path` and bring its
    /// schema up to date.
    ///
    /// `key` is the raw 256-bit encryption key derived by the caller
    /// from the user passphrase; `None` opens unencrypted history.
    pub fn open(path: &Path, key: Option<&[u8; 32]>) -> Result<Self, OpenError> {
        let db = Database::open(path, key, migrations::run_migrations)?;
        Ok(Self::new(Arc::new(db)))
    }

    /// Open (or create) the default per-user history database.
    pub fn open_default(key: Option<&[u8; 32]>) -> Result<Self, OpenError> {
        let db = Database::open_default(key, migrations::run_migrations)?;
        Ok(Self::new(Arc::new(db)))
    }

    /// Wrap an engine the caller has already opened and upgraded, e.g.
    /// one shared with other stores.
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            peers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The underlying engine.
    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Record a message.
    ///
    /// `is_sent` is the direction flag: messages we sent start
    /// incomplete until [`mark_as_sent`](Self::mark_as_sent), received
    /// ones are complete on arrival.  `on_insert_id` receives the new
    /// history row id on the engine thread once the batch commits.
    /// Empty identities are rejected.
    pub fn add_new_message(
        &self,
        chat: &ChatId,
        content: &str,
        sender: &ChatId,
        timestamp: DateTime<Utc>,
        is_sent: bool,
        display_name: &str,
        on_insert_id: Option<InsertCallback>,
    ) -> Result<(), QueryError> {
        let queries = self.new_message_queries(
            chat,
            content,
            sender,
            timestamp,
            is_sent,
            display_name,
            on_insert_id,
        )?;
        self.db.exec_later(queries)
    }

    /// Build the batch for one new message: ensure-queries for any
    /// identity not yet cached, then the INSERT resolving both
    /// identities by sub-select.
    fn new_message_queries(
        &self,
        chat: &ChatId,
        content: &str,
        sender: &ChatId,
        timestamp: DateTime<Utc>,
        is_sent: bool,
        display_name: &str,
        on_insert_id: Option<InsertCallback>,
    ) -> Result<Vec<Query>, QueryError> {
        let chat_blob = identity_blob(chat)?;
        let sender_blob = identity_blob(sender)?;

        let mut queries = Vec::new();
        self.ensure_peer_queries(chat, &chat_blob, &mut queries);
        if sender != chat {
            self.ensure_peer_queries(sender, &sender_blob, &mut queries);
        }

        let sql = "INSERT INTO history \
             (timestamp, chat_id, sender_id, message, is_sent, is_complete, display_name) \
             VALUES (?1, (SELECT id FROM peers WHERE identity = ?2), \
                     (SELECT id FROM peers WHERE identity = ?3), ?4, ?5, ?6, ?7)";
        let params = vec![
            Value::Integer(timestamp.timestamp_millis()),
            Value::Blob(chat_blob),
            Value::Blob(sender_blob),
            Value::Text(content.to_owned()),
            Value::Integer(is_sent as i64),
            // Received messages need no delivery confirmation.
            Value::Integer(!is_sent as i64),
            Value::Text(display_name.to_owned()),
        ];
        queries.push(match on_insert_id {
            Some(callback) => Query::returning_id(sql, params, callback),
            None => Query::with_params(sql, params),
        });
        Ok(queries)
    }

    /// On cache miss, queue an `INSERT OR IGNORE` plus the lookup whose
    /// row callback fills the cache.  The callback only runs once the
    /// batch commits, so a rollback cannot poison the cache.
    fn ensure_peer_queries(&self, id: &ChatId, blob: &[u8], queries: &mut Vec<Query>) {
        if self.peers.lock().contains_key(id) {
            return;
        }
        queries.push(Query::with_params(
            "INSERT OR IGNORE INTO peers (identity) VALUES (?1)",
            vec![Value::Blob(blob.to_vec())],
        ));
        let cache = Arc::clone(&self.peers);
        let id = *id;
        queries.push(Query::with_rows(
            "SELECT id FROM peers WHERE identity = ?1",
            vec![Value::Blob(blob.to_vec())],
            move |row| {
                if let Some(Value::Integer(row_id)) = row.first() {
                    cache.lock().insert(id, *row_id);
                }
            },
        ));
    }

    /// Flag a sent message as delivered.  Idempotent; fire-and-forget.
    pub fn mark_as_sent(&self, message_id: i64) -> Result<(), QueryError> {
        self.db.exec_later(vec![Query::with_params(
            "UPDATE history SET is_complete = 1 WHERE id = ?1",
            vec![Value::Integer(message_id)],
        )])
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Messages of `chat` with a timestamp in the inclusive range,
    /// oldest first.
    pub fn get_chat_history_from_date(
        &self,
        chat: &ChatId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Message>, QueryError> {
        let Some(chat_id) = self.chat_row_id(chat)? else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "{SELECT_MESSAGE} WHERE history.chat_id = ?1 \
             AND history.timestamp BETWEEN ?2 AND ?3 \
             ORDER BY history.timestamp ASC, history.id ASC"
        );
        self.collect_messages(
            sql,
            vec![
                Value::Integer(chat_id),
                Value::Integer(from.timestamp_millis()),
                Value::Integer(to.timestamp_millis()),
            ],
        )
    }

    /// The most recent [`NUM_MESSAGES_DEFAULT`] messages of `chat`,
    /// still oldest first.
    pub fn get_chat_history_default_num(&self, chat: &ChatId) -> Result<Vec<Message>, QueryError> {
        let Some(chat_id) = self.chat_row_id(chat)? else {
            return Ok(Vec::new());
        };
        // Newest window selected descending, then re-sorted ascending.
        let sql = format!(
            "SELECT * FROM ({SELECT_MESSAGE} WHERE history.chat_id = ?1 \
             ORDER BY history.timestamp DESC, history.id DESC LIMIT ?2) \
             ORDER BY timestamp ASC, id ASC"
        );
        self.collect_messages(
            sql,
            vec![
                Value::Integer(chat_id),
                Value::Integer(NUM_MESSAGES_DEFAULT as i64),
            ],
        )
    }

    /// Per-day message counts over the inclusive day range, keyed by
    /// offset from `from`.  Days without messages are omitted.
    pub fn get_chat_history_counts(
        &self,
        chat: &ChatId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DayCount>, QueryError> {
        let Some(chat_id) = self.chat_row_id(chat)? else {
            return Ok(Vec::new());
        };
        let start_ms = day_start_ms(from);
        let end_ms = to.succ_opt().map(day_start_ms).unwrap_or(i64::MAX);
        let first_day = start_ms / MS_PER_DAY;

        let buckets = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buckets);
        self.db.exec_now(vec![Query::with_rows(
            "SELECT COUNT(history.id), (history.timestamp / ?1) - ?2 AS day \
             FROM history \
             WHERE history.chat_id = ?3 AND history.timestamp >= ?4 AND history.timestamp < ?5 \
             GROUP BY day ORDER BY day ASC",
            vec![
                Value::Integer(MS_PER_DAY),
                Value::Integer(first_day),
                Value::Integer(chat_id),
                Value::Integer(start_ms),
                Value::Integer(end_ms),
            ],
            move |row| {
                if let (Some(Value::Integer(count)), Some(Value::Integer(day))) =
                    (row.first(), row.get(1))
                {
                    sink.lock().push(DayCount {
                        offset_days: *day as u32,
                        count: *count as u32,
                    });
                }
            },
        )])?;
        let counts = std::mem::take(&mut *buckets.lock());
        Ok(counts)
    }

    /// Timestamp of the match nearest to the search cursor, or `None`.
    ///
    /// A phrase that matches nothing is not an error.  Neither is an
    /// invalid user regex, which logs a warning and reports `None`.
    pub fn get_date_where_find_phrase(
        &self,
        chat: &ChatId,
        from: DateTime<Utc>,
        phrase: &str,
        params: &SearchParams,
    ) -> Result<Option<DateTime<Utc>>, QueryError> {
        let Some(chat_id) = self.chat_row_id(chat)? else {
            return Ok(None);
        };

        let (time_filter, order) = match params.period {
            SearchPeriod::Before => ("AND history.timestamp < ?3 ", "DESC"),
            SearchPeriod::FromStart => ("", "ASC"),
            SearchPeriod::AfterDate(_) => ("AND history.timestamp > ?3 ", "ASC"),
            SearchPeriod::BeforeDate(_) => ("AND history.timestamp < ?3 ", "DESC"),
        };
        let cursor = match params.period {
            SearchPeriod::Before => Some(from.timestamp_millis()),
            SearchPeriod::FromStart => None,
            SearchPeriod::AfterDate(day) | SearchPeriod::BeforeDate(day) => {
                Some(day_start_ms(day))
            }
        };

        let matcher = params.match_function();
        let sql = format!(
            "SELECT history.timestamp FROM history \
             WHERE history.chat_id = ?1 AND {matcher}(?2, history.message) {time_filter}\
             ORDER BY history.timestamp {order} LIMIT 1"
        );
        let mut query_params = vec![Value::Integer(chat_id), Value::Text(params.pattern(phrase))];
        if let Some(ms) = cursor {
            query_params.push(Value::Integer(ms));
        }

        let found = Arc::new(Mutex::new(None::<i64>));
        let sink = Arc::clone(&found);
        let result = self.db.exec_now(vec![Query::with_rows(
            sql,
            query_params,
            move |row| {
                if let Some(Value::Integer(ms)) = row.first() {
                    *sink.lock() = Some(*ms);
                }
            },
        )]);
        if let Err(e) = result {
            // Typically an invalid user-supplied regex; the engine
            // itself is unaffected.
            tracing::warn!(error = %e, "phrase search failed");
            return Ok(None);
        }

        let ms = *found.lock();
        Ok(ms.and_then(DateTime::from_timestamp_millis))
    }

    /// Timestamp of the oldest stored message of `chat`, or `None`.
    pub fn get_start_date_chat_history(
        &self,
        chat: &ChatId,
    ) -> Result<Option<DateTime<Utc>>, QueryError> {
        let Some(chat_id) = self.chat_row_id(chat)? else {
            return Ok(None);
        };
        let found = Arc::new(Mutex::new(None::<i64>));
        let sink = Arc::clone(&found);
        self.db.exec_now(vec![Query::with_rows(
            "SELECT history.timestamp FROM history WHERE history.chat_id = ?1 \
             ORDER BY history.timestamp ASC LIMIT 1",
            vec![Value::Integer(chat_id)],
            move |row| {
                if let Some(Value::Integer(ms)) = row.first() {
                    *sink.lock() = Some(*ms);
                }
            },
        )])?;
        let ms = *found.lock();
        Ok(ms.and_then(DateTime::from_timestamp_millis))
    }

    /// Whether any message of `chat` is stored.
    pub fn is_history_existence(&self, chat: &ChatId) -> Result<bool, QueryError> {
        let Some(chat_id) = self.chat_row_id(chat)? else {
            return Ok(false);
        };
        let found = Arc::new(Mutex::new(false));
        let sink = Arc::clone(&found);
        self.db.exec_now(vec![Query::with_rows(
            "SELECT 1 FROM history WHERE history.chat_id = ?1 LIMIT 1",
            vec![Value::Integer(chat_id)],
            move |_row| {
                *sink.lock() = true;
            },
        )])?;
        let exists = *found.lock();
        Ok(exists)
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Forget a conversation: its messages, its `peers` row, its cache
    /// entry.  Messages elsewhere that merely name the identity as
    /// sender keep their captured display name over a nulled sender.
    /// Unknown identities are a no-op.
    pub fn remove_contact_history(&self, chat: &ChatId) -> Result<(), QueryError> {
        let Some(chat_id) = self.chat_row_id(chat)? else {
            return Ok(());
        };
        self.db.exec_now(vec![
            Query::with_params(
                "DELETE FROM history WHERE chat_id = ?1",
                vec![Value::Integer(chat_id)],
            ),
            Query::with_params(
                "DELETE FROM peers WHERE id = ?1",
                vec![Value::Integer(chat_id)],
            ),
        ])?;
        self.peers.lock().remove(chat);
        tracing::info!(chat = %chat, "removed chat history");
        Ok(())
    }

    /// Wipe every conversation and reclaim the file space.
    pub fn erase_history(&self) -> Result<(), QueryError> {
        self.db.exec_now(vec![
            Query::new("DELETE FROM history"),
            Query::new("DELETE FROM peers"),
        ])?;
        self.peers.lock().clear();
        // VACUUM cannot run inside a transaction, so it goes in its own
        // single-query batch.
        self.db.exec_later(vec![Query::new("VACUUM")])?;
        tracing::info!("erased all chat history");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Identity resolution
    // ------------------------------------------------------------------

    /// The `peers.id` of `chat`, from cache or a lookup.  `None` means
    /// the identity has no row, so no history either.
    fn chat_row_id(&self, chat: &ChatId) -> Result<Option<i64>, QueryError> {
        if let Some(&row_id) = self.peers.lock().get(chat) {
            return Ok(Some(row_id));
        }
        let Some(blob) = chat.as_bytes() else {
            return Ok(None);
        };
        let found = Arc::new(Mutex::new(None::<i64>));
        let sink = Arc::clone(&found);
        self.db.exec_now(vec![Query::with_rows(
            "SELECT id FROM peers WHERE identity = ?1",
            vec![Value::Blob(blob.to_vec())],
            move |row| {
                if let Some(Value::Integer(row_id)) = row.first() {
                    *sink.lock() = Some(*row_id);
                }
            },
        )])?;
        let row_id = *found.lock();
        if let Some(row_id) = row_id {
            self.peers.lock().insert(*chat, row_id);
        }
        Ok(row_id)
    }

    /// Run a message SELECT and materialize its rows.
    fn collect_messages(&self, sql: String, params: Vec<Value>) -> Result<Vec<Message>, QueryError> {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&messages);
        self.db.exec_now(vec![Query::with_rows(sql, params, move |row| {
            if let Some(message) = message_from_row(row) {
                sink.lock().push(message);
            }
        })])?;
        let collected = std::mem::take(&mut *messages.lock());
        Ok(collected)
    }
}

/// The identity blob stored in `peers`, or the error for empty
/// identities.
fn identity_blob(id: &ChatId) -> Result<Vec<u8>, QueryError> {
    id.as_bytes()
        .map(<[u8]>::to_vec)
        .ok_or(QueryError::EmptyIdentity)
}

/// Milliseconds of a day's midnight, UTC.
fn day_start_ms(day: NaiveDate) -> i64 {
    day.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Materialize one [`SELECT_MESSAGE`] row; rows that fail to convert
/// are skipped.
fn message_from_row(row: &[Value]) -> Option<Message> {
    let Some(Value::Integer(id)) = row.first() else {
        return None;
    };
    let Some(Value::Integer(timestamp)) = row.get(1) else {
        return None;
    };
    let chat = match row.get(2) {
        Some(Value::Blob(raw)) => ChatId::from_raw(raw),
        _ => return None,
    };
    let sender = match row.get(3) {
        Some(Value::Blob(raw)) => ChatId::from_raw(raw),
        // The sender's row was removed; only the display name remains.
        Some(Value::Null) => ChatId::default(),
        _ => return None,
    };
    let Some(Value::Text(display_name)) = row.get(4) else {
        return None;
    };
    let Some(Value::Text(content)) = row.get(5) else {
        return None;
    };
    let Some(Value::Integer(is_sent)) = row.get(6) else {
        return None;
    };
    let Some(Value::Integer(is_complete)) = row.get(7) else {
        return None;
    };

    Some(Message {
        id: *id,
        chat,
        sender,
        display_name: display_name.clone(),
        content: content.clone(),
        timestamp: DateTime::from_timestamp_millis(*timestamp)?,
        is_sent: *is_sent != 0,
        is_complete: *is_complete != 0,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use causerie_core::constants::{GROUP_ID_SIZE, PEER_PK_SIZE};
    use causerie_core::{GroupId, PeerPk};
    use chrono::Days;

    use super::*;

    fn open_history(dir: &tempfile::TempDir, name: &str) -> History {
        History::open(&dir.path().join(name), None).expect("open history")
    }

    fn peer(seed: u8) -> ChatId {
        ChatId::Peer(PeerPk::from_bytes(&[seed; PEER_PK_SIZE]))
    }

    fn group(seed: u8) -> ChatId {
        ChatId::Group(GroupId::from_bytes(&[seed; GROUP_ID_SIZE]))
    }

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn on_day(base: NaiveDate, days: u64, hour: u32) -> DateTime<Utc> {
        base.checked_add_days(Days::new(days))
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
            .and_utc()
    }

    /// Insert and wait until the row is committed, returning its id.
    fn add_sync(
        history: &History,
        chat: &ChatId,
        content: &str,
        sender: &ChatId,
        timestamp: DateTime<Utc>,
        is_sent: bool,
        display_name: &str,
    ) -> i64 {
        let (tx, rx) = mpsc::channel();
        history
            .add_new_message(
                chat,
                content,
                sender,
                timestamp,
                is_sent,
                display_name,
                Some(Box::new(move |id| {
                    let _ = tx.send(id);
                })),
            )
            .expect("submit message");
        rx.recv().expect("row id")
    }

    fn scalar(history: &History, sql: &str) -> i64 {
        let out = Arc::new(Mutex::new(0i64));
        let sink = Arc::clone(&out);
        history
            .db()
            .exec_now(vec![Query::with_rows(sql, Vec::new(), move |row| {
                if let Some(Value::Integer(v)) = row.first() {
                    *sink.lock() = *v;
                }
            })])
            .expect("scalar query");
        let v = *out.lock();
        v
    }

    #[test]
    fn add_and_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let history = open_history(&dir, "order.db");
        let friend = peer(1);
        let me = peer(2);

        add_sync(&history, &friend, "first", &friend, at(1_000), false, "Fern");
        add_sync(&history, &friend, "second", &me, at(2_000), true, "Me");
        add_sync(&history, &friend, "third", &friend, at(3_000), false, "Fern");

        let all = history
            .get_chat_history_from_date(&friend, at(1_000), at(3_000))
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].content, "first");
        assert_eq!(all[1].content, "second");
        assert_eq!(all[2].content, "third");
        assert_eq!(all[0].display_name, "Fern");
        assert_eq!(all[0].sender, friend);
        assert_eq!(all[1].sender, me);
        assert!(all[1].is_sent);
        assert!(!all[0].is_sent);
        // Direction drives the initial delivery flag.
        assert!(all[0].is_complete);
        assert!(!all[1].is_complete);

        let narrowed = history
            .get_chat_history_from_date(&friend, at(1_000), at(2_000))
            .unwrap();
        assert_eq!(narrowed.len(), 2);
        assert_eq!(narrowed.last().unwrap().content, "second");
    }

    #[test]
    fn one_peers_row_per_identity() {
        let dir = tempfile::tempdir().unwrap();
        let history = open_history(&dir, "peers.db");
        let friend = peer(3);

        for i in 0..99 {
            history
                .add_new_message(&friend, &format!("m{i}"), &friend, at(i), false, "F", None)
                .unwrap();
        }
        add_sync(&history, &friend, "m99", &friend, at(99), false, "F");

        assert_eq!(scalar(&history, "SELECT COUNT(*) FROM peers"), 1);
        assert_eq!(scalar(&history, "SELECT COUNT(*) FROM history"), 100);
    }

    #[test]
    fn default_num_returns_newest_window_ascending() {
        let dir = tempfile::tempdir().unwrap();
        let history = open_history(&dir, "window.db");
        let friend = peer(4);

        for i in 0..109 {
            history
                .add_new_message(
                    &friend,
                    &format!("msg {i}"),
                    &friend,
                    at(1_000 + i),
                    false,
                    "F",
                    None,
                )
                .unwrap();
        }
        add_sync(&history, &friend, "msg 109", &friend, at(1_000 + 109), false, "F");

        let window = history.get_chat_history_default_num(&friend).unwrap();
        assert_eq!(window.len(), NUM_MESSAGES_DEFAULT);
        assert_eq!(window.first().unwrap().content, "msg 10");
        assert_eq!(window.last().unwrap().content, "msg 109");
    }

    #[test]
    fn counts_are_bucketed_by_day_and_skip_empty_days() {
        let dir = tempfile::tempdir().unwrap();
        let history = open_history(&dir, "counts.db");
        let friend = peer(5);
        let base = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        add_sync(&history, &friend, "early", &friend, on_day(base, 0, 8), false, "F");
        add_sync(&history, &friend, "late", &friend, on_day(base, 0, 20), false, "F");
        add_sync(&history, &friend, "midweek", &friend, on_day(base, 2, 9), false, "F");
        add_sync(&history, &friend, "edge", &friend, on_day(base, 3, 23), false, "F");
        // Outside the queried range.
        add_sync(&history, &friend, "before", &friend, at(0), false, "F");
        add_sync(
            &history,
            &friend,
            "after",
            &friend,
            on_day(base, 4, 1),
            false,
            "F",
        );

        let to = base.checked_add_days(Days::new(3)).unwrap();
        let counts = history.get_chat_history_counts(&friend, base, to).unwrap();
        assert_eq!(
            counts,
            vec![
                DayCount { offset_days: 0, count: 2 },
                DayCount { offset_days: 2, count: 1 },
                DayCount { offset_days: 3, count: 1 },
            ]
        );
    }

    #[test]
    fn phrase_search_filters() {
        let dir = tempfile::tempdir().unwrap();
        let history = open_history(&dir, "search.db");
        let friend = peer(6);

        add_sync(&history, &friend, "Hello World", &friend, at(1_000), false, "F");
        add_sync(&history, &friend, "goodbye world", &friend, at(2_000), false, "F");
        add_sync(&history, &friend, "WORLD cup", &friend, at(3_000), false, "F");
        let cursor = at(10_000);

        let insensitive = SearchParams::default();
        assert_eq!(
            history
                .get_date_where_find_phrase(&friend, cursor, "world", &insensitive)
                .unwrap(),
            Some(at(3_000))
        );

        let sensitive = SearchParams {
            case_sensitive: true,
            ..Default::default()
        };
        assert_eq!(
            history
                .get_date_where_find_phrase(&friend, cursor, "world", &sensitive)
                .unwrap(),
            Some(at(2_000))
        );

        let words = SearchParams {
            whole_words: true,
            ..Default::default()
        };
        assert_eq!(
            history
                .get_date_where_find_phrase(&friend, cursor, "orl", &words)
                .unwrap(),
            None
        );
        assert_eq!(
            history
                .get_date_where_find_phrase(&friend, cursor, "world", &words)
                .unwrap(),
            Some(at(3_000))
        );

        let regex = SearchParams {
            use_regex: true,
            ..Default::default()
        };
        assert_eq!(
            history
                .get_date_where_find_phrase(&friend, cursor, "^Hello", &regex)
                .unwrap(),
            Some(at(1_000))
        );

        assert_eq!(
            history
                .get_date_where_find_phrase(&friend, cursor, "nothing here", &insensitive)
                .unwrap(),
            None
        );
        // An invalid user regex is "not found", not an engine failure.
        assert_eq!(
            history
                .get_date_where_find_phrase(&friend, cursor, "(", &regex)
                .unwrap(),
            None
        );
        assert!(history.is_history_existence(&friend).unwrap());
    }

    #[test]
    fn phrase_search_periods() {
        let dir = tempfile::tempdir().unwrap();
        let history = open_history(&dir, "periods.db");
        let friend = peer(7);
        let base = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();

        let first = on_day(base, 0, 12);
        let second = on_day(base, 2, 9);
        let third = on_day(base, 4, 15);
        add_sync(&history, &friend, "alpha target", &friend, first, false, "F");
        add_sync(&history, &friend, "beta target", &friend, second, false, "F");
        add_sync(&history, &friend, "gamma target", &friend, third, false, "F");
        let cursor = on_day(base, 5, 0);

        let with_period = |period| SearchParams {
            period,
            ..Default::default()
        };

        assert_eq!(
            history
                .get_date_where_find_phrase(&friend, cursor, "target", &with_period(SearchPeriod::Before))
                .unwrap(),
            Some(third)
        );
        assert_eq!(
            history
                .get_date_where_find_phrase(&friend, cursor, "target", &with_period(SearchPeriod::FromStart))
                .unwrap(),
            Some(first)
        );
        let day1 = base.checked_add_days(Days::new(1)).unwrap();
        assert_eq!(
            history
                .get_date_where_find_phrase(
                    &friend,
                    cursor,
                    "target",
                    &with_period(SearchPeriod::AfterDate(day1))
                )
                .unwrap(),
            Some(second)
        );
        let day2 = base.checked_add_days(Days::new(2)).unwrap();
        assert_eq!(
            history
                .get_date_where_find_phrase(
                    &friend,
                    cursor,
                    "target",
                    &with_period(SearchPeriod::AfterDate(day2))
                )
                .unwrap(),
            Some(second)
        );
        assert_eq!(
            history
                .get_date_where_find_phrase(
                    &friend,
                    cursor,
                    "target",
                    &with_period(SearchPeriod::BeforeDate(day2))
                )
                .unwrap(),
            Some(first)
        );
    }

    #[test]
    fn start_date_is_earliest_message() {
        let dir = tempfile::tempdir().unwrap();
        let history = open_history(&dir, "start.db");
        let friend = peer(8);

        assert_eq!(history.get_start_date_chat_history(&friend).unwrap(), None);
        add_sync(&history, &friend, "b", &friend, at(5_000), false, "F");
        add_sync(&history, &friend, "a", &friend, at(2_000), false, "F");
        assert_eq!(
            history.get_start_date_chat_history(&friend).unwrap(),
            Some(at(2_000))
        );
    }

    #[test]
    fn mark_as_sent_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let history = open_history(&dir, "sent.db");
        let friend = peer(9);

        let id = add_sync(&history, &friend, "outgoing", &peer(10), at(1_000), true, "Me");
        let pending = history.get_chat_history_default_num(&friend).unwrap();
        assert!(!pending[0].is_complete);

        history.mark_as_sent(id).unwrap();
        let delivered = history.get_chat_history_default_num(&friend).unwrap();
        assert!(delivered[0].is_complete);

        history.mark_as_sent(id).unwrap();
        let again = history.get_chat_history_default_num(&friend).unwrap();
        assert_eq!(again.len(), 1);
        assert!(again[0].is_complete);
    }

    #[test]
    fn remove_contact_history_forgets_and_reassigns() {
        let dir = tempfile::tempdir().unwrap();
        let history = open_history(&dir, "remove.db");
        let friend = peer(11);

        add_sync(&history, &friend, "hi", &friend, at(1_000), false, "F");
        assert!(history.is_history_existence(&friend).unwrap());
        let old_max = scalar(&history, "SELECT MAX(id) FROM peers");

        history.remove_contact_history(&friend).unwrap();
        assert!(!history.is_history_existence(&friend).unwrap());
        assert_eq!(scalar(&history, "SELECT COUNT(*) FROM history"), 0);
        assert_eq!(scalar(&history, "SELECT COUNT(*) FROM peers"), 0);

        // Unknown identities are a no-op.
        history.remove_contact_history(&peer(12)).unwrap();

        // The same identity now gets a fresh surrogate id.
        add_sync(&history, &friend, "again", &friend, at(2_000), false, "F");
        let new_max = scalar(&history, "SELECT MAX(id) FROM peers");
        assert!(new_max > old_max);
    }

    #[test]
    fn removing_a_sender_keeps_their_group_messages() {
        let dir = tempfile::tempdir().unwrap();
        let history = open_history(&dir, "sender.db");
        let alice = peer(13);
        let room = group(14);

        add_sync(&history, &alice, "direct", &alice, at(1_000), false, "Alice");
        add_sync(&history, &room, "from alice", &alice, at(2_000), false, "Alice");

        history.remove_contact_history(&alice).unwrap();

        assert!(!history.is_history_existence(&alice).unwrap());
        let room_log = history.get_chat_history_default_num(&room).unwrap();
        assert_eq!(room_log.len(), 1);
        assert!(room_log[0].sender.is_empty());
        assert_eq!(room_log[0].display_name, "Alice");
    }

    #[test]
    fn erase_history_wipes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let history = open_history(&dir, "erase.db");
        let friend = peer(15);
        let room = group(16);

        add_sync(&history, &friend, "one", &friend, at(1_000), false, "F");
        add_sync(&history, &room, "two", &friend, at(2_000), false, "F");

        history.erase_history().unwrap();

        assert_eq!(scalar(&history, "SELECT COUNT(*) FROM history"), 0);
        assert_eq!(scalar(&history, "SELECT COUNT(*) FROM peers"), 0);
        assert!(!history.is_history_existence(&friend).unwrap());
        assert!(!history.is_history_existence(&room).unwrap());

        // Still usable afterwards.
        add_sync(&history, &friend, "fresh", &friend, at(3_000), false, "F");
        assert!(history.is_history_existence(&friend).unwrap());
    }

    #[test]
    fn group_chats_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let history = open_history(&dir, "group.db");
        let room = group(17);
        let alice = peer(18);

        add_sync(&history, &room, "hello room", &alice, at(1_000), false, "Alice");

        let log = history.get_chat_history_default_num(&room).unwrap();
        assert_eq!(log.len(), 1);
        assert!(matches!(log[0].chat, ChatId::Group(_)));
        assert_eq!(log[0].chat, room);
        assert_eq!(log[0].sender, alice);
    }

    #[test]
    fn display_names_are_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let history = open_history(&dir, "names.db");
        let friend = peer(19);

        add_sync(&history, &friend, "one", &friend, at(1_000), false, "Old Name");
        add_sync(&history, &friend, "two", &friend, at(2_000), false, "New Name");

        let log = history.get_chat_history_default_num(&friend).unwrap();
        assert_eq!(log[0].display_name, "Old Name");
        assert_eq!(log[1].display_name, "New Name");
    }

    #[test]
    fn empty_identities_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let history = open_history(&dir, "empty.db");
        let nobody = ChatId::default();

        let err = history
            .add_new_message(&nobody, "hi", &peer(20), at(1_000), false, "X", None)
            .err()
            .expect("empty chat must fail");
        assert!(matches!(err, QueryError::EmptyIdentity));
        let err = history
            .add_new_message(&peer(20), "hi", &nobody, at(1_000), false, "X", None)
            .err()
            .expect("empty sender must fail");
        assert!(matches!(err, QueryError::EmptyIdentity));

        assert!(!history.is_history_existence(&nobody).unwrap());
        assert!(history
            .get_chat_history_default_num(&nobody)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn concurrent_adds_share_one_surrogate_row() {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(open_history(&dir, "concurrent.db"));
        let friend = peer(21);

        let mut handles = Vec::new();
        for t in 0..2 {
            let history = Arc::clone(&history);
            handles.push(std::thread::spawn(move || {
                for i in 0..25 {
                    add_sync(
                        &history,
                        &friend,
                        &format!("t{t} m{i}"),
                        &friend,
                        at((t * 1_000 + i) as i64),
                        false,
                        "F",
                    );
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(scalar(&history, "SELECT COUNT(*) FROM peers"), 1);
        assert_eq!(scalar(&history, "SELECT COUNT(*) FROM history"), 50);
    }
}

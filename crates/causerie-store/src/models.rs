//! Value types surfaced by the history store.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to a UI layer over IPC.

use causerie_core::ChatId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single stored chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// History row id; the handle [`crate::History::mark_as_sent`] takes.
    pub id: i64,
    /// The conversation this message belongs to.
    pub chat: ChatId,
    /// Who sent it.  Empty when the sender's identity row has since been
    /// removed; `display_name` still witnesses who it was.
    pub sender: ChatId,
    /// The sender's name as it was when the message was stored; never
    /// re-derived afterwards.
    pub display_name: String,
    /// Message body.
    pub content: String,
    /// When the message was sent.
    pub timestamp: DateTime<Utc>,
    /// Direction: true for messages we sent.
    pub is_sent: bool,
    /// Delivery: false for a sent message still awaiting its receipt.
    pub is_complete: bool,
}

// ---------------------------------------------------------------------------
// Day counts
// ---------------------------------------------------------------------------

/// Number of messages on one calendar day, for history overviews.
///
/// Days with no messages are not reported.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayCount {
    /// Whole days between the start of the queried range and this day.
    pub offset_days: u32,
    /// Messages on this day.
    pub count: u32,
}

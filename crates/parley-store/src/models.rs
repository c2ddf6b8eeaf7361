//! Domain model structs persisted in the relay database.

use chrono::{DateTime, Utc};
use parley_shared::types::UserId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered identity. Registration itself happens elsewhere; the
/// relay only reads this table to confirm a credential maps to a real
/// user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Ed25519 public key (32 bytes), stored as hex.
    pub id: UserId,
    /// Optional human-readable display name.
    pub display_name: Option<String>,
    /// When this user was registered.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A named set of participants sharing a message history (DM or group).
/// Participants are only ever added, never removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    /// Unique conversation identifier.
    pub id: Uuid,
    /// When the conversation was created.
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message. The body is immutable once persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Unique message identifier.
    pub id: Uuid,
    /// The conversation this message belongs to.
    pub conversation_id: Uuid,
    /// Sender identity; always a participant of the conversation.
    pub sender_id: UserId,
    /// Message body.
    pub body: String,
    /// Per-conversation monotonic sequence number, assigned at append
    /// time under the writer lock.
    pub seq: i64,
    /// When the message was persisted.
    pub sent_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Receipt
// ---------------------------------------------------------------------------

/// Delivery state for one (message, user) pair. A row exists once the
/// message reached one of the user's sessions; `read_at` is set when the
/// user acknowledged reading it. Both are append-only, so the read set
/// is structurally a subset of the delivered set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    pub message_id: Uuid,
    pub user_id: UserId,
    pub delivered_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

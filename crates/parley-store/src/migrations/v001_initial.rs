//! v001 -- Initial schema creation.
//!
//! Creates the five core tables: `users`, `conversations`,
//! `conversation_members`, `messages`, and `message_receipts`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY NOT NULL,   -- hex-encoded 32-byte Ed25519 pubkey
    display_name TEXT,
    created_at   TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    created_at TEXT NOT NULL,
    next_seq   INTEGER NOT NULL DEFAULT 1     -- per-conversation sequence counter
);

CREATE TABLE IF NOT EXISTS conversation_members (
    conversation_id TEXT NOT NULL,            -- FK -> conversations(id)
    user_id         TEXT NOT NULL,            -- hex-encoded pubkey
    joined_at       TEXT NOT NULL,

    PRIMARY KEY (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_members_user ON conversation_members(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    conversation_id TEXT NOT NULL,              -- FK -> conversations(id)
    sender_id       TEXT NOT NULL,              -- hex-encoded pubkey
    body            TEXT NOT NULL,
    seq             INTEGER NOT NULL,           -- assigned from conversations.next_seq
    sent_at         TEXT NOT NULL,              -- ISO-8601

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
    UNIQUE (conversation_id, seq)
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_seq
    ON messages(conversation_id, seq DESC);

-- ----------------------------------------------------------------
-- Delivery receipts
-- ----------------------------------------------------------------
-- A row exists iff the message was delivered to the user; read_at is
-- non-null iff the user also read it. Rows are never deleted.
CREATE TABLE IF NOT EXISTS message_receipts (
    message_id   TEXT NOT NULL,               -- FK -> messages(id)
    user_id      TEXT NOT NULL,               -- hex-encoded pubkey
    delivered_at TEXT NOT NULL,
    read_at      TEXT,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

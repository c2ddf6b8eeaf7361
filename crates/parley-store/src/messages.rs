//! Message persistence.
//!
//! Appends are atomic: membership validation, sequence assignment, and
//! the insert happen in one transaction, so a failed write leaves no
//! trace and a successful one has a gap-free per-conversation `seq`.

use chrono::{DateTime, Utc};
use parley_shared::types::UserId;
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Message;

impl Database {
    /// Append a message to a conversation.
    ///
    /// Fails with [`StoreError::NotFound`] for an unknown conversation
    /// and [`StoreError::NotAMember`] when the sender is not a
    /// participant.  On success the returned message carries the
    /// assigned sequence number.
    pub fn append_message(
        &mut self,
        conversation_id: Uuid,
        sender_id: &UserId,
        body: &str,
    ) -> Result<Message> {
        let tx = self.conn_mut().transaction()?;

        let seq: i64 = tx
            .query_row(
                "SELECT next_seq FROM conversations WHERE id = ?1",
                params![conversation_id.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        let is_member: i64 = tx.query_row(
            "SELECT COUNT(*) FROM conversation_members
             WHERE conversation_id = ?1 AND user_id = ?2",
            params![conversation_id.to_string(), sender_id.to_hex()],
            |row| row.get(0),
        )?;
        if is_member == 0 {
            return Err(StoreError::NotAMember);
        }

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id: *sender_id,
            body: body.to_string(),
            seq,
            sent_at: Utc::now(),
        };

        tx.execute(
            "INSERT INTO messages (id, conversation_id, sender_id, body, seq, sent_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id.to_string(),
                message.conversation_id.to_string(),
                message.sender_id.to_hex(),
                message.body,
                message.seq,
                message.sent_at.to_rfc3339(),
            ],
        )?;

        tx.execute(
            "UPDATE conversations SET next_seq = ?1 WHERE id = ?2",
            params![seq + 1, conversation_id.to_string()],
        )?;

        tx.commit()?;
        Ok(message)
    }

    /// Fetch a single message by UUID.
    pub fn get_message(&self, id: Uuid) -> Result<Message> {
        self.conn()
            .query_row(
                "SELECT id, conversation_id, sender_id, body, seq, sent_at
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// The most recent messages of a conversation, newest first.
    ///
    /// This is the read path for the companion history API and for
    /// offline members catching up.
    pub fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, conversation_id, sender_id, body, seq, sent_at
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY seq DESC
             LIMIT ?2 OFFSET ?3",
        )?;

        let rows = stmt.query_map(
            params![conversation_id.to_string(), limit, offset],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let conversation_str: String = row.get(1)?;
    let sender_hex: String = row.get(2)?;
    let body: String = row.get(3)?;
    let seq: i64 = row.get(4)?;
    let sent_str: String = row.get(5)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let conversation_id = Uuid::parse_str(&conversation_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let sender_id = UserId::from_hex(&sender_hex).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let sent_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&sent_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id,
        conversation_id,
        sender_id,
        body,
        seq,
        sent_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Conversation;

    fn seeded_db() -> (tempfile::TempDir, Database, Conversation, UserId, UserId) {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::open_at(&dir.path().join("test.db")).unwrap();

        let a = UserId([1; 32]);
        let b = UserId([2; 32]);
        let conversation = Conversation::new();
        db.create_conversation(&conversation, &[a, b]).unwrap();

        (dir, db, conversation, a, b)
    }

    #[test]
    fn append_round_trips_and_assigns_monotonic_seq() {
        let (_dir, mut db, conversation, a, b) = seeded_db();

        let first = db.append_message(conversation.id, &a, "hi").unwrap();
        let second = db.append_message(conversation.id, &b, "hello").unwrap();

        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);

        let fetched = db.get_message(first.id).unwrap();
        assert_eq!(fetched.body, "hi");
        assert_eq!(fetched.sender_id, a);
        assert_eq!(fetched.conversation_id, conversation.id);
    }

    #[test]
    fn non_member_sender_is_rejected() {
        let (_dir, mut db, conversation, _a, _b) = seeded_db();

        let outsider = UserId([9; 32]);
        assert!(matches!(
            db.append_message(conversation.id, &outsider, "sneaky"),
            Err(StoreError::NotAMember)
        ));

        // nothing was persisted
        assert!(db.recent_messages(conversation.id, 10, 0).unwrap().is_empty());
    }

    #[test]
    fn unknown_conversation_is_rejected() {
        let (_dir, mut db, _conversation, a, _b) = seeded_db();
        assert!(matches!(
            db.append_message(Uuid::new_v4(), &a, "hi"),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn recent_messages_newest_first() {
        let (_dir, mut db, conversation, a, _b) = seeded_db();

        for i in 0..5 {
            db.append_message(conversation.id, &a, &format!("m{i}"))
                .unwrap();
        }

        let page = db.recent_messages(conversation.id, 2, 0).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].body, "m4");
        assert_eq!(page[1].body, "m3");
    }
}

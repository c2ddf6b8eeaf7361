//! Delivery and read receipts.
//!
//! Both sets are append-only. A read implies delivery, so `mark_read`
//! on an undelivered message records both in one step; this keeps the
//! read set a subset of the delivered set no matter how acks arrive.

use chrono::{DateTime, Utc};
use parley_shared::types::UserId;
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Receipt;

impl Database {
    /// Record that a message reached one of the user's sessions.
    ///
    /// Returns `true` if the receipt is new, `false` if the user was
    /// already in the delivered set.  Fails with
    /// [`StoreError::NotFound`] for an unknown message and
    /// [`StoreError::NotAMember`] when the user does not belong to the
    /// message's conversation.
    pub fn mark_delivered(&mut self, message_id: Uuid, user_id: &UserId) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;

        check_receipt_target(&tx, message_id, user_id)?;

        let affected = tx.execute(
            "INSERT INTO message_receipts (message_id, user_id, delivered_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(message_id, user_id) DO NOTHING",
            params![
                message_id.to_string(),
                user_id.to_hex(),
                Utc::now().to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        Ok(affected > 0)
    }

    /// Record that the user read a message.
    ///
    /// Returns `true` if the read is new.  Delivery is recorded
    /// implicitly when missing; an existing `read_at` is never
    /// overwritten.
    pub fn mark_read(&mut self, message_id: Uuid, user_id: &UserId) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;

        check_receipt_target(&tx, message_id, user_id)?;

        let already_read: i64 = tx.query_row(
            "SELECT COUNT(*) FROM message_receipts
             WHERE message_id = ?1 AND user_id = ?2 AND read_at IS NOT NULL",
            params![message_id.to_string(), user_id.to_hex()],
            |row| row.get(0),
        )?;

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO message_receipts (message_id, user_id, delivered_at, read_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(message_id, user_id)
                 DO UPDATE SET read_at = COALESCE(message_receipts.read_at, excluded.read_at)",
            params![message_id.to_string(), user_id.to_hex(), now],
        )?;

        tx.commit()?;
        Ok(already_read == 0)
    }

    /// All receipts recorded for a message.
    pub fn receipts_for(&self, message_id: Uuid) -> Result<Vec<Receipt>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id, user_id, delivered_at, read_at
             FROM message_receipts
             WHERE message_id = ?1",
        )?;

        let rows = stmt.query_map(params![message_id.to_string()], row_to_receipt)?;

        let mut receipts = Vec::new();
        for row in rows {
            receipts.push(row?);
        }
        Ok(receipts)
    }
}

/// Shared validation for both ack paths: the message must exist and the
/// acking user must be a participant of its conversation.
fn check_receipt_target(
    tx: &rusqlite::Transaction<'_>,
    message_id: Uuid,
    user_id: &UserId,
) -> Result<()> {
    let conversation_id: String = tx
        .query_row(
            "SELECT conversation_id FROM messages WHERE id = ?1",
            params![message_id.to_string()],
            |row| row.get(0),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            other => StoreError::Sqlite(other),
        })?;

    let is_member: i64 = tx.query_row(
        "SELECT COUNT(*) FROM conversation_members
         WHERE conversation_id = ?1 AND user_id = ?2",
        params![conversation_id, user_id.to_hex()],
        |row| row.get(0),
    )?;
    if is_member == 0 {
        return Err(StoreError::NotAMember);
    }

    Ok(())
}

fn row_to_receipt(row: &rusqlite::Row<'_>) -> rusqlite::Result<Receipt> {
    let message_str: String = row.get(0)?;
    let user_hex: String = row.get(1)?;
    let delivered_str: String = row.get(2)?;
    let read_str: Option<String> = row.get(3)?;

    let message_id = Uuid::parse_str(&message_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let user_id = UserId::from_hex(&user_hex).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let delivered_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&delivered_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let read_at = read_str
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        3,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })
        })
        .transpose()?;

    Ok(Receipt {
        message_id,
        user_id,
        delivered_at,
        read_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Conversation;

    fn seeded_message() -> (tempfile::TempDir, Database, Uuid, UserId, UserId) {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::open_at(&dir.path().join("test.db")).unwrap();

        let a = UserId([1; 32]);
        let b = UserId([2; 32]);
        let conversation = Conversation::new();
        db.create_conversation(&conversation, &[a, b]).unwrap();
        let message = db.append_message(conversation.id, &a, "hi").unwrap();

        (dir, db, message.id, a, b)
    }

    #[test]
    fn delivered_then_read_grows_monotonically() {
        let (_dir, mut db, message_id, _a, b) = seeded_message();

        assert!(db.mark_delivered(message_id, &b).unwrap());
        assert!(!db.mark_delivered(message_id, &b).unwrap());

        assert!(db.mark_read(message_id, &b).unwrap());
        assert!(!db.mark_read(message_id, &b).unwrap());

        let receipts = db.receipts_for(message_id).unwrap();
        assert_eq!(receipts.len(), 1);
        assert!(receipts[0].read_at.is_some());
    }

    #[test]
    fn read_implies_delivered() {
        let (_dir, mut db, message_id, _a, b) = seeded_message();

        // ack read without an explicit delivered first
        assert!(db.mark_read(message_id, &b).unwrap());

        let receipts = db.receipts_for(message_id).unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].user_id, b);
        // the delivered set still contains the reader
        assert!(receipts[0].read_at.is_some());
    }

    #[test]
    fn outsider_ack_is_rejected() {
        let (_dir, mut db, message_id, _a, _b) = seeded_message();

        let outsider = UserId([9; 32]);
        assert!(matches!(
            db.mark_delivered(message_id, &outsider),
            Err(StoreError::NotAMember)
        ));
        assert!(db.receipts_for(message_id).unwrap().is_empty());
    }

    #[test]
    fn unknown_message_ack_is_rejected() {
        let (_dir, mut db, _message_id, _a, b) = seeded_message();
        assert!(matches!(
            db.mark_delivered(Uuid::new_v4(), &b),
            Err(StoreError::NotFound)
        ));
    }
}

//! Conversations and their membership.
//!
//! Membership only ever grows: participants can be added to a group
//! conversation but never removed, and conversations are never deleted
//! here.

use chrono::{DateTime, Utc};
use parley_shared::types::UserId;
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Conversation;

impl Database {
    /// Insert a new conversation together with its initial participant
    /// set, atomically.
    pub fn create_conversation(
        &mut self,
        conversation: &Conversation,
        participants: &[UserId],
    ) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "INSERT INTO conversations (id, created_at) VALUES (?1, ?2)",
            params![
                conversation.id.to_string(),
                conversation.created_at.to_rfc3339(),
            ],
        )?;

        let joined_at = conversation.created_at.to_rfc3339();
        for participant in participants {
            tx.execute(
                "INSERT OR IGNORE INTO conversation_members
                     (conversation_id, user_id, joined_at)
                 VALUES (?1, ?2, ?3)",
                params![conversation.id.to_string(), participant.to_hex(), joined_at],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Fetch a single conversation by UUID.
    pub fn get_conversation(&self, id: Uuid) -> Result<Conversation> {
        self.conn()
            .query_row(
                "SELECT id, created_at FROM conversations WHERE id = ?1",
                params![id.to_string()],
                row_to_conversation,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Add a participant to an existing conversation.  Returns `true`
    /// if the user was newly added, `false` if already a member.
    pub fn add_member(&self, conversation_id: Uuid, user_id: &UserId) -> Result<bool> {
        // ensure the conversation exists so a typo'd id is an error,
        // not a silent no-op
        self.get_conversation(conversation_id)?;

        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO conversation_members
                 (conversation_id, user_id, joined_at)
             VALUES (?1, ?2, ?3)",
            params![
                conversation_id.to_string(),
                user_id.to_hex(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    /// The participant set of a conversation.
    ///
    /// Fails with [`StoreError::NotFound`] for an unknown conversation
    /// rather than returning an empty set.
    pub fn members_of(&self, conversation_id: Uuid) -> Result<Vec<UserId>> {
        self.get_conversation(conversation_id)?;

        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM conversation_members
             WHERE conversation_id = ?1",
        )?;

        let rows = stmt.query_map(params![conversation_id.to_string()], |row| {
            let user_hex: String = row.get(0)?;
            UserId::from_hex(&user_hex).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    /// All conversations a user participates in.
    pub fn conversations_for(&self, user_id: &UserId) -> Result<Vec<Uuid>> {
        let mut stmt = self.conn().prepare(
            "SELECT conversation_id FROM conversation_members
             WHERE user_id = ?1",
        )?;

        let rows = stmt.query_map(params![user_id.to_hex()], |row| {
            let id_str: String = row.get(0)?;
            Uuid::parse_str(&id_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }

    /// Whether a user belongs to a conversation.
    pub fn is_member(&self, conversation_id: Uuid, user_id: &UserId) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM conversation_members
             WHERE conversation_id = ?1 AND user_id = ?2",
            params![conversation_id.to_string(), user_id.to_hex()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id_str: String = row.get(0)?;
    let created_str: String = row.get(1)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Conversation { id, created_at })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn create_and_resolve_membership() {
        let (_dir, mut db) = open_test_db();
        let a = UserId([1; 32]);
        let b = UserId([2; 32]);

        let conversation = Conversation::new();
        db.create_conversation(&conversation, &[a, b]).unwrap();

        let members = db.members_of(conversation.id).unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.contains(&a));
        assert!(members.contains(&b));

        assert_eq!(db.conversations_for(&a).unwrap(), vec![conversation.id]);
        assert!(db.is_member(conversation.id, &a).unwrap());
        assert!(!db.is_member(conversation.id, &UserId([3; 32])).unwrap());
    }

    #[test]
    fn unknown_conversation_is_not_found() {
        let (_dir, db) = open_test_db();
        assert!(matches!(
            db.members_of(Uuid::new_v4()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn add_member_is_idempotent() {
        let (_dir, mut db) = open_test_db();
        let a = UserId([1; 32]);
        let b = UserId([2; 32]);
        let c = UserId([3; 32]);

        let conversation = Conversation::new();
        db.create_conversation(&conversation, &[a, b]).unwrap();

        assert!(db.add_member(conversation.id, &c).unwrap());
        assert!(!db.add_member(conversation.id, &c).unwrap());
        assert_eq!(db.members_of(conversation.id).unwrap().len(), 3);
    }
}

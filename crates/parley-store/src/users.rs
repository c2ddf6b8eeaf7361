//! Read/write helpers for [`User`] records.
//!
//! Registration is an external concern; the relay mostly reads this
//! table to confirm that a handshake credential maps to a real
//! identity.

use chrono::{DateTime, Utc};
use parley_shared::types::UserId;
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;

impl Database {
    /// Insert a user, updating the display name if the id already
    /// exists.
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, display_name, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name",
            params![
                user.id.to_hex(),
                user.display_name,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single user.
    pub fn get_user(&self, id: &UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, display_name, created_at FROM users WHERE id = ?1",
                params![id.to_hex()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Whether an identity is registered.
    pub fn user_exists(&self, id: &UserId) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM users WHERE id = ?1",
            params![id.to_hex()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_hex: String = row.get(0)?;
    let display_name: Option<String> = row.get(1)?;
    let created_str: String = row.get(2)?;

    let id = UserId::from_hex(&id_hex).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(User {
        id,
        display_name,
        created_at,
    })
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
    fn upsert_and_get() {
        let (_dir, db) = open_test_db();
        let user = User {
            id: UserId([1; 32]),
            display_name: Some("Ada".to_string()),
            created_at: Utc::now(),
        };

        db.upsert_user(&user).unwrap();
        let fetched = db.get_user(&user.id).unwrap();
        assert_eq!(fetched.display_name.as_deref(), Some("Ada"));

        // upsert again with a new name, same id
        let renamed = User {
            display_name: Some("Ada L.".to_string()),
            ..user.clone()
        };
        db.upsert_user(&renamed).unwrap();
        assert_eq!(
            db.get_user(&user.id).unwrap().display_name.as_deref(),
            Some("Ada L.")
        );
    }

    #[test]
    fn unknown_user_is_not_found() {
        let (_dir, db) = open_test_db();
        assert!(!db.user_exists(&UserId([9; 32])).unwrap());
        assert!(matches!(
            db.get_user(&UserId([9; 32])),
            Err(StoreError::NotFound)
        ));
    }
}

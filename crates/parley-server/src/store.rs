//! Async handle to the durable store.
//!
//! One SQLite connection behind a `tokio::sync::Mutex`: socket handlers
//! suspend while waiting for the store instead of blocking each other,
//! and every write is serialized, which subsumes the per-conversation
//! ordering that sequence assignment needs.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use parley_shared::types::UserId;
use parley_store::{Conversation, Database, Message, Receipt, StoreError, User};

#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Database>>,
}

impl Store {
    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::from_database(Database::open_at(path)?))
    }

    pub fn open_default() -> Result<Self, StoreError> {
        Ok(Self::from_database(Database::open_default()?))
    }

    pub fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        self.db.lock().await.upsert_user(user)
    }

    pub async fn user_exists(&self, id: &UserId) -> Result<bool, StoreError> {
        self.db.lock().await.user_exists(id)
    }

    pub async fn create_conversation(
        &self,
        conversation: &Conversation,
        participants: &[UserId],
    ) -> Result<(), StoreError> {
        self.db
            .lock()
            .await
            .create_conversation(conversation, participants)
    }

    pub async fn add_member(
        &self,
        conversation_id: Uuid,
        user_id: &UserId,
    ) -> Result<bool, StoreError> {
        self.db.lock().await.add_member(conversation_id, user_id)
    }

    pub async fn members_of(&self, conversation_id: Uuid) -> Result<Vec<UserId>, StoreError> {
        self.db.lock().await.members_of(conversation_id)
    }

    pub async fn conversations_for(&self, user_id: &UserId) -> Result<Vec<Uuid>, StoreError> {
        self.db.lock().await.conversations_for(user_id)
    }

    pub async fn append_message(
        &self,
        conversation_id: Uuid,
        sender_id: &UserId,
        body: &str,
    ) -> Result<Message, StoreError> {
        self.db
            .lock()
            .await
            .append_message(conversation_id, sender_id, body)
    }

    pub async fn get_message(&self, id: Uuid) -> Result<Message, StoreError> {
        self.db.lock().await.get_message(id)
    }

    pub async fn mark_delivered(
        &self,
        message_id: Uuid,
        user_id: &UserId,
    ) -> Result<bool, StoreError> {
        self.db.lock().await.mark_delivered(message_id, user_id)
    }

    pub async fn mark_read(&self, message_id: Uuid, user_id: &UserId) -> Result<bool, StoreError> {
        self.db.lock().await.mark_read(message_id, user_id)
    }

    #[allow(dead_code)]
    pub async fn receipts_for(&self, message_id: Uuid) -> Result<Vec<Receipt>, StoreError> {
        self.db.lock().await.receipts_for(message_id)
    }
}

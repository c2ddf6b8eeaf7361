//! Conversation membership resolution.
//!
//! A thin read path over the store that supplies fan-out target sets.
//! Lookups may be served from a short TTL cache; the cache is an
//! optimization only -- every result is correct with caching disabled.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use parley_shared::error::RelayError;
use parley_shared::types::UserId;
use parley_store::StoreError;

use crate::store::Store;

struct CachedMembers {
    members: HashSet<UserId>,
    cached_at: Instant,
}

#[derive(Clone)]
pub struct MembershipResolver {
    store: Store,
    ttl: Duration,
    cache: Arc<RwLock<HashMap<Uuid, CachedMembers>>>,
}

impl MembershipResolver {
    /// A zero TTL disables caching entirely.
    pub fn new(store: Store, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The participant set of a conversation.
    pub async fn members_of(&self, conversation_id: Uuid) -> Result<HashSet<UserId>, RelayError> {
        if !self.ttl.is_zero() {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&conversation_id) {
                if entry.cached_at.elapsed() < self.ttl {
                    return Ok(entry.members.clone());
                }
            }
        }

        let members: HashSet<UserId> = self
            .store
            .members_of(conversation_id)
            .await
            .map_err(map_lookup_err)?
            .into_iter()
            .collect();

        if !self.ttl.is_zero() {
            let mut cache = self.cache.write().await;
            cache.insert(
                conversation_id,
                CachedMembers {
                    members: members.clone(),
                    cached_at: Instant::now(),
                },
            );
        }

        Ok(members)
    }

    /// All conversations a user participates in. Uncached: it is only
    /// consulted on presence transitions, not per message.
    pub async fn conversations_for(&self, user_id: &UserId) -> Result<Vec<Uuid>, RelayError> {
        self.store
            .conversations_for(user_id)
            .await
            .map_err(|e| RelayError::Persistence(e.to_string()))
    }

    /// Drop a cached entry after a membership-changing write.
    pub async fn invalidate(&self, conversation_id: Uuid) {
        self.cache.write().await.remove(&conversation_id);
    }

    /// Evict entries past their TTL, for the periodic maintenance task.
    pub async fn purge_expired(&self) {
        if self.ttl.is_zero() {
            return;
        }
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.cached_at.elapsed() < self.ttl);
        let removed = before - cache.len();
        if removed > 0 {
            debug!(removed, "Purged expired membership cache entries");
        }
    }
}

fn map_lookup_err(err: StoreError) -> RelayError {
    match err {
        StoreError::NotFound => RelayError::ConversationNotFound,
        other => RelayError::Persistence(other.to_string()),
    }
}

//! Presence broadcasting.
//!
//! Driven by session-registry transitions: the first session a user
//! opens announces them online to everyone they share a conversation
//! with; losing the last one announces offline, after a grace delay
//! that absorbs transient reconnects. A reconnect inside the window
//! cancels the pending offline announcement and skips the redundant
//! online one, so peers never see a flap.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use parley_shared::protocol::ServerEvent;
use parley_shared::types::UserId;

use crate::membership::MembershipResolver;
use crate::sessions::SessionRegistry;

#[derive(Default, Clone, Copy)]
struct PresenceState {
    /// Bumped on every transition; a scheduled offline announcement
    /// only fires if no newer transition has happened.
    epoch: u64,
    /// What conversation peers currently believe.
    announced_online: bool,
}

#[derive(Clone)]
pub struct PresenceBroadcaster {
    registry: SessionRegistry,
    membership: MembershipResolver,
    grace: Duration,
    states: Arc<RwLock<HashMap<UserId, PresenceState>>>,
}

impl PresenceBroadcaster {
    pub fn new(registry: SessionRegistry, membership: MembershipResolver, grace: Duration) -> Self {
        Self {
            registry,
            membership,
            grace,
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Called on a user's 0 -> 1 session transition.
    pub async fn user_online(&self, user_id: UserId) {
        let announce = {
            let mut states = self.states.write().await;
            let state = states.entry(user_id).or_default();
            state.epoch += 1;
            // a reconnect within the grace window: peers never learned
            // the user left, so there is nothing to announce
            let announce = !state.announced_online;
            state.announced_online = true;
            announce
        };

        if announce {
            self.broadcast(user_id, true).await;
        }
    }

    /// Called on a user's 1 -> 0 session transition. The offline
    /// announcement is deferred by the grace window and suppressed if
    /// the user reconnects in the meantime.
    pub async fn user_offline(&self, user_id: UserId) {
        let epoch = {
            let mut states = self.states.write().await;
            let state = states.entry(user_id).or_default();
            state.epoch += 1;
            state.epoch
        };

        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.grace).await;

            if this.registry.is_online(&user_id).await {
                return;
            }

            {
                let mut states = this.states.write().await;
                let Some(state) = states.get_mut(&user_id) else {
                    return;
                };
                if state.epoch != epoch {
                    return;
                }
                state.announced_online = false;
            }

            this.broadcast(user_id, false).await;
        });
    }

    /// Push the status change to every member of every conversation the
    /// user participates in, excluding the user themselves. Best
    /// effort: a failed membership lookup skips that conversation.
    async fn broadcast(&self, user_id: UserId, online: bool) {
        let conversations = match self.membership.conversations_for(&user_id).await {
            Ok(conversations) => conversations,
            Err(e) => {
                warn!(user = %user_id.short(), error = %e, "presence lookup failed");
                return;
            }
        };

        let mut peers: HashSet<UserId> = HashSet::new();
        for conversation_id in conversations {
            match self.membership.members_of(conversation_id).await {
                Ok(members) => peers.extend(members),
                Err(e) => {
                    warn!(
                        conversation = %conversation_id,
                        error = %e,
                        "presence fan-out skipped a conversation"
                    );
                }
            }
        }
        peers.remove(&user_id);

        let event = ServerEvent::PresenceUpdate { user_id, online };
        let mut pushed = 0;
        for peer in &peers {
            pushed += self.registry.send_to_user(peer, &event).await;
        }

        debug!(
            user = %user_id.short(),
            online,
            peers = peers.len(),
            sessions = pushed,
            "presence broadcast"
        );
    }
}

//! The session registry: which identities currently hold live
//! connections, and how to reach them.
//!
//! A user may own any number of sessions at once (one per device or
//! tab); they are independent. The registry is process-local -- a
//! clustered deployment would synchronize registries through an
//! external pub/sub layer behind this same interface.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use parley_shared::protocol::ServerEvent;
use parley_shared::types::{ConnectionId, UserId};

/// One live transport connection tied to an authenticated identity.
struct Session {
    user_id: UserId,
    outbound: mpsc::UnboundedSender<ServerEvent>,
    #[allow(dead_code)]
    connected_at: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<ConnectionId, Session>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
}

#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
        }
    }

    /// Admit an authenticated connection.
    ///
    /// Returns `true` when this is the user's first live session
    /// (0 -> 1), i.e. the user just came online.
    pub async fn register(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
        outbound: mpsc::UnboundedSender<ServerEvent>,
    ) -> bool {
        let mut inner = self.inner.write().await;

        inner.sessions.insert(
            connection_id,
            Session {
                user_id,
                outbound,
                connected_at: Utc::now(),
            },
        );

        let connections = inner.by_user.entry(user_id).or_default();
        connections.insert(connection_id);
        connections.len() == 1
    }

    /// Remove a connection. Idempotent: unknown connection ids are a
    /// no-op.
    ///
    /// Returns the owning user when this was their last session
    /// (1 -> 0), i.e. the user just went offline.
    pub async fn unregister(&self, connection_id: ConnectionId) -> Option<UserId> {
        let mut inner = self.inner.write().await;

        let session = inner.sessions.remove(&connection_id)?;
        let user_id = session.user_id;

        let emptied = match inner.by_user.get_mut(&user_id) {
            Some(connections) => {
                connections.remove(&connection_id);
                connections.is_empty()
            }
            None => false,
        };

        if emptied {
            inner.by_user.remove(&user_id);
            Some(user_id)
        } else {
            None
        }
    }

    /// The connection ids of every live session a user owns.
    #[allow(dead_code)]
    pub async fn sessions_for(&self, user_id: &UserId) -> HashSet<ConnectionId> {
        self.inner
            .read()
            .await
            .by_user
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn is_online(&self, user_id: &UserId) -> bool {
        self.inner
            .read()
            .await
            .by_user
            .get(user_id)
            .is_some_and(|connections| !connections.is_empty())
    }

    /// Total live connections, for the info endpoint.
    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Push an event to every live session of a user.
    ///
    /// Returns the number of sessions that accepted the event. A
    /// session whose outbound queue is gone (writer shut down mid-push)
    /// is skipped; that is a failure of one delivery, not of the
    /// operation.
    pub async fn send_to_user(&self, user_id: &UserId, event: &ServerEvent) -> usize {
        let inner = self.inner.read().await;

        let Some(connections) = inner.by_user.get(user_id) else {
            return 0;
        };

        let mut pushed = 0;
        for connection_id in connections {
            let Some(session) = inner.sessions.get(connection_id) else {
                continue;
            };
            if session.outbound.send(event.clone()).is_ok() {
                pushed += 1;
            } else {
                debug!(
                    user = %user_id.short(),
                    connection = %connection_id,
                    "Dropping event for closed session"
                );
            }
        }
        pushed
    }

}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (
        mpsc::UnboundedSender<ServerEvent>,
        mpsc::UnboundedReceiver<ServerEvent>,
    ) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn online_reflects_live_sessions() {
        let registry = SessionRegistry::new();
        let user = UserId([1; 32]);

        assert!(!registry.is_online(&user).await);

        let first = ConnectionId::new();
        let second = ConnectionId::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();

        assert!(registry.register(user, first, tx1).await);
        assert!(!registry.register(user, second, tx2).await);
        assert!(registry.is_online(&user).await);
        assert_eq!(registry.sessions_for(&user).await.len(), 2);

        assert_eq!(registry.unregister(first).await, None);
        assert!(registry.is_online(&user).await);

        assert_eq!(registry.unregister(second).await, Some(user));
        assert!(!registry.is_online(&user).await);
        assert!(registry.sessions_for(&user).await.is_empty());
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = SessionRegistry::new();
        let user = UserId([1; 32]);
        let connection = ConnectionId::new();
        let (tx, _rx) = channel();

        registry.register(user, connection, tx).await;
        assert_eq!(registry.unregister(connection).await, Some(user));
        assert_eq!(registry.unregister(connection).await, None);
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn send_reaches_every_session() {
        let registry = SessionRegistry::new();
        let user = UserId([1; 32]);

        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        registry.register(user, ConnectionId::new(), tx1).await;
        registry.register(user, ConnectionId::new(), tx2).await;

        let event = ServerEvent::PresenceUpdate {
            user_id: UserId([2; 32]),
            online: true,
        };
        assert_eq!(registry.send_to_user(&user, &event).await, 2);
        assert_eq!(rx1.recv().await.unwrap(), event);
        assert_eq!(rx2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn send_to_offline_user_pushes_nothing() {
        let registry = SessionRegistry::new();
        let event = ServerEvent::PresenceUpdate {
            user_id: UserId([2; 32]),
            online: true,
        };
        assert_eq!(registry.send_to_user(&UserId([1; 32]), &event).await, 0);
    }
}

//! The message dispatcher: persist, then fan out.
//!
//! A send is persisted exactly once before any delivery; a storage
//! failure aborts the whole operation with nothing pushed. Members
//! without a live session receive nothing here -- they catch up through
//! the history read path when they reconnect.

use tracing::debug;

use parley_shared::error::RelayError;
use parley_shared::protocol::{MessagePush, ReceiptKind, ServerEvent};
use parley_shared::types::{ConversationId, MessageId, UserId};
use parley_store::{Message, StoreError};

use crate::membership::MembershipResolver;
use crate::sessions::SessionRegistry;
use crate::store::Store;

#[derive(Clone)]
pub struct Dispatcher {
    store: Store,
    registry: SessionRegistry,
    membership: MembershipResolver,
}

impl Dispatcher {
    pub fn new(store: Store, registry: SessionRegistry, membership: MembershipResolver) -> Self {
        Self {
            store,
            registry,
            membership,
        }
    }

    /// Accept a chat message from `sender`, persist it, and push it to
    /// every live session of every conversation member.
    ///
    /// The store validates membership and assigns the sequence number
    /// atomically with the insert, so a rejected or failed write leaves
    /// no trace and triggers no delivery.
    pub async fn send(
        &self,
        sender: UserId,
        conversation_id: ConversationId,
        body: String,
    ) -> Result<MessagePush, RelayError> {
        let message = self
            .store
            .append_message(conversation_id.0, &sender, &body)
            .await
            .map_err(map_send_err)?;

        let push = to_push(&message);
        let members = self.membership.members_of(conversation_id.0).await?;

        let event = ServerEvent::MessageNew {
            message: push.clone(),
        };
        let mut pushed = 0;
        for member in &members {
            pushed += self.registry.send_to_user(member, &event).await;
        }

        debug!(
            conversation = %conversation_id,
            seq = push.seq,
            sessions = pushed,
            "message fanned out"
        );

        Ok(push)
    }

    /// Record a delivery acknowledgement from `user`.
    pub async fn mark_delivered(
        &self,
        user: UserId,
        message_id: MessageId,
    ) -> Result<(), RelayError> {
        let newly_marked = self
            .store
            .mark_delivered(message_id.0, &user)
            .await
            .map_err(map_ack_err)?;

        if newly_marked {
            self.broadcast_receipt(user, message_id, ReceiptKind::Delivered)
                .await?;
        }
        Ok(())
    }

    /// Record a read acknowledgement from `user`. Reading implies
    /// delivery, so an out-of-order read ack is still valid.
    pub async fn mark_read(&self, user: UserId, message_id: MessageId) -> Result<(), RelayError> {
        let newly_marked = self
            .store
            .mark_read(message_id.0, &user)
            .await
            .map_err(map_ack_err)?;

        if newly_marked {
            self.broadcast_receipt(user, message_id, ReceiptKind::Read)
                .await?;
        }
        Ok(())
    }

    /// Push a receipt event to the message's original sender and to the
    /// acknowledging user's own sessions, so receipt state stays
    /// consistent across everyone's devices.
    async fn broadcast_receipt(
        &self,
        user: UserId,
        message_id: MessageId,
        kind: ReceiptKind,
    ) -> Result<(), RelayError> {
        let message = self
            .store
            .get_message(message_id.0)
            .await
            .map_err(map_ack_err)?;

        let event = ServerEvent::MessageReceipt {
            message_id,
            user_id: user,
            kind,
        };

        self.registry.send_to_user(&message.sender_id, &event).await;
        if message.sender_id != user {
            self.registry.send_to_user(&user, &event).await;
        }
        Ok(())
    }
}

fn to_push(message: &Message) -> MessagePush {
    MessagePush {
        message_id: MessageId(message.id),
        conversation_id: ConversationId(message.conversation_id),
        sender: message.sender_id,
        body: message.body.clone(),
        seq: message.seq,
        sent_at: message.sent_at,
    }
}

fn map_send_err(err: StoreError) -> RelayError {
    match err {
        StoreError::NotFound => RelayError::ConversationNotFound,
        StoreError::NotAMember => RelayError::NotAMember,
        other => RelayError::Persistence(other.to_string()),
    }
}

fn map_ack_err(err: StoreError) -> RelayError {
    match err {
        StoreError::NotFound => RelayError::MessageNotFound,
        StoreError::NotAMember => RelayError::NotAMember,
        other => RelayError::Persistence(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use parley_shared::types::ConnectionId;
    use parley_store::{Conversation, Database};

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Store,
        registry: SessionRegistry,
        dispatcher: Dispatcher,
        conversation: Conversation,
        alice: UserId,
        bob: UserId,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        let store = Store::from_database(db);

        let alice = UserId([1; 32]);
        let bob = UserId([2; 32]);
        let conversation = Conversation::new();
        store
            .create_conversation(&conversation, &[alice, bob])
            .await
            .unwrap();

        let registry = SessionRegistry::new();
        let membership = MembershipResolver::new(store.clone(), Duration::ZERO);
        let dispatcher = Dispatcher::new(store.clone(), registry.clone(), membership);

        Fixture {
            _dir: dir,
            store,
            registry,
            dispatcher,
            conversation,
            alice,
            bob,
        }
    }

    async fn connect(
        registry: &SessionRegistry,
        user: UserId,
    ) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(user, ConnectionId::new(), tx).await;
        rx
    }

    #[tokio::test]
    async fn send_reaches_every_live_session_of_every_member() {
        let f = fixture().await;

        let mut alice_rx = connect(&f.registry, f.alice).await;
        let mut bob_phone = connect(&f.registry, f.bob).await;
        let mut bob_laptop = connect(&f.registry, f.bob).await;

        let push = f
            .dispatcher
            .send(f.alice, ConversationId(f.conversation.id), "hi".into())
            .await
            .unwrap();
        assert_eq!(push.seq, 1);

        for rx in [&mut alice_rx, &mut bob_phone, &mut bob_laptop] {
            match rx.recv().await.unwrap() {
                ServerEvent::MessageNew { message } => {
                    assert_eq!(message.body, "hi");
                    assert_eq!(message.sender, f.alice);
                    assert_eq!(message.seq, 1);
                }
                other => panic!("expected message:new, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn offline_members_get_nothing_but_message_persists() {
        let f = fixture().await;

        // nobody is connected at all
        let push = f
            .dispatcher
            .send(f.alice, ConversationId(f.conversation.id), "hello?".into())
            .await
            .unwrap();

        let stored = f.store.get_message(push.message_id.0).await.unwrap();
        assert_eq!(stored.body, "hello?");
        assert!(f.store.receipts_for(push.message_id.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_member_send_is_rejected_with_no_side_effects() {
        let f = fixture().await;
        let mallory = UserId([9; 32]);

        let mut bob_rx = connect(&f.registry, f.bob).await;

        assert!(matches!(
            f.dispatcher
                .send(mallory, ConversationId(f.conversation.id), "hi".into())
                .await,
            Err(RelayError::NotAMember)
        ));
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_conversation_is_rejected() {
        let f = fixture().await;
        assert!(matches!(
            f.dispatcher
                .send(f.alice, ConversationId::new(), "hi".into())
                .await,
            Err(RelayError::ConversationNotFound)
        ));
    }

    #[tokio::test]
    async fn seq_grows_per_conversation() {
        let f = fixture().await;

        for expected in 1..=3 {
            let push = f
                .dispatcher
                .send(f.alice, ConversationId(f.conversation.id), "tick".into())
                .await
                .unwrap();
            assert_eq!(push.seq, expected);
        }
    }

    #[tokio::test]
    async fn receipts_rebroadcast_to_sender_and_acker() {
        let f = fixture().await;

        let mut alice_rx = connect(&f.registry, f.alice).await;
        let mut bob_rx = connect(&f.registry, f.bob).await;

        let push = f
            .dispatcher
            .send(f.alice, ConversationId(f.conversation.id), "hi".into())
            .await
            .unwrap();
        // drain the message:new pushes
        alice_rx.recv().await.unwrap();
        bob_rx.recv().await.unwrap();

        f.dispatcher
            .mark_delivered(f.bob, push.message_id)
            .await
            .unwrap();

        for rx in [&mut alice_rx, &mut bob_rx] {
            match rx.recv().await.unwrap() {
                ServerEvent::MessageReceipt { user_id, kind, .. } => {
                    assert_eq!(user_id, f.bob);
                    assert_eq!(kind, ReceiptKind::Delivered);
                }
                other => panic!("expected message:receipt, got {other:?}"),
            }
        }

        // a repeated ack is a no-op: sets are append-only
        f.dispatcher
            .mark_delivered(f.bob, push.message_id)
            .await
            .unwrap();
        assert!(alice_rx.try_recv().is_err());

        f.dispatcher.mark_read(f.bob, push.message_id).await.unwrap();
        match alice_rx.recv().await.unwrap() {
            ServerEvent::MessageReceipt { kind, .. } => assert_eq!(kind, ReceiptKind::Read),
            other => panic!("expected message:receipt, got {other:?}"),
        }

        let receipts = f.store.receipts_for(push.message_id.0).await.unwrap();
        assert_eq!(receipts.len(), 1);
        assert!(receipts[0].read_at.is_some());
    }

    #[tokio::test]
    async fn ack_for_unknown_message_is_rejected() {
        let f = fixture().await;
        assert!(matches!(
            f.dispatcher.mark_delivered(f.bob, MessageId::new()).await,
            Err(RelayError::MessageNotFound)
        ));
    }
}

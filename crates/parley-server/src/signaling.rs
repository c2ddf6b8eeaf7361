//! WebRTC signaling relay.
//!
//! A pure routing function keyed on the envelope's target: no state
//! between envelopes, no timers, no queuing, and the negotiation
//! payload is never inspected or persisted. Calls are live-only by
//! design -- a stale offer is meaningless after any delay, so an offer
//! to an offline peer is dropped and the caller told so.

use tracing::debug;

use parley_shared::error::RelayError;
use parley_shared::protocol::SignalingEnvelope;

use crate::sessions::SessionRegistry;

#[derive(Clone)]
pub struct SignalingRelay {
    registry: SessionRegistry,
}

impl SignalingRelay {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    /// Route one envelope to every live session of its target.
    ///
    /// Returns the number of sessions reached, or
    /// [`RelayError::PeerOffline`] when the target has none -- the
    /// caller's UI uses that to end the call attempt.
    pub async fn relay(&self, envelope: SignalingEnvelope) -> Result<usize, RelayError> {
        let target = envelope.to;
        let call_id = envelope.call_id;

        let pushed = self
            .registry
            .send_to_user(&target, &envelope.into_event())
            .await;

        if pushed == 0 {
            // informational, not an error condition worth logging
            return Err(RelayError::PeerOffline);
        }

        debug!(
            target = %target.short(),
            call = %call_id,
            sessions = pushed,
            "signal relayed"
        );
        Ok(pushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc;

    use parley_shared::protocol::{ServerEvent, SignalKind};
    use parley_shared::types::{CallId, ConnectionId, UserId};

    fn offer(from: UserId, to: UserId, call_id: CallId) -> SignalingEnvelope {
        SignalingEnvelope {
            call_id,
            from,
            to,
            kind: SignalKind::Offer(serde_json::json!({"sdp": "v=0"})),
        }
    }

    #[tokio::test]
    async fn offer_to_offline_peer_is_dropped() {
        let registry = SessionRegistry::new();
        let relay = SignalingRelay::new(registry);

        let result = relay
            .relay(offer(UserId([1; 32]), UserId([2; 32]), CallId::new()))
            .await;
        assert!(matches!(result, Err(RelayError::PeerOffline)));
    }

    #[tokio::test]
    async fn envelope_reaches_every_target_session_untouched() {
        let registry = SessionRegistry::new();
        let relay = SignalingRelay::new(registry.clone());

        let caller = UserId([1; 32]);
        let callee = UserId([2; 32]);
        let call_id = CallId::new();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.register(callee, ConnectionId::new(), tx1).await;
        registry.register(callee, ConnectionId::new(), tx2).await;

        let pushed = relay.relay(offer(caller, callee, call_id)).await.unwrap();
        assert_eq!(pushed, 2);

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                ServerEvent::CallOffer {
                    from,
                    call_id: routed,
                    payload,
                } => {
                    assert_eq!(from, caller);
                    assert_eq!(routed, call_id);
                    assert_eq!(payload, serde_json::json!({"sdp": "v=0"}));
                }
                other => panic!("expected call:offer, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn concurrent_calls_keep_distinct_call_ids() {
        let registry = SessionRegistry::new();
        let relay = SignalingRelay::new(registry.clone());

        let caller = UserId([1; 32]);
        let callee = UserId([2; 32]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(callee, ConnectionId::new(), tx).await;

        let first = CallId::new();
        let second = CallId::new();
        relay.relay(offer(caller, callee, first)).await.unwrap();
        relay.relay(offer(caller, callee, second)).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            if let ServerEvent::CallOffer { call_id, .. } = rx.recv().await.unwrap() {
                seen.push(call_id);
            }
        }
        assert_eq!(seen, vec![first, second]);
    }

    #[tokio::test]
    async fn hangup_to_departed_peer_reports_offline() {
        let registry = SessionRegistry::new();
        let relay = SignalingRelay::new(registry.clone());

        let callee = UserId([2; 32]);
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = ConnectionId::new();
        registry.register(callee, connection, tx).await;
        drop(rx);
        registry.unregister(connection).await;

        let envelope = SignalingEnvelope {
            call_id: CallId::new(),
            from: UserId([1; 32]),
            to: callee,
            kind: SignalKind::Hangup,
        };
        assert!(matches!(
            relay.relay(envelope).await,
            Err(RelayError::PeerOffline)
        ));
    }
}

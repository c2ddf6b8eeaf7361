use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorCode, RelayError};
use crate::types::{CallId, ConversationId, MessageId, UserId};

/// Events a client may emit over an established socket. Frames are JSON
/// text, tagged by `"type"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "conversation:start")]
    ConversationStart { participants: Vec<UserId> },

    #[serde(rename = "conversation:add")]
    ConversationAdd {
        conversation_id: ConversationId,
        user_id: UserId,
    },

    #[serde(rename = "message:send")]
    MessageSend {
        conversation_id: ConversationId,
        body: String,
    },

    #[serde(rename = "message:delivered")]
    MessageDelivered { message_id: MessageId },

    #[serde(rename = "message:read")]
    MessageRead { message_id: MessageId },

    #[serde(rename = "call:offer")]
    CallOffer {
        to: UserId,
        call_id: CallId,
        payload: Value,
    },

    #[serde(rename = "call:answer")]
    CallAnswer {
        to: UserId,
        call_id: CallId,
        payload: Value,
    },

    #[serde(rename = "call:ice")]
    CallIce {
        to: UserId,
        call_id: CallId,
        payload: Value,
    },

    #[serde(rename = "call:hangup")]
    CallHangup { to: UserId, call_id: CallId },
}

/// Events the relay pushes to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "conversation:started")]
    ConversationStarted {
        conversation_id: ConversationId,
        participants: Vec<UserId>,
    },

    #[serde(rename = "conversation:member_added")]
    ConversationMemberAdded {
        conversation_id: ConversationId,
        user_id: UserId,
    },

    #[serde(rename = "message:new")]
    MessageNew { message: MessagePush },

    #[serde(rename = "message:receipt")]
    MessageReceipt {
        message_id: MessageId,
        user_id: UserId,
        kind: ReceiptKind,
    },

    #[serde(rename = "presence:update")]
    PresenceUpdate { user_id: UserId, online: bool },

    #[serde(rename = "call:offer")]
    CallOffer {
        from: UserId,
        call_id: CallId,
        payload: Value,
    },

    #[serde(rename = "call:answer")]
    CallAnswer {
        from: UserId,
        call_id: CallId,
        payload: Value,
    },

    #[serde(rename = "call:ice")]
    CallIce {
        from: UserId,
        call_id: CallId,
        payload: Value,
    },

    #[serde(rename = "call:hangup")]
    CallHangup { from: UserId, call_id: CallId },

    #[serde(rename = "error")]
    Error { code: ErrorCode, message: String },
}

impl From<&RelayError> for ServerEvent {
    fn from(err: &RelayError) -> Self {
        ServerEvent::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// The fan-out payload for one chat message. `seq` is the
/// server-assigned, per-conversation monotonic sequence number; clients
/// use it to resolve out-of-order arrival.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagePush {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub sender: UserId,
    pub body: String,
    pub seq: i64,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptKind {
    Delivered,
    Read,
}

/// One WebRTC negotiation message in flight. The relay routes on `to`
/// and never inspects or persists the payload; `call_id` scopes the
/// exchange to a single call attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalingEnvelope {
    pub call_id: CallId,
    pub from: UserId,
    pub to: UserId,
    pub kind: SignalKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SignalKind {
    Offer(Value),
    Answer(Value),
    IceCandidate(Value),
    Hangup,
}

impl SignalingEnvelope {
    /// The server event pushed to the target's sessions.
    pub fn into_event(self) -> ServerEvent {
        match self.kind {
            SignalKind::Offer(payload) => ServerEvent::CallOffer {
                from: self.from,
                call_id: self.call_id,
                payload,
            },
            SignalKind::Answer(payload) => ServerEvent::CallAnswer {
                from: self.from,
                call_id: self.call_id,
                payload,
            },
            SignalKind::IceCandidate(payload) => ServerEvent::CallIce {
                from: self.from,
                call_id: self.call_id,
                payload,
            },
            SignalKind::Hangup => ServerEvent::CallHangup {
                from: self.from,
                call_id: self.call_id,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_uses_tagged_names() {
        let event = ClientEvent::MessageSend {
            conversation_id: ConversationId::new(),
            body: "hi".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"message:send\""));

        let restored: ClientEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, restored);
    }

    #[test]
    fn offer_envelope_carries_call_id_through() {
        let call_id = CallId::new();
        let envelope = SignalingEnvelope {
            call_id,
            from: UserId([1; 32]),
            to: UserId([2; 32]),
            kind: SignalKind::Offer(serde_json::json!({"sdp": "v=0"})),
        };

        match envelope.into_event() {
            ServerEvent::CallOffer {
                call_id: routed, ..
            } => assert_eq!(routed, call_id),
            other => panic!("expected call:offer, got {other:?}"),
        }
    }

    #[test]
    fn malformed_frame_is_rejected() {
        let err = serde_json::from_str::<ClientEvent>("{\"type\":\"message:send\"}");
        assert!(err.is_err());
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Everything that can go wrong between a client event arriving and the
/// relay finishing with it. Validation errors are returned synchronously
/// to the caller and never retried.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The handshake credential was rejected; the connection is never
    /// admitted to the session registry.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// The sender is not a participant of the target conversation.
    #[error("sender is not a member of this conversation")]
    NotAMember,

    #[error("conversation not found")]
    ConversationNotFound,

    /// An acknowledgement referenced an unknown message id.
    #[error("message not found")]
    MessageNotFound,

    /// The signaling target has no live session. Informational, not
    /// worth logging as an error.
    #[error("peer has no live session")]
    PeerOffline,

    /// The request was well-formed JSON but semantically invalid.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A storage write failed. The operation is aborted before any
    /// fan-out; retrying is the caller's decision.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Socket-level failure scoped to a single connection.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Stable wire codes for the `error` server event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AuthFailure,
    NotAMember,
    ConversationNotFound,
    MessageNotFound,
    PeerOffline,
    InvalidRequest,
    Persistence,
    Transport,
}

impl RelayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::AuthFailure(_) => ErrorCode::AuthFailure,
            RelayError::NotAMember => ErrorCode::NotAMember,
            RelayError::ConversationNotFound => ErrorCode::ConversationNotFound,
            RelayError::MessageNotFound => ErrorCode::MessageNotFound,
            RelayError::PeerOffline => ErrorCode::PeerOffline,
            RelayError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            RelayError::Persistence(_) => ErrorCode::Persistence,
            RelayError::Transport(_) => ErrorCode::Transport,
        }
    }
}

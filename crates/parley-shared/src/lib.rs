//! # parley-shared
//!
//! Types shared between the relay server and its storage layer:
//! identifier newtypes, the socket wire protocol (client and server
//! events plus signaling envelopes), access-token creation and
//! verification, and the error taxonomy surfaced to clients.

pub mod error;
pub mod protocol;
pub mod token;
pub mod types;

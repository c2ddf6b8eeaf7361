//! # parley-store
//!
//! Durable storage for the relay, backed by SQLite.
//!
//! This is the single source of truth for users, conversations,
//! membership, messages, and delivery receipts.  The crate exposes a
//! synchronous `Database` handle that wraps a `rusqlite::Connection`
//! and provides typed helpers for every domain model; the server wraps
//! it in an async handle so socket handlers suspend instead of
//! blocking each other.

pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod receipts;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;

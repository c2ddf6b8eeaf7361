//! # parley-server
//!
//! Real-time messaging and signaling relay.
//!
//! This binary provides:
//! - **Authenticated WebSocket transport** -- every handshake presents a
//!   token signed by the identity service before it is admitted
//! - **Session registry** with multi-device presence
//! - **Message dispatch**: persist once, then fan out to every live
//!   session of every conversation member
//! - **WebRTC signaling relay** that routes offer/answer/ICE payloads
//!   between peers without ever inspecting them
//! - **Per-IP rate limiting** on the handshake path

mod api;
mod auth;
mod config;
mod dispatch;
mod error;
mod membership;
mod presence;
mod rate_limit;
mod sessions;
mod signaling;
mod socket;
mod store;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::membership::MembershipResolver;
use crate::presence::PresenceBroadcaster;
use crate::rate_limit::RateLimiter;
use crate::sessions::SessionRegistry;
use crate::signaling::SignalingRelay;
use crate::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting parley relay v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let store = match &config.database_path {
        Some(path) => Store::open_at(path)?,
        None => Store::open_default()?,
    };

    let registry = SessionRegistry::new();
    let membership = MembershipResolver::new(store.clone(), config.membership_cache_ttl);
    let presence = PresenceBroadcaster::new(
        registry.clone(),
        membership.clone(),
        config.presence_grace,
    );
    let dispatcher = Dispatcher::new(store.clone(), registry.clone(), membership.clone());
    let signaling = SignalingRelay::new(registry.clone());
    let authenticator = Arc::new(Authenticator::new(config.identity_pubkey, store.clone()));
    let rate_limiter = RateLimiter::new(config.handshake_rate, config.handshake_burst);

    let state = AppState {
        config: Arc::new(config.clone()),
        store,
        registry,
        presence,
        membership: membership.clone(),
        dispatcher,
        signaling,
        authenticator,
        rate_limiter: rate_limiter.clone(),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background maintenance tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rate_limiter.sweep(600.0).await;
        }
    });

    // Periodic membership cache cleanup (every minute)
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            membership.purge_expired().await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP server (blocks until shutdown)
    // -----------------------------------------------------------------------
    // tokio::select! ensures that if either the HTTP server or a shutdown
    // signal arrives, we exit cleanly.
    tokio::select! {
        result = api::serve(state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

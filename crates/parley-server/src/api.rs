//! HTTP surface: the WebSocket endpoint plus health and info routes.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Method};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_shared::types::UserId;
use parley_store::User;

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::error::ServerError;
use crate::membership::MembershipResolver;
use crate::presence::PresenceBroadcaster;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::sessions::SessionRegistry;
use crate::signaling::SignalingRelay;
use crate::socket;
use crate::store::Store;

/// Everything a handler needs, injected at construction -- no ambient
/// globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Store,
    pub registry: SessionRegistry,
    pub presence: PresenceBroadcaster,
    pub membership: MembershipResolver,
    pub dispatcher: Dispatcher,
    pub signaling: SignalingRelay,
    pub authenticator: Arc<Authenticator>,
    pub rate_limiter: RateLimiter,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(socket::ws_handler))
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/admin/users", post(admin_register_user))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    connections: usize,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        connections: state.registry.connection_count().await,
    })
}

#[derive(Deserialize)]
struct AdminRegisterRequest {
    /// Hex-encoded Ed25519 public key (64 chars).
    user_id: String,
    display_name: Option<String>,
}

#[derive(Serialize)]
struct AdminRegisterResponse {
    registered: bool,
}

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    // Constant-time comparison to prevent timing attacks on admin token.
    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

/// Register (or rename) an identity. Normally the identity service
/// writes users out-of-band; this endpoint covers self-hosted setups
/// where the admin provisions accounts by hand.
async fn admin_register_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<AdminRegisterRequest>,
) -> Result<Json<AdminRegisterResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let user_id = UserId::from_hex(req.user_id.trim())
        .map_err(|e| ServerError::BadRequest(format!("Invalid user id: {e}")))?;

    state
        .store
        .upsert_user(&User {
            id: user_id,
            display_name: req.display_name,
            created_at: Utc::now(),
        })
        .await?;

    info!(user = %user_id.short(), "Admin registered user");
    Ok(Json(AdminRegisterResponse { registered: true }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

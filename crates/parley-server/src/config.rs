//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the relay can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Filesystem path of the SQLite database.
    /// Env: `DATABASE_PATH`
    /// Default: platform data directory.
    pub database_path: Option<PathBuf>,

    /// Ed25519 public key of the identity service (hex-encoded, 64
    /// chars) used to verify handshake tokens.
    /// Env: `IDENTITY_SERVER_PUBKEY`
    /// Default: all-zeros (development only; rejects every token).
    pub identity_pubkey: [u8; 32],

    /// Human-readable name for this relay instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Parley Relay"`
    pub instance_name: String,

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// How long a user stays nominally online after their last session
    /// drops, to absorb transient reconnects.
    /// Env: `PRESENCE_GRACE_MS`
    /// Default: 2000
    pub presence_grace: Duration,

    /// TTL of the conversation-membership cache. Zero disables caching.
    /// Env: `MEMBERSHIP_CACHE_TTL_MS`
    /// Default: 5000
    pub membership_cache_ttl: Duration,

    /// Sustained handshake rate per client IP (requests per second).
    /// Env: `HANDSHAKE_RATE`
    /// Default: 10.0
    pub handshake_rate: f64,

    /// Handshake burst capacity per client IP.
    /// Env: `HANDSHAKE_BURST`
    /// Default: 30.0
    pub handshake_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            database_path: None,
            identity_pubkey: [0u8; 32],
            instance_name: "Parley Relay".to_string(),
            admin_token: None,
            presence_grace: Duration::from_millis(2000),
            membership_cache_ttl: Duration::from_millis(5000),
            handshake_rate: 10.0,
            handshake_burst: 30.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Ok(hex_key) = std::env::var("IDENTITY_SERVER_PUBKEY") {
            match parse_hex_pubkey(&hex_key) {
                Ok(key) => config.identity_pubkey = key,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid IDENTITY_SERVER_PUBKEY, using default (dev-only)"
                    );
                }
            }
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Ok(token) = std::env::var("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Ok(val) = std::env::var("PRESENCE_GRACE_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                config.presence_grace = Duration::from_millis(ms);
            }
        }

        if let Ok(val) = std::env::var("MEMBERSHIP_CACHE_TTL_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                config.membership_cache_ttl = Duration::from_millis(ms);
            }
        }

        if let Ok(val) = std::env::var("HANDSHAKE_RATE") {
            if let Ok(rate) = val.parse::<f64>() {
                config.handshake_rate = rate;
            }
        }

        if let Ok(val) = std::env::var("HANDSHAKE_BURST") {
            if let Ok(burst) = val.parse::<f64>() {
                config.handshake_burst = burst;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

/// Parse a 64-character hex string into a 32-byte array.
fn parse_hex_pubkey(hex_str: &str) -> Result<[u8; 32], String> {
    let hex_str = hex_str.trim();
    if hex_str.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", hex_str.len()));
    }

    let bytes = hex::decode(hex_str).map_err(|e| e.to_string())?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.identity_pubkey, [0u8; 32]);
        assert_eq!(config.presence_grace, Duration::from_millis(2000));
    }

    #[test]
    fn test_parse_hex_pubkey() {
        let hex_str = "ab".repeat(32);
        let key = parse_hex_pubkey(&hex_str).unwrap();
        assert_eq!(key, [0xab; 32]);
    }

    #[test]
    fn test_parse_hex_pubkey_wrong_length() {
        assert!(parse_hex_pubkey("abcd").is_err());
    }
}

//! Handshake access tokens.
//!
//! The identity service signs `{user_id, expires_at}` with its Ed25519
//! key; a client presents the base64-encoded token with the WebSocket
//! handshake. The relay only verifies -- it never issues tokens outside
//! of tests and tooling.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::UserId;

/// Token signed by the identity service; opaque to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
    pub signature: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum TokenDecodeError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid token payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl AccessToken {
    /// Encode for transport in a query parameter.
    pub fn encode(&self) -> String {
        // serializing a plain struct of owned fields cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(s: &str) -> Result<Self, TokenDecodeError> {
        let bytes = URL_SAFE_NO_PAD.decode(s.trim())?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

// payload = user_id bytes || expires_at (rfc3339)
fn token_payload(user_id: &UserId, expires_at: &DateTime<Utc>) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&user_id.0);
    payload.extend_from_slice(expires_at.to_rfc3339().as_bytes());
    payload
}

/// Issue a token. Lives here so tests and the identity-service tooling
/// share one definition of the signed payload.
pub fn sign_access_token(
    user_id: &UserId,
    expires_at: DateTime<Utc>,
    issuer_key: &SigningKey,
) -> AccessToken {
    let signature = issuer_key.sign(&token_payload(user_id, &expires_at));

    AccessToken {
        user_id: *user_id,
        expires_at,
        signature: signature.to_bytes().to_vec(),
    }
}

/// Returns `true` if the token is unexpired and carries a valid
/// signature from the given issuer key.
pub fn verify_access_token(token: &AccessToken, issuer_pubkey: &[u8; 32]) -> bool {
    if Utc::now() > token.expires_at {
        return false;
    }

    let Ok(verifying_key) = VerifyingKey::from_bytes(issuer_pubkey) else {
        return false;
    };

    let Ok(signature) = Signature::from_slice(&token.signature) else {
        return false;
    };

    verifying_key
        .verify(&token_payload(&token.user_id, &token.expires_at), &signature)
        .is_ok()
}

//! Handshake authentication.
//!
//! Runs once per transport handshake, before the connection is admitted
//! to the session registry. A connection that fails here is answered
//! with HTTP 401 and never sees a single event.

use tracing::debug;

use parley_shared::error::RelayError;
use parley_shared::token::{verify_access_token, AccessToken};
use parley_shared::types::UserId;

use crate::store::Store;

pub struct Authenticator {
    /// The identity service's Ed25519 public key.
    issuer_pubkey: [u8; 32],
    store: Store,
}

impl Authenticator {
    pub fn new(issuer_pubkey: [u8; 32], store: Store) -> Self {
        Self {
            issuer_pubkey,
            store,
        }
    }

    /// Validate a handshake credential and resolve it to an identity.
    ///
    /// The credential must decode to an [`AccessToken`], carry a valid
    /// unexpired signature from the identity service, and reference a
    /// registered user.
    pub async fn authenticate(&self, credential: &str) -> Result<UserId, RelayError> {
        let token = AccessToken::decode(credential)
            .map_err(|e| RelayError::AuthFailure(e.to_string()))?;

        if !verify_access_token(&token, &self.issuer_pubkey) {
            debug!(user = %token.user_id.short(), "rejected token: bad signature or expired");
            return Err(RelayError::AuthFailure(
                "invalid or expired token".to_string(),
            ));
        }

        let known = self
            .store
            .user_exists(&token.user_id)
            .await
            .map_err(|e| RelayError::Persistence(e.to_string()))?;
        if !known {
            debug!(user = %token.user_id.short(), "rejected token: unknown identity");
            return Err(RelayError::AuthFailure("unknown identity".to_string()));
        }

        Ok(token.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use ed25519_dalek::SigningKey;
    use parley_shared::token::sign_access_token;
    use parley_store::{Database, User};
    use rand::rngs::OsRng;

    async fn store_with_user(user_id: UserId) -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        let store = Store::from_database(db);
        store
            .upsert_user(&User {
                id: user_id,
                display_name: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn valid_credential_is_admitted() {
        let issuer = SigningKey::generate(&mut OsRng);
        let user = UserId([5; 32]);
        let (_dir, store) = store_with_user(user).await;

        let auth = Authenticator::new(issuer.verifying_key().to_bytes(), store);
        let token = sign_access_token(&user, Utc::now() + Duration::hours(1), &issuer);

        assert_eq!(auth.authenticate(&token.encode()).await.unwrap(), user);
    }

    #[tokio::test]
    async fn expired_credential_is_rejected() {
        let issuer = SigningKey::generate(&mut OsRng);
        let user = UserId([5; 32]);
        let (_dir, store) = store_with_user(user).await;

        let auth = Authenticator::new(issuer.verifying_key().to_bytes(), store);
        let token = sign_access_token(&user, Utc::now() - Duration::minutes(1), &issuer);

        assert!(matches!(
            auth.authenticate(&token.encode()).await,
            Err(RelayError::AuthFailure(_))
        ));
    }

    #[tokio::test]
    async fn unknown_identity_is_rejected() {
        let issuer = SigningKey::generate(&mut OsRng);
        let registered = UserId([5; 32]);
        let stranger = UserId([6; 32]);
        let (_dir, store) = store_with_user(registered).await;

        let auth = Authenticator::new(issuer.verifying_key().to_bytes(), store);
        let token = sign_access_token(&stranger, Utc::now() + Duration::hours(1), &issuer);

        assert!(matches!(
            auth.authenticate(&token.encode()).await,
            Err(RelayError::AuthFailure(_))
        ));
    }

    #[tokio::test]
    async fn garbage_credential_is_rejected() {
        let issuer = SigningKey::generate(&mut OsRng);
        let user = UserId([5; 32]);
        let (_dir, store) = store_with_user(user).await;

        let auth = Authenticator::new(issuer.verifying_key().to_bytes(), store);
        assert!(matches!(
            auth.authenticate("definitely-not-a-token").await,
            Err(RelayError::AuthFailure(_))
        ));
    }
}

//! Session tokens, password hashing and WebSocket authentication.
//!
//! Tokens have the shape `base64url(claims).hex(mac)` where the MAC is a
//! BLAKE3 keyed hash of the encoded claims under the server secret.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use parley_shared::{ChatError, Principal, PrincipalId};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::router::SharedStore;

const PASSWORD_CONTEXT: &str = "parley 2024-01-01 password hash v1";
const SALT_LEN: usize = 16;

/// Verifies a credential token and yields the principal it was issued to.
pub trait AuthService: Send + Sync {
    fn verify(&self, token: &str) -> Result<PrincipalId, ChatError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: PrincipalId,
    /// Expiry as a unix timestamp (seconds).
    exp: i64,
}

/// Issues and verifies MAC-signed session tokens.
#[derive(Clone)]
pub struct TokenAuthority {
    secret: [u8; 32],
}

impl TokenAuthority {
    pub fn new(secret: [u8; 32]) -> Self {
        Self { secret }
    }

    pub fn issue(&self, principal: PrincipalId, ttl: Duration) -> String {
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: principal,
            exp: Utc::now().timestamp().saturating_add(ttl),
        };
        // Claims are two plain fields; serialization cannot fail.
        let json = serde_json::to_vec(&claims).unwrap_or_default();
        let payload = URL_SAFE_NO_PAD.encode(json);
        let mac = blake3::keyed_hash(&self.secret, payload.as_bytes());
        format!("{payload}.{}", mac.to_hex())
    }
}

impl AuthService for TokenAuthority {
    fn verify(&self, token: &str) -> Result<PrincipalId, ChatError> {
        let invalid = || ChatError::Authentication("invalid token".into());

        let (payload, mac_hex) = token.split_once('.').ok_or_else(invalid)?;
        let presented = hex::decode(mac_hex).map_err(|_| invalid())?;
        let expected = blake3::keyed_hash(&self.secret, payload.as_bytes());
        if presented.len() != 32 || presented.ct_eq(expected.as_bytes()).unwrap_u8() != 1 {
            return Err(invalid());
        }

        let json = URL_SAFE_NO_PAD.decode(payload).map_err(|_| invalid())?;
        let claims: Claims = serde_json::from_slice(&json).map_err(|_| invalid())?;
        if claims.exp <= Utc::now().timestamp() {
            return Err(ChatError::Authentication("token expired".into()));
        }
        Ok(claims.sub)
    }
}

/// Hash a password with a random salt. The result is `hex(salt)$hex(hash)`.
pub fn hash_password(password: &str) -> String {
    let salt: [u8; SALT_LEN] = rand::random();
    let hash = derive_password_key(&salt, password);
    format!("{}${}", hex::encode(salt), hex::encode(hash))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt_hex, hash_hex)) = stored.split_once('$') else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(hash_hex)) else {
        return false;
    };
    let actual = derive_password_key(&salt, password);
    expected.len() == actual.len() && expected.ct_eq(&actual).unwrap_u8() == 1
}

fn derive_password_key(salt: &[u8], password: &str) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(PASSWORD_CONTEXT);
    hasher.update(salt);
    hasher.update(password.as_bytes());
    *hasher.finalize().as_bytes()
}

/// Resolves the token presented at WebSocket upgrade to a stored principal.
#[derive(Clone)]
pub struct ConnectionAuthenticator {
    auth: Arc<dyn AuthService>,
    store: SharedStore,
}

impl ConnectionAuthenticator {
    pub fn new(auth: Arc<dyn AuthService>, store: SharedStore) -> Self {
        Self { auth, store }
    }

    pub async fn authenticate(&self, token: Option<&str>) -> Result<Principal, ChatError> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ChatError::Authentication("missing token".into()))?;
        let id = self.auth.verify(token)?;

        let store = self.store.lock().await;
        store.get_principal(id).map_err(|e| {
            debug!(principal = %id, error = %e, "Token for unknown principal");
            ChatError::Authentication("unknown principal".into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_store::{Account, MemoryStore, Store};
    use tokio::sync::Mutex;

    fn authority() -> TokenAuthority {
        TokenAuthority::new([7u8; 32])
    }

    #[test]
    fn issued_token_verifies() {
        let auth = authority();
        let id = PrincipalId::new();
        let token = auth.issue(id, Duration::from_secs(60));
        assert_eq!(auth.verify(&token).unwrap(), id);
    }

    #[test]
    fn tampered_or_foreign_tokens_are_rejected() {
        let auth = authority();
        let token = auth.issue(PrincipalId::new(), Duration::from_secs(60));

        let (payload, mac) = token.split_once('.').unwrap();
        let forged_payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&Claims {
                sub: PrincipalId::new(),
                exp: i64::MAX,
            })
            .unwrap(),
        );
        assert!(auth.verify(&format!("{forged_payload}.{mac}")).is_err());
        assert!(auth.verify(&format!("{payload}.00")).is_err());
        assert!(auth.verify("garbage").is_err());

        let other = TokenAuthority::new([8u8; 32]);
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let auth = authority();
        let token = auth.issue(PrincipalId::new(), Duration::ZERO);
        assert_eq!(
            auth.verify(&token),
            Err(ChatError::Authentication("token expired".into()))
        );
    }

    #[test]
    fn password_hash_round_trip() {
        let stored = hash_password("hunter2");
        assert!(verify_password("hunter2", &stored));
        assert!(!verify_password("hunter3", &stored));
        assert!(!verify_password("hunter2", "not-a-hash"));
        assert_ne!(stored, hash_password("hunter2"));
    }

    #[tokio::test]
    async fn authenticator_resolves_stored_principal() {
        let mut store = MemoryStore::default();
        let sam = Principal::registered("sam");
        store.create_principal(&Account::guest(sam.clone())).unwrap();
        let store: SharedStore = Arc::new(Mutex::new(Box::new(store)));

        let tokens = authority();
        let authenticator = ConnectionAuthenticator::new(Arc::new(tokens.clone()), store);

        let token = tokens.issue(sam.id, Duration::from_secs(60));
        assert_eq!(authenticator.authenticate(Some(&token)).await.unwrap(), sam);

        let stranger = tokens.issue(PrincipalId::new(), Duration::from_secs(60));
        assert!(matches!(
            authenticator.authenticate(Some(&stranger)).await,
            Err(ChatError::Authentication(_))
        ));
        assert!(authenticator.authenticate(None).await.is_err());
        assert!(authenticator.authenticate(Some("")).await.is_err());
    }
}

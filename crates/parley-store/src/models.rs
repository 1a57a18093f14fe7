//! Store-side records that never leave the server.

use chrono::{DateTime, Utc};
use parley_shared::Principal;
use serde::{Deserialize, Serialize};

/// A principal together with its login secret.
///
/// Guests have no password hash and can never log in again once their
/// token expires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub principal: Principal,
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn guest(principal: Principal) -> Self {
        Self {
            principal,
            password_hash: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_password(principal: Principal, password_hash: String) -> Self {
        Self {
            principal,
            password_hash: Some(password_hash),
            created_at: Utc::now(),
        }
    }
}

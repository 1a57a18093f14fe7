use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced to a connected client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::Authentication(_) => ErrorKind::Authentication,
            ChatError::Authorization(_) => ErrorKind::Authorization,
            ChatError::NotFound(_) => ErrorKind::NotFound,
            ChatError::Validation(_) => ErrorKind::Validation,
            ChatError::Upstream(_) => ErrorKind::Upstream,
            ChatError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to hand to a client. Internal details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            ChatError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    Authorization,
    NotFound,
    Validation,
    Upstream,
    Internal,
}

pub type Result<T> = std::result::Result<T, ChatError>;

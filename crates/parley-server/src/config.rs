//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server starts with zero configuration
//! for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use parley_shared::constants::{
    DEFAULT_ASSISTANT_PREFIX, DEFAULT_RETENTION_LIMIT, MAX_UPLOAD_SIZE,
};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// SQLite database file. Unset keeps everything in memory.
    /// Env: `DATABASE_PATH`
    pub database_path: Option<PathBuf>,

    /// Directory where uploaded files are stored.
    /// Env: `UPLOAD_PATH`
    /// Default: `./uploads`
    pub upload_path: PathBuf,

    /// Maximum upload size in bytes.
    /// Env: `MAX_UPLOAD_SIZE`
    /// Default: 5 MiB
    pub max_upload_size: usize,

    /// Key for signing session tokens (hex-encoded, 64 chars).
    /// Env: `TOKEN_SECRET`
    /// Default: random per process, so tokens do not survive a restart.
    pub token_secret: [u8; 32],

    /// Lifetime of tokens issued to registered principals.
    /// Env: `TOKEN_TTL_SECS`
    /// Default: 30 days
    pub token_ttl: Duration,

    /// Lifetime of tokens issued to guests.
    /// Env: `GUEST_TOKEN_TTL_SECS`
    /// Default: 24 hours
    pub guest_token_ttl: Duration,

    /// Base URL of the retrieval-augmented assistant service.
    /// Env: `ASSISTANT_URL`
    /// Default: unset (assistant disabled).
    pub assistant_url: Option<String>,

    /// Env: `ASSISTANT_TIMEOUT_SECS`
    /// Default: `60`
    pub assistant_timeout: Duration,

    /// Text prefix that routes a message to the assistant.
    /// Env: `ASSISTANT_PREFIX`
    /// Default: `"/askAI "`
    pub assistant_prefix: String,

    /// Root messages kept per channel by the in-memory store.
    /// Env: `RETENTION_LIMIT`
    /// Default: `50`
    pub retention_limit: usize,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("upload_path", &self.upload_path)
            .field("max_upload_size", &self.max_upload_size)
            .field("token_secret", &"<redacted>")
            .field("token_ttl", &self.token_ttl)
            .field("guest_token_ttl", &self.guest_token_ttl)
            .field("assistant_url", &self.assistant_url)
            .field("assistant_timeout", &self.assistant_timeout)
            .field("assistant_prefix", &self.assistant_prefix)
            .field("retention_limit", &self.retention_limit)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 3000).into(),
            database_path: None,
            upload_path: PathBuf::from("./uploads"),
            max_upload_size: MAX_UPLOAD_SIZE,
            token_secret: rand::random(),
            token_ttl: Duration::from_secs(30 * 24 * 3600),
            guest_token_ttl: Duration::from_secs(24 * 3600),
            assistant_url: None,
            assistant_timeout: Duration::from_secs(60),
            assistant_prefix: DEFAULT_ASSISTANT_PREFIX.to_string(),
            retention_limit: DEFAULT_RETENTION_LIMIT,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
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
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(path) = std::env::var("UPLOAD_PATH") {
            config.upload_path = PathBuf::from(path);
        }

        if let Some(n) = parse_var::<usize>("MAX_UPLOAD_SIZE") {
            config.max_upload_size = n;
        }

        match std::env::var("TOKEN_SECRET") {
            Ok(hex_key) => match parse_hex_secret(&hex_key) {
                Ok(key) => config.token_secret = key,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid TOKEN_SECRET, using a random per-process secret"
                    );
                }
            },
            Err(_) => {
                tracing::warn!("TOKEN_SECRET not set, tokens will not survive a restart");
            }
        }

        if let Some(secs) = parse_var::<u64>("TOKEN_TTL_SECS") {
            config.token_ttl = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_var::<u64>("GUEST_TOKEN_TTL_SECS") {
            config.guest_token_ttl = Duration::from_secs(secs);
        }

        if let Ok(url) = std::env::var("ASSISTANT_URL") {
            if !url.is_empty() {
                config.assistant_url = Some(url);
            }
        }

        if let Some(secs) = parse_var::<u64>("ASSISTANT_TIMEOUT_SECS") {
            config.assistant_timeout = Duration::from_secs(secs);
        }

        if let Ok(prefix) = std::env::var("ASSISTANT_PREFIX") {
            if prefix.trim().is_empty() {
                tracing::warn!("Empty ASSISTANT_PREFIX, using default");
            } else {
                config.assistant_prefix = prefix;
            }
        }

        if let Some(n) = parse_var::<usize>("RETENTION_LIMIT") {
            if n == 0 {
                tracing::warn!("RETENTION_LIMIT must be positive, using default");
            } else {
                config.retention_limit = n;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(var = name, value = %value, "Unparsable value, using default");
            None
        }
    }
}

/// Parse a 64-character hex string into a 32-byte key.
fn parse_hex_secret(value: &str) -> Result<[u8; 32], String> {
    let value = value.trim();
    if value.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", value.len()));
    }
    let bytes = hex::decode(value).map_err(|e| format!("invalid hex: {e}"))?;
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
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 3000).into());
        assert_eq!(config.assistant_prefix, "/askAI ");
        assert_eq!(config.retention_limit, 50);
        assert_eq!(config.max_upload_size, 5 * 1024 * 1024);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_parse_hex_secret() {
        let hex = "ab".repeat(32);
        assert_eq!(parse_hex_secret(&hex).unwrap(), [0xab; 32]);
    }

    #[test]
    fn test_parse_hex_secret_rejects_bad_input() {
        assert!(parse_hex_secret("abcd").is_err());
        assert!(parse_hex_secret(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = ServerConfig::default();
        let printed = format!("{config:?}");
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains(&hex::encode(config.token_secret)));
    }
}

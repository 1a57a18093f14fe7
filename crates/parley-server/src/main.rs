//! # parley-server
//!
//! Realtime group chat server.
//!
//! This binary provides:
//! - **WebSocket router** that fans messages, threads, reactions and
//!   presence out to subscribed connections
//! - **Assistant bridge** that answers `/askAI` questions through an external
//!   retrieval-augmented service and posts the answer as a thread reply
//! - **REST API** (axum) for registration, login, guest access and file
//!   uploads
//! - **Per-IP and per-principal rate limiting** to protect against abuse

mod api;
mod assistant;
mod auth;
mod blob_store;
mod command;
mod config;
mod error;
mod hub;
mod membership;
mod messages;
mod presence;
mod rate_limit;
mod reactions;
mod router;
mod threads;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use parley_shared::constants::HISTORY_PAGE_SIZE;
use parley_shared::PrincipalId;
use parley_store::{Database, MemoryStore, Store};
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::assistant::{Assistant, DisabledAssistant, HttpAssistant};
use crate::auth::{ConnectionAuthenticator, TokenAuthority};
use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;
use crate::router::{spawn_router, RouterConfig, SharedStore};

const IDLE_BUCKET_TTL: Duration = Duration::from_secs(600);

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

    info!("Starting Parley server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let store: Box<dyn Store> = match &config.database_path {
        Some(path) => {
            info!(path = %path.display(), "Using SQLite store");
            Box::new(Database::open_at(path)?)
        }
        None => {
            info!(retention = config.retention_limit, "Using in-memory store");
            Box::new(MemoryStore::new(config.retention_limit))
        }
    };
    let store: SharedStore = Arc::new(Mutex::new(store));

    let assistant: Arc<dyn Assistant> = match &config.assistant_url {
        Some(url) => {
            info!(url = %url, "Assistant enabled");
            Arc::new(HttpAssistant::new(url, config.assistant_timeout)?)
        }
        None => {
            info!("ASSISTANT_URL not set, assistant disabled");
            Arc::new(DisabledAssistant)
        }
    };

    let router = spawn_router(
        Arc::clone(&store),
        assistant,
        RouterConfig {
            assistant_prefix: config.assistant_prefix.clone(),
            history_limit: HISTORY_PAGE_SIZE,
        },
    );

    let tokens = Arc::new(TokenAuthority::new(config.token_secret));
    let authenticator = ConnectionAuthenticator::new(tokens.clone(), Arc::clone(&store));

    // Upload store (creates directory if missing)
    let blob_store = Arc::new(
        BlobStore::new(config.upload_path.clone(), config.max_upload_size).await?,
    );

    // HTTP: 10 req/s sustained, burst of 30. WebSocket events: 5/s, burst of 20.
    let rate_limiter = RateLimiter::default();
    let event_limiter: RateLimiter<PrincipalId> = RateLimiter::new(5.0, 20.0);
    info!(
        http = ?rate_limiter.quota(),
        events = ?event_limiter.quota(),
        "Rate limits configured"
    );

    let http_addr = config.http_addr;
    let guest_ttl = config.guest_token_ttl;
    let purger = router.clone();
    let app_state = AppState {
        store,
        router,
        authenticator,
        tokens,
        blob_store,
        rate_limiter: rate_limiter.clone(),
        event_limiter: event_limiter.clone(),
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic cleanup (every 5 minutes): rate limiter buckets idle >10 min,
    // and offline guests older than the guest token lifetime.
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rate_limiter.purge_stale(IDLE_BUCKET_TTL).await;
            event_limiter.purge_stale(IDLE_BUCKET_TTL).await;
            purger.purge_guests(guest_ttl);
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
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

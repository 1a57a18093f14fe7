use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, Method},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use parley_shared::constants::{GUEST_NAME_PREFIX, MAX_DISPLAY_NAME_LEN};
use parley_shared::{ChannelId, Principal, PrincipalId};
use parley_store::{Account, Store};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::{hash_password, verify_password, ConnectionAuthenticator, TokenAuthority};
use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::router::{RouterHandle, SharedStore};
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub router: RouterHandle,
    pub authenticator: ConnectionAuthenticator,
    pub tokens: Arc<TokenAuthority>,
    pub blob_store: Arc<BlobStore>,
    pub rate_limiter: RateLimiter,
    /// Inbound WebSocket events, keyed by principal.
    pub event_limiter: RateLimiter<PrincipalId>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    // Multipart framing adds a little on top of the file itself.
    let body_limit = state.blob_store.max_size() + 64 * 1024;

    Router::new()
        .route("/health", get(health_check))
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        .route("/api/guest", post(guest))
        .route("/upload", post(upload))
        .route("/uploads/:id", get(download))
        .route("/ws", get(ws::ws_handler))
        .layer(DefaultBodyLimit::max(body_limit))
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

#[derive(Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct GuestRequest {
    username: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionResponse {
    token: String,
    principal: Principal,
}

#[derive(Debug, Serialize, Deserialize)]
struct UploadResponse {
    url: String,
    #[serde(rename = "type")]
    content_type: String,
    name: String,
    size: usize,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<Credentials>,
) -> Result<Json<SessionResponse>, ServerError> {
    let name = validate_username(&req.username)?;
    if name.starts_with(GUEST_NAME_PREFIX) {
        return Err(ServerError::BadRequest(format!(
            "Usernames may not start with '{GUEST_NAME_PREFIX}'"
        )));
    }
    if req.password.is_empty() {
        return Err(ServerError::BadRequest("Password is required".into()));
    }

    let principal = Principal::registered(name);
    let account = Account::with_password(principal.clone(), hash_password(&req.password));
    create_account(&state.store, &account).await?;

    info!(principal = %principal.id, name = %principal.display_name, "Registered principal");
    let token = state.tokens.issue(principal.id, state.config.token_ttl);
    Ok(Json(SessionResponse { token, principal }))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<Credentials>,
) -> Result<Json<SessionResponse>, ServerError> {
    let invalid = || ServerError::Unauthorized("Invalid credentials".into());

    let account = {
        let store = state.store.lock().await;
        store.find_account(req.username.trim())?
    };
    let account = account.ok_or_else(invalid)?;
    let hash = match (&account.password_hash, account.principal.is_ephemeral) {
        (Some(hash), false) => hash,
        _ => return Err(invalid()),
    };
    if !verify_password(&req.password, hash) {
        debug!(name = %account.principal.display_name, "Wrong password");
        return Err(invalid());
    }

    let principal = account.principal;
    info!(principal = %principal.id, "Login");
    let token = state.tokens.issue(principal.id, state.config.token_ttl);
    Ok(Json(SessionResponse { token, principal }))
}

async fn guest(
    State(state): State<AppState>,
    Json(req): Json<GuestRequest>,
) -> Result<Json<SessionResponse>, ServerError> {
    let name = validate_username(&req.username)?;
    let principal = Principal::guest(format!("{GUEST_NAME_PREFIX}{name}"));
    create_account(&state.store, &Account::guest(principal.clone())).await?;

    info!(principal = %principal.id, name = %principal.display_name, "Guest joined");
    let token = state.tokens.issue(principal.id, state.config.guest_token_ttl);
    Ok(Json(SessionResponse { token, principal }))
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServerError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or("file").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;

        let (file, meta) = state.blob_store.store(&name, &content_type, &data).await?;
        info!(url = %file.url, size = meta.size, "File uploaded");

        return Ok(Json(UploadResponse {
            url: file.url,
            content_type: file.content_type,
            name: file.name,
            size: meta.size,
        }));
    }

    Err(ServerError::BadRequest("No file uploaded".to_string()))
}

async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let id: Uuid = id
        .parse()
        .map_err(|_| ServerError::NotFound(format!("upload {id}")))?;
    let (meta, data) = state.blob_store.get(id).await?;
    Ok(([(header::CONTENT_TYPE, meta.content_type)], data))
}

/// Trim and bound a requested display name.
fn validate_username(raw: &str) -> Result<String, ServerError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ServerError::BadRequest("Username is required".into()));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(ServerError::BadRequest(format!(
            "Username is longer than {MAX_DISPLAY_NAME_LEN} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(ServerError::BadRequest("Username contains control characters".into()));
    }
    Ok(name.to_string())
}

/// Insert the account and join it to `general`.
async fn create_account(store: &SharedStore, account: &Account) -> Result<(), ServerError> {
    let mut guard = store.lock().await;
    let store: &mut dyn Store = &mut **guard;
    let name = &account.principal.display_name;
    if store.find_account(name)?.is_some() {
        return Err(ServerError::BadRequest("Username already taken".into()));
    }
    store.create_principal(account)?;
    store.add_membership(&ChannelId::general(), account.principal.id)?;
    Ok(())
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

//! WebSocket transport.
//!
//! Each socket is authenticated at upgrade, then bridged to the router: a
//! writer task drains the connection's outbox into text frames while the
//! reader loop decodes client frames and forwards them as router events.
//! When the router drops the outbox the socket is closed.

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use parley_shared::protocol::ClientEvent;
use parley_shared::{ChatError, Principal};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::error::ServerError;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    token: Option<String>,
}

/// `GET /ws?token=...`
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let principal = match state.authenticator.authenticate(params.token.as_deref()).await {
        Ok(principal) => principal,
        Err(e) => {
            debug!(error = %e, "Rejected WebSocket upgrade");
            return ServerError::from(e).into_response();
        }
    };

    match ws {
        Ok(ws) => ws
            .on_upgrade(move |socket| handle_socket(socket, state, principal))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, principal: Principal) {
    let (mut sender, mut receiver) = socket.split();
    let (conn, mut outbox) = state.router.connect(principal.clone());
    info!(conn, principal = %principal.id, "WebSocket connected");

    let mut writer = tokio::spawn(async move {
        while let Some(event) = outbox.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(conn, error = %e, "Failed to encode event");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
        // The router dropped the outbox (refused or shut down).
        let _ = sender.send(Message::Close(None)).await;
    });

    let reader = async {
        while let Some(frame) = receiver.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!(conn, error = %e, "WebSocket read failed");
                    break;
                }
            };

            if !state.event_limiter.check(principal.id).await {
                state
                    .router
                    .reject(conn, ChatError::Validation("rate limit exceeded".into()));
                continue;
            }

            match ClientEvent::from_json(&text) {
                Ok(event) => state.router.inbound(conn, event),
                Err(e) => state
                    .router
                    .reject(conn, ChatError::Validation(format!("malformed event: {e}"))),
            }
        }
    };

    tokio::select! {
        _ = reader => {}
        _ = &mut writer => debug!(conn, "Outbox closed, ending session"),
    }

    state.router.disconnect(conn);
    writer.abort();
    info!(conn, principal = %principal.id, "WebSocket disconnected");
}

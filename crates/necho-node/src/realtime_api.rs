//! Real-time WebSocket API.
//!
//! - `/ws` - the messenger socket
//! - `/api/realtime/stats` - gateway statistics
//!
//! The bearer token is taken from the `Authorization` header or, for clients
//! that cannot set headers on an upgrade, from `?token=`. It is checked before
//! the upgrade: a bad credential gets a plain 401 and never a socket.
//!
//! ## Protocol
//!
//! ```json
//! // Client to server
//! {"command": "join-chat", "id": 1, "chatId": "c1"}
//! {"command": "send-message", "id": 2, "chatId": "c1", "content": "hi", "type": "text"}
//! {"command": "typing-start", "chatId": "c1"}
//! {"command": "ping"}
//!
//! // Server to client
//! {"type": "ack", "id": 1, "success": true}
//! {"type": "event", "event": "new-message", "data": {...}}
//! {"type": "pong"}
//! ```

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use necho_realtime::{run_connection, BroadcastGateway, ConnectionMetadata, Identity};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::{bearer_token, ApiError, AppState};

/// Close code sent when the gateway is full.
const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Create the real-time API routes.
pub fn realtime_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/realtime/stats", get(get_stats))
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Authenticate, then upgrade.
///
/// The upgrade extraction is checked only after the credential, so an
/// unauthenticated request always sees 401.
async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Response {
    let token = bearer_token(&headers).or(query.token.as_deref());
    let identity = match state.gateway.authenticate(token).await {
        Ok(identity) => identity,
        Err(e) => {
            debug!(error = %e, "WebSocket authentication failed");
            return ApiError::from(e).into_response();
        }
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let metadata = ConnectionMetadata {
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        ..ConnectionMetadata::now()
    };

    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, gateway, identity, metadata))
}

/// Pump one socket through the gateway until either side closes.
async fn handle_socket(
    mut socket: WebSocket,
    gateway: Arc<BroadcastGateway>,
    identity: Identity,
    metadata: ConnectionMetadata,
) {
    let user_id = identity.user_id.clone();
    let (connection, mut outbound) = match gateway.connect(identity, metadata).await {
        Ok(registered) => registered,
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Refusing WebSocket connection");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_TRY_AGAIN_LATER,
                    reason: e.to_string().into(),
                })))
                .await;
            return;
        }
    };

    let connection_id = connection.id.clone();
    info!(connection_id = %connection_id, user_id = %user_id, "WebSocket client connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Gateway to socket
    let send_task = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    // Socket to gateway, one frame at a time
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let commands = tokio::spawn(run_connection(gateway, connection, inbound_rx));

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if inbound_tx.send(text.to_string()).is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                debug!(connection_id = %connection_id, "WebSocket close received");
                break;
            }
            Ok(Message::Binary(_)) => {
                debug!(connection_id = %connection_id, "Binary message ignored");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(e) => {
                error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Ending the inbound stream makes run_connection disconnect
    drop(inbound_tx);
    if let Err(e) = commands.await {
        error!(connection_id = %connection_id, error = %e, "Command loop failed");
    }
    send_task.abort();
    info!(connection_id = %connection_id, "WebSocket client disconnected");
}

/// Get real-time connection statistics.
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.gateway.stats())
}

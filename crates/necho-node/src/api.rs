//! HTTP API for the Necho node.
//!
//! - `GET /health` - liveness
//! - `GET /api/messages/chat/{chat_id}?page=&limit=` - message history (bearer auth)
//! - `/ws`, `/api/realtime/stats` - see [`crate::realtime_api`]

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use necho_realtime::{BroadcastGateway, DomainService, GatewayError, MemoryStore};
use necho_types::{DomainError, HistoryPage};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;

use crate::realtime_api::realtime_routes;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The process-wide broadcaster.
    pub gateway: Arc<BroadcastGateway>,
    /// Users, chats, messages and tokens.
    pub store: Arc<MemoryStore>,
}

impl AppState {
    /// State whose gateway is backed by `store`.
    pub fn new(store: Arc<MemoryStore>, max_connections: usize) -> Self {
        let gateway = Arc::new(BroadcastGateway::with_store(
            store.clone(),
            necho_realtime::GatewayConfig { max_connections },
        ));
        Self { gateway, store }
    }
}

/// API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Gateway(GatewayError::Auth(_)) => StatusCode::UNAUTHORIZED,
            ApiError::Gateway(GatewayError::ConnectionLimit(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Gateway(e) => status_for(e.kind()),
            ApiError::Domain(e) => status_for(e.kind()),
        };

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

fn status_for(kind: necho_types::ErrorKind) -> StatusCode {
    use necho_types::ErrorKind;
    match kind {
        ErrorKind::Auth => StatusCode::UNAUTHORIZED,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Transport | ErrorKind::Timeout => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Extract a bearer token from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Creates the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/messages/chat/{chat_id}", get(chat_history))
        .merge(realtime_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// One page of a chat's messages, newest first.
async fn chat_history(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Query(page): Query<HistoryPage>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = state.gateway.authenticate(bearer_token(&headers)).await?;
    let messages = state
        .store
        .chat_messages(&chat_id, &identity.user_id, page.normalized())
        .await?;
    Ok(Json(messages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_error_status() {
        let auth = ApiError::Gateway(GatewayError::Auth("missing".into()));
        assert_eq!(auth.into_response().status(), StatusCode::UNAUTHORIZED);

        let denied = ApiError::Domain(DomainError::PermissionDenied("no".into()));
        assert_eq!(denied.into_response().status(), StatusCode::FORBIDDEN);
    }
}

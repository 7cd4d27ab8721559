//! Message Relay Service
//!
//! HTTP routes that store sealed MPC messages until their receiver polls for
//! them.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use msg_relay::{
    b64, ErrorResponse, MessageId, MessageResponse, MessageStore, PostMessageRequest,
    PostMessageResponse, RelayError,
};
use std::sync::Arc;
use tracing::debug;

/// Application state
struct AppState {
    store: MessageStore,
}

/// Relay failure mapped onto an HTTP status
struct ApiError(RelayError);

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::InvalidFormat(_) => StatusCode::BAD_REQUEST,
            RelayError::Conflict(_) => StatusCode::CONFLICT,
            RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Build the relay routes over `store`
pub fn router(store: MessageStore) -> Router {
    let state = Arc::new(AppState { store });
    Router::new()
        .route("/health", get(health))
        .route("/v1/msg", post(post_message))
        .route("/v1/msg/:session/:from/:to/:seq", get(get_message))
        .with_state(state)
}

/// Health check endpoint
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "msg-relay-svc",
        "version": env!("CARGO_PKG_VERSION"),
        "messages": state.store.len(),
    }))
}

/// Post a message to the relay
async fn post_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PostMessageRequest>,
) -> std::result::Result<Json<PostMessageResponse>, ApiError> {
    let payload = b64::decode(&req.payload)
        .map_err(|e| RelayError::InvalidFormat(format!("Invalid base64: {}", e)))?;

    let id = MessageId::new(&req.session_id, req.from, req.to, req.seq);
    let hash = state.store.put(id, payload)?;

    debug!(
        session_id = %req.session_id,
        from = req.from,
        to = req.to,
        seq = req.seq,
        "Message stored"
    );

    Ok(Json(PostMessageResponse { hash }))
}

/// Get a message from the relay
async fn get_message(
    State(state): State<Arc<AppState>>,
    Path((session, from, to, seq)): Path<(String, usize, usize, u64)>,
) -> std::result::Result<Json<MessageResponse>, ApiError> {
    let id = MessageId::new(&session, from, to, seq);
    id.validate()?;

    let response = match state.store.get(&id) {
        Ok(msg) => MessageResponse {
            found: true,
            payload: Some(b64::encode(&msg.payload)),
        },
        Err(RelayError::NotFound(_)) => MessageResponse {
            found: false,
            payload: None,
        },
        Err(e) => return Err(e.into()),
    };
    Ok(Json(response))
}

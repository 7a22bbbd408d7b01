//! HTTP API.
//!
//! - GET /api/health
//! - POST /api/chat
//! - POST /api/chat/stream (see [`crate::server::streaming`])
//!
//! Chat failures never change the HTTP status: the client always gets a 200
//! with an `error` payload so it only has one response shape to handle.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{info, warn};

use crate::config::Config;
use crate::server::error::ChatError;
use crate::server::middleware::{cors_layer, trace_layer};
use crate::server::models::{ChatRequest, ChatResponse, HealthResponse};
use crate::server::streaming::chat_stream;
use crate::upstream::accessor::UpstreamAccessor;

/// Application state shared across handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub upstream: UpstreamAccessor,
}

impl AppState {
    pub fn new(config: Arc<Config>, upstream: UpstreamAccessor) -> Self {
        Self { config, upstream }
    }
}

/// Build the axum router with all API routes, CORS and request logging.
pub fn build_router(state: Arc<AppState>) -> anyhow::Result<Router> {
    let cors = cors_layer(&state.config.server)?;

    Ok(Router::new()
        .route("/api/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/chat/stream", post(chat_stream))
        .layer(cors)
        .layer(trace_layer())
        .with_state(state))
}

/// Decode and validate a chat body. The `Content-Type` header is not
/// checked; only the bytes decide whether the body is well formed.
pub(crate) fn parse_request(
    body: Result<Bytes, BytesRejection>,
) -> Result<ChatRequest, ChatError> {
    let body = body.map_err(|rejection| {
        warn!(reason = %rejection.body_text(), "Failed to read chat request body");
        ChatError::InvalidFormat
    })?;
    let request: ChatRequest = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "Rejected chat request body");
        ChatError::InvalidFormat
    })?;
    request.validate()?;
    Ok(request)
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now(),
    })
}

async fn chat(
    State(state): State<Arc<AppState>>,
    body: Result<Bytes, BytesRejection>,
) -> Json<ChatResponse> {
    match complete_chat(&state, body).await {
        Ok(message) => Json(ChatResponse::message(message)),
        Err(e) => {
            warn!(error = %e, "Chat request failed");
            Json(ChatResponse::error(e.to_string()))
        }
    }
}

async fn complete_chat(
    state: &AppState,
    body: Result<Bytes, BytesRejection>,
) -> Result<String, ChatError> {
    let request = parse_request(body)?;
    let client = state.upstream.get()?;

    info!(
        model = request.model,
        chat_id = request.chat_id.as_deref().unwrap_or("-"),
        "Chat completion request"
    );

    let completion = client.complete(request.to_completion(&state.config)).await?;
    Ok(completion.content)
}

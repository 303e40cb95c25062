//! HTTP routes for the bot.
//!
//! - `GET /health`, `GET /ready`
//! - `POST /webhook/feishu` (event subscriptions)

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::feishu::{self, EventOutcome, FeishuChannel};
use crate::router::{Admission, EventRouter};
use crate::traits::ChannelError;

/// Largest webhook body accepted.
const MAX_BODY_BYTES: usize = 1024 * 1024;

// ============================================================================
// State
// ============================================================================

/// Shared state for the HTTP server.
pub struct AppState {
    pub feishu: Arc<FeishuChannel>,
    pub router: Arc<EventRouter>,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sessions: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WebhookResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    challenge: Option<String>,
}

impl WebhookResponse {
    fn ok() -> Self {
        Self {
            success: true,
            message: None,
            challenge: None,
        }
    }

    fn error(message: String) -> Self {
        Self {
            success: false,
            message: Some(message),
            challenge: None,
        }
    }
}

// ============================================================================
// Health Routes
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "feishubot",
        version: env!("CARGO_PKG_VERSION"),
        sessions: None,
    })
}

async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sessions = state.router.registry().len().await;
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ready",
            service: "feishubot",
            version: env!("CARGO_PKG_VERSION"),
            sessions: Some(sessions),
        }),
    )
}

// ============================================================================
// Feishu Webhook
// ============================================================================

async fn feishu_webhook(State(state): State<Arc<AppState>>, body: String) -> impl IntoResponse {
    match feishu::process_event_callback(&state.feishu, &body) {
        Ok(EventOutcome::Challenge(challenge)) => (
            StatusCode::OK,
            Json(WebhookResponse {
                success: true,
                message: None,
                challenge: Some(challenge),
            }),
        ),
        Ok(EventOutcome::Message(message)) => {
            if let Admission::Admitted(key) = state.router.dispatch(message).await {
                tracing::debug!(session_id = %key, "Feishu message dispatched");
            }
            (StatusCode::OK, Json(WebhookResponse::ok()))
        }
        Ok(EventOutcome::Ignored) => (StatusCode::OK, Json(WebhookResponse::ok())),
        Err(ChannelError::TokenMismatch) => {
            tracing::warn!("Feishu webhook rejected: verification token mismatch");
            (
                StatusCode::UNAUTHORIZED,
                Json(WebhookResponse::error(ChannelError::TokenMismatch.to_string())),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "Feishu webhook error");
            (StatusCode::BAD_REQUEST, Json(WebhookResponse::error(e.to_string())))
        }
    }
}

// ============================================================================
// Router Builder
// ============================================================================

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Platform webhooks
        .route("/webhook/feishu", post(feishu_webhook))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

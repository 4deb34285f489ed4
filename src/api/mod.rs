//! HTTP API for the paid-question service
//!
//! This module provides a RESTful API for:
//! - Submitting questions and receiving Lightning invoices
//! - Polling payment status
//! - Webhook callbacks from the payment provider
//! - Admin login and answer delivery

use crate::{rate_limit::RateLimiter, webhook::WebhookVerifier, App, QaError};
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

mod admin;
mod auth;
mod health;
mod questions;
mod webhook;

pub use admin::*;
pub use auth::*;
pub use health::*;
pub use questions::*;
pub use webhook::*;

/// API state shared across handlers
#[derive(Clone)]
pub struct ApiState {
    /// The application
    pub app: App,
    /// Webhook signature verifier
    pub verifier: WebhookVerifier,
    /// Per-IP rate limiter shared by all guarded actions
    pub limiter: Arc<RateLimiter>,
    /// Admin session store
    pub sessions: Arc<SessionStore>,
}

/// Build the API router
fn build_router(app: App) -> Router {
    let verifier = WebhookVerifier::new(&app.config.webhook);
    let sessions = Arc::new(SessionStore::new(app.config.admin.session_ttl_minutes));
    let state = ApiState {
        app,
        verifier,
        limiter: Arc::new(RateLimiter::new()),
        sessions,
    };

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Public question endpoints
        .route("/v1/questions", post(submit_question))
        .route("/v1/questions/:question_id/status", get(question_status))
        // Payment provider webhook
        .route("/v1/webhook/payments", post(handle_payment_webhook))
        // Admin endpoints
        .route("/v1/admin/login", post(admin_login))
        .route("/v1/admin/questions", get(list_admin_questions))
        .route("/v1/admin/questions/:question_id", get(get_admin_question))
        .route("/v1/admin/questions/:question_id/answer", post(answer_question))
        .route("/v1/admin/questions/:question_id/refund", post(refund_question))
        // Add state
        .with_state(state)
}

/// Start the HTTP API server
pub async fn serve(app: App) -> anyhow::Result<()> {
    serve_with_shutdown(app, tokio::sync::oneshot::channel().1).await
}

/// Start the HTTP API server with graceful shutdown
pub async fn serve_with_shutdown(
    app: App,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let config = app.config.clone();

    // Build the router
    let router = build_router(app);

    // Add CORS if enabled
    let router = if config.api.enable_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };

    // Parse bind address
    let addr: std::net::SocketAddr = config
        .api
        .bind_address
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address: {}", e))?;

    info!("Starting HTTP API server on {}", addr);

    // Start the server with graceful shutdown. ConnectInfo carries the peer
    // address the rate limiter keys on.
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.await;
        info!("Received shutdown signal, stopping API server...");
    })
    .await?;

    info!("API server stopped gracefully");
    Ok(())
}

/// Standard API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful
    pub success: bool,
    /// Response data (only present if success is true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error message (only present if success is false)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Convert QaError to HTTP status code
pub fn error_to_status_code(err: &QaError) -> StatusCode {
    match err {
        QaError::Validation(_) => StatusCode::BAD_REQUEST,
        QaError::StateConflict(_) => StatusCode::BAD_REQUEST,
        QaError::Auth(_) => StatusCode::UNAUTHORIZED,
        QaError::Webhook(_) => StatusCode::UNAUTHORIZED,
        QaError::CsrfMismatch => StatusCode::FORBIDDEN,
        QaError::NotFound(_) => StatusCode::NOT_FOUND,
        QaError::Provider(_) => StatusCode::BAD_GATEWAY,
        QaError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        QaError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Turn a lifecycle error into an error response
pub(crate) fn error_response(err: &QaError) -> Response {
    let status = error_to_status_code(err);
    // Internal detail stays in the logs
    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!("Internal error serving request: {}", err);
        "Internal server error".to_string()
    } else {
        err.to_string()
    };
    (status, Json(ApiResponse::<()>::error(message))).into_response()
}

/// Check a rate limit for `action`, keyed by client IP.
/// Returns the ready-made 429 response when the limit is exceeded.
pub(crate) fn check_rate_limit(
    state: &ApiState,
    action: &str,
    addr: SocketAddr,
    config: &crate::config::RateLimitConfig,
) -> Result<(), Response> {
    let key = format!("{}:{}", action, addr.ip());
    let decision = state.limiter.check(&key, config.limit, config.window_ms());

    if decision.allowed {
        return Ok(());
    }

    warn!(
        "Rate limit exceeded: action={}, ip={}, retry_after={}s",
        action,
        addr.ip(),
        decision.retry_after_secs
    );

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ApiResponse::<()>::error(format!(
            "Rate limit exceeded. Retry in {} seconds",
            decision.retry_after_secs
        ))),
    )
        .into_response();

    if let Ok(value) = HeaderValue::from_str(&decision.retry_after_secs.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }

    Err(response)
}

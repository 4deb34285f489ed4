//! Public question endpoints

use super::{check_rate_limit, error_response, ApiResponse, ApiState};
use crate::qa::NewQuestion;
use axum::{
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::net::SocketAddr;
use tracing::info;

/// Submit a new question
///
/// Validates the submission, creates a Lightning invoice with the payment
/// provider and stores the question in `submitted` state. The response
/// carries everything the browser needs to render the payment step.
pub async fn submit_question(
    State(state): State<ApiState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<NewQuestion>,
) -> Response {
    if let Err(denied) = check_rate_limit(
        &state,
        "submit",
        addr,
        &state.app.config.api.submit_rate_limit,
    ) {
        return denied;
    }

    info!(
        "Question submission from {} (tier={}, category={})",
        addr.ip(),
        request.tier,
        request.category
    );

    match state.app.qa.submit(request).await {
        Ok(receipt) => (StatusCode::CREATED, Json(ApiResponse::success(receipt))).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Poll payment status for a question
///
/// Read-only: polling never changes payment state, whatever the provider's
/// webhook may or may not have delivered in the meantime.
pub async fn question_status(
    State(state): State<ApiState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(question_id): Path<String>,
) -> Response {
    if let Err(denied) = check_rate_limit(
        &state,
        "status",
        addr,
        &state.app.config.api.status_rate_limit,
    ) {
        return denied;
    }

    match state.app.qa.payment_status(&question_id).await {
        Ok(view) => (StatusCode::OK, Json(ApiResponse::success(view))).into_response(),
        Err(e) => error_response(&e),
    }
}

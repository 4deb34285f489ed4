//! Admin endpoints
//!
//! Login issues an HttpOnly session cookie plus a CSRF token the client
//! echoes on every mutating request, either in the JSON body or in the
//! `X-CSRF-Token` header. Password and token comparisons are constant-time.

use super::{
    auth::constant_time_eq, check_rate_limit, error_response, ApiResponse, ApiState,
};
use crate::db::{QuestionQueries, QuestionStatus};
use crate::qa::AnswerInput;
use crate::QaError;
use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::{info, warn};

/// Session cookie name
const SESSION_COOKIE: &str = "admin_session";

/// CSRF token header for mutating admin requests
const CSRF_HEADER: &str = "X-CSRF-Token";

/// Admin login request
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Admin password
    pub password: String,
}

/// Admin login response. The session token itself travels only in the
/// Set-Cookie header.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    /// CSRF token to echo in `X-CSRF-Token` on mutating requests
    pub csrf_token: String,
    /// Session expiry
    pub expires_at: DateTime<Utc>,
}

/// Answer submission request
#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    /// Written answer
    pub response_text: Option<String>,
    /// Video answer URL
    pub response_video_url: Option<String>,
    /// Also publish to the public archive
    #[serde(default)]
    pub publish_to_archive: bool,
    /// CSRF token from login (alternatively sent as `X-CSRF-Token`)
    pub csrf_token: Option<String>,
}

/// Refund request
#[derive(Debug, Default, Deserialize)]
pub struct RefundRequest {
    /// CSRF token from login (alternatively sent as `X-CSRF-Token`)
    pub csrf_token: Option<String>,
}

/// Query parameters for the admin question list
#[derive(Debug, Deserialize)]
pub struct ListQuestionsParams {
    /// Lifecycle status to filter by
    #[serde(default = "default_list_status")]
    pub status: String,
}

fn default_list_status() -> String {
    QuestionStatus::Paid.as_str().to_string()
}

/// Admin login
///
/// Rate-limited like submission so the password cannot be brute-forced
/// from one address.
pub async fn admin_login(
    State(state): State<ApiState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<LoginRequest>,
) -> Response {
    if let Err(denied) = check_rate_limit(
        &state,
        "login",
        addr,
        &state.app.config.api.login_rate_limit,
    ) {
        return denied;
    }

    if !constant_time_eq(&request.password, &state.app.config.admin.password) {
        warn!("Failed admin login attempt from {}", addr.ip());
        return error_response(&QaError::Auth("Invalid credentials".to_string()));
    }

    let session = state.sessions.create();
    info!("Admin login from {}", addr.ip());

    let cookie = format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/v1/admin; Max-Age={}",
        SESSION_COOKIE,
        session.token,
        state.app.config.admin.session_ttl_minutes.max(1) * 60
    );

    let mut response = (
        StatusCode::OK,
        Json(ApiResponse::success(LoginResponse {
            csrf_token: session.csrf_token,
            expires_at: session.expires_at,
        })),
    )
        .into_response();

    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().insert(header::SET_COOKIE, value);
            response
        }
        Err(e) => {
            warn!("Failed to build session cookie: {}", e);
            error_response(&QaError::Config("Failed to issue session".to_string()))
        }
    }
}

/// List questions for the operator queue, filtered by status
pub async fn list_admin_questions(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(params): Query<ListQuestionsParams>,
) -> Response {
    if let Err(e) = state.sessions.authorize_read(session_token(&headers).as_deref()) {
        return error_response(&e);
    }

    let status: QuestionStatus = match params.status.parse() {
        Ok(status) => status,
        Err(e) => return error_response(&QaError::Validation(e)),
    };

    match QuestionQueries::new(&state.app.db)
        .list_by_status(status.as_str())
        .await
    {
        Ok(questions) => (StatusCode::OK, Json(ApiResponse::success(questions))).into_response(),
        Err(e) => error_response(&QaError::Database(e.to_string())),
    }
}

/// Fetch a single question, payment state included in the model
pub async fn get_admin_question(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(question_id): Path<String>,
) -> Response {
    if let Err(e) = state.sessions.authorize_read(session_token(&headers).as_deref()) {
        return error_response(&e);
    }

    match state.app.qa.get_question(&question_id).await {
        Ok(question) => (StatusCode::OK, Json(ApiResponse::success(question))).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Record an answer on a paid question and notify the submitter
pub async fn answer_question(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(question_id): Path<String>,
    Json(request): Json<AnswerRequest>,
) -> Response {
    if let Err(e) = authorize_mutation(&state, &headers, request.csrf_token.as_deref()) {
        return error_response(&e);
    }

    let input = AnswerInput {
        response_text: request.response_text,
        response_video_url: request.response_video_url,
        publish_to_archive: request.publish_to_archive,
        responded_by: state.app.config.admin.operator_name.clone(),
    };

    match state.app.qa.answer(&question_id, input).await {
        Ok(receipt) => (StatusCode::OK, Json(ApiResponse::success(receipt))).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Mark a paid question's payment refunded
pub async fn refund_question(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(question_id): Path<String>,
    Json(request): Json<RefundRequest>,
) -> Response {
    if let Err(e) = authorize_mutation(&state, &headers, request.csrf_token.as_deref()) {
        return error_response(&e);
    }

    match state.app.qa.refund(&question_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "question_id": question_id,
                "refunded": true,
            }))),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

fn authorize_mutation(
    state: &ApiState,
    headers: &HeaderMap,
    body_csrf: Option<&str>,
) -> Result<(), QaError> {
    let header_csrf = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok());
    state
        .sessions
        .authorize_write(session_token(headers).as_deref(), body_csrf.or(header_csrf))
}

/// Pull the session token out of the Cookie header
fn session_token(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|cookie| {
        let (name, value) = cookie.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

//! Payment provider webhook handler

use super::{error_response, ApiResponse, ApiState};
use crate::qa::ProviderEvent;
use crate::QaError;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

/// Signature header sent by the payment provider
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Webhook acknowledgement body
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    /// What the service did with the event
    pub outcome: crate::qa::WebhookOutcome,
}

/// Handle a payment webhook from the provider
///
/// Verification runs over the raw request bytes before any JSON decoding.
/// Once a delivery is authenticated it is always acknowledged with 200,
/// including duplicates and unknown invoices, so the provider stops
/// retrying; only authenticity failures and internal errors say otherwise.
pub async fn handle_payment_webhook(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    if let Err(e) = state
        .verifier
        .verify(&body, signature, Utc::now().timestamp())
    {
        warn!("Rejected webhook delivery: {}", e);
        return error_response(&QaError::Webhook(e));
    }

    let event: ProviderEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            // Authenticated but malformed; a provider bug, not an attack
            warn!("Webhook payload failed to parse: {}", e);
            return error_response(&QaError::Validation(format!(
                "Malformed webhook payload: {}",
                e
            )));
        }
    };

    info!(
        "Webhook received: type={}, invoice_id={}",
        event.event_type, event.invoice_id
    );

    let raw_payload = String::from_utf8_lossy(&body);
    match state
        .app
        .qa
        .handle_event(&event, signature.unwrap_or_default(), &raw_payload)
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(ApiResponse::success(WebhookAck { outcome })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

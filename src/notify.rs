//! Notification gateway
//!
//! Transactional email is owned by an external collaborator; this module
//! only carries the "send notification" capability. Every call site treats
//! delivery as fire-and-forget relative to state transitions: a failed send
//! is logged and surfaced to operators, never used to roll back a payment
//! or an answer.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::NotificationConfig;

/// Kinds of transactional notifications this service emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Invoice issued; submitter should pay
    PaymentRequested,
    /// Payment confirmed; question queued for an answer
    PaymentConfirmed,
    /// Answer delivered to the submitter
    AnswerReady,
    /// Internal alert to the answering team about a new paid question
    TeamNewPaidQuestion,
}

impl NotificationKind {
    /// Stable string form used on the wire and in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::PaymentRequested => "payment_requested",
            NotificationKind::PaymentConfirmed => "payment_confirmed",
            NotificationKind::AnswerReady => "answer_ready",
            NotificationKind::TeamNewPaidQuestion => "team_new_paid_question",
        }
    }
}

/// Notification delivery failure
#[derive(thiserror::Error, Debug)]
#[error("Notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Port to the email collaborator
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Deliver one notification
    async fn send(
        &self,
        kind: NotificationKind,
        recipient: &str,
        data: Value,
    ) -> Result<(), NotifyError>;
}

#[derive(Debug, Serialize)]
struct NotificationRequest<'a> {
    kind: &'a str,
    recipient: &'a str,
    data: Value,
}

/// Gateway that POSTs notifications to the configured email-service endpoint
#[derive(Debug, Clone)]
pub struct HttpNotificationGateway {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpNotificationGateway {
    /// Create a gateway for the given endpoint
    pub fn new(endpoint: String, config: &NotificationConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| NotifyError(format!("Failed to build client: {}", e)))?;
        Ok(Self { endpoint, client })
    }
}

#[async_trait]
impl NotificationGateway for HttpNotificationGateway {
    async fn send(
        &self,
        kind: NotificationKind,
        recipient: &str,
        data: Value,
    ) -> Result<(), NotifyError> {
        let body = NotificationRequest {
            kind: kind.as_str(),
            recipient,
            data,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(NotifyError(format!("{} - {}", status, text)));
        }

        info!("Sent {} notification to {}", kind.as_str(), recipient);
        Ok(())
    }
}

/// Gateway used when no endpoint is configured: logs and drops
#[derive(Debug, Clone, Default)]
pub struct NoopNotificationGateway;

#[async_trait]
impl NotificationGateway for NoopNotificationGateway {
    async fn send(
        &self,
        kind: NotificationKind,
        recipient: &str,
        _data: Value,
    ) -> Result<(), NotifyError> {
        warn!(
            "No notification endpoint configured; dropping {} notification for {}",
            kind.as_str(),
            recipient
        );
        Ok(())
    }
}

/// Build the gateway selected by configuration
pub fn gateway_from_config(
    config: &NotificationConfig,
) -> Result<std::sync::Arc<dyn NotificationGateway>, NotifyError> {
    match &config.endpoint {
        Some(endpoint) => Ok(std::sync::Arc::new(HttpNotificationGateway::new(
            endpoint.clone(),
            config,
        )?)),
        None => Ok(std::sync::Arc::new(NoopNotificationGateway)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings() {
        assert_eq!(NotificationKind::PaymentConfirmed.as_str(), "payment_confirmed");
        assert_eq!(NotificationKind::AnswerReady.as_str(), "answer_ready");
    }

    #[tokio::test]
    async fn test_noop_gateway_always_succeeds() {
        let gateway = NoopNotificationGateway;
        let result = gateway
            .send(
                NotificationKind::PaymentRequested,
                "alice@example.com",
                serde_json::json!({"amount_sats": 1000}),
            )
            .await;
        assert!(result.is_ok());
    }
}

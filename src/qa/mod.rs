//! Paid-question lifecycle
//!
//! This module implements the state machine at the heart of the service:
//!
//! - Submission: validate, issue an invoice, persist question + payment
//! - Webhook events: the single authoritative write path for payment truth
//! - Polling: strictly read-only payment status for the submitter's browser
//! - Operator actions: answer (and optionally publish) a paid question
//! - Expiry sweep: background cleanup of payments the provider never settled

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    config::Config,
    db::{Database, PaymentModel, PaymentQueries, PaymentStatus, QuestionModel, QuestionQueries, QuestionStatus},
    notify::{NotificationGateway, NotificationKind},
    provider::{InvoiceProvider, InvoiceState},
    QaError, QaResult,
};

/// Longest accepted question body, in characters
const MAX_QUESTION_CHARS: usize = 10_000;

/// A validated submission request
#[derive(Debug, Clone, Deserialize)]
pub struct NewQuestion {
    /// Submitter email
    pub email: String,
    /// Optional display name
    pub name: Option<String>,
    /// Question category
    pub category: String,
    /// Free-text question body
    pub question_text: String,
    /// Chosen pricing tier id
    pub tier: String,
}

/// What the submitter gets back: everything needed to pay
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReceipt {
    /// Question ID for status polling
    pub question_id: String,
    /// Provider invoice ID
    pub invoice_id: String,
    /// Hosted checkout URL
    pub invoice_url: String,
    /// Raw BOLT11 invoice
    pub raw_invoice: String,
    /// QR-code payload (lightning: URI, uppercased for dense QR encoding)
    pub qr_payload: String,
    /// Quoted amount in satoshis
    pub amount_sats: u64,
    /// Invoice expiry (unix seconds)
    pub expires_at: i64,
}

/// Payment event delivered by the provider webhook
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEvent {
    /// Event type, e.g. "invoice.paid" or "invoice.expired"
    #[serde(rename = "type")]
    pub event_type: String,
    /// Invoice the event refers to
    pub invoice_id: String,
    /// Settlement time (unix seconds), present on paid events
    pub paid_at: Option<i64>,
}

/// What the webhook handler did with an authenticated event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Payment transitioned pending -> paid
    Confirmed,
    /// Payment transitioned pending -> expired
    Expired,
    /// Event referred to a payment already in a terminal state
    Duplicate,
    /// No payment with that invoice id; acknowledged without state change
    UnknownInvoice,
    /// Recognized delivery with an event type this service does not act on
    Ignored,
}

/// Payment status exposed to the polling endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicPaymentStatus {
    /// Awaiting payment (covers a still-pending or refunded invoice)
    Unpaid,
    /// Paid; answer pending or delivered
    Paid,
    /// Invoice expired without payment
    Expired,
}

/// Read-only view returned to the submitter's browser
#[derive(Debug, Clone, Serialize)]
pub struct PaymentStatusView {
    /// Current payment status
    pub status: PublicPaymentStatus,
    /// Whether an answer has been delivered
    pub response_available: bool,
}

/// Operator answer input
#[derive(Debug, Clone)]
pub struct AnswerInput {
    /// Written answer
    pub response_text: Option<String>,
    /// Video answer URL
    pub response_video_url: Option<String>,
    /// Also publish to the public archive
    pub publish_to_archive: bool,
    /// Operator identity recorded on the answer
    pub responded_by: String,
}

/// Result of recording an answer
#[derive(Debug, Clone, Serialize)]
pub struct AnswerReceipt {
    /// Question ID
    pub question_id: String,
    /// Whether the delivery notification went out; the answer itself is
    /// saved either way
    pub notification_sent: bool,
}

/// Counters from one expiry sweep run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Payments examined
    pub checked: usize,
    /// Transitioned pending -> expired
    pub expired: usize,
    /// Found settled at the provider despite a missed webhook
    pub recovered_paid: usize,
    /// Left untouched because the provider could not be reached
    pub skipped: usize,
}

/// The lifecycle controller
pub struct QaService {
    config: Arc<Config>,
    db: Arc<Database>,
    provider: Arc<dyn InvoiceProvider>,
    notifier: Arc<dyn NotificationGateway>,
}

impl QaService {
    /// Create a new service
    pub fn new(
        config: Arc<Config>,
        db: Arc<Database>,
        provider: Arc<dyn InvoiceProvider>,
        notifier: Arc<dyn NotificationGateway>,
    ) -> Self {
        Self {
            config,
            db,
            provider,
            notifier,
        }
    }

    /// Submit a question: validate, create the invoice, persist question and
    /// payment atomically, then send a best-effort "payment requested"
    /// notification. A provider failure aborts the whole submission; nothing
    /// is persisted without an invoice.
    pub async fn submit(&self, request: NewQuestion) -> QaResult<SubmissionReceipt> {
        let question_text = request.question_text.trim();
        if question_text.is_empty() {
            return Err(QaError::Validation("Question text must not be empty".to_string()));
        }
        if question_text.chars().count() > MAX_QUESTION_CHARS {
            return Err(QaError::Validation(format!(
                "Question text exceeds {} characters",
                MAX_QUESTION_CHARS
            )));
        }
        if request.category.trim().is_empty() {
            return Err(QaError::Validation("Category must not be empty".to_string()));
        }

        let email = request.email.trim();
        if !is_plausible_email(email) {
            return Err(QaError::Validation(format!("Invalid email address: {}", email)));
        }

        let tier = self
            .config
            .tier(request.tier.trim())
            .ok_or_else(|| QaError::Validation(format!("Unknown tier: {}", request.tier)))?;
        let amount_sats = tier.price_sats;

        let description = format!("Bitcoin question ({} tier)", tier.id);
        let invoice = self
            .provider
            .create_invoice(amount_sats, &description, &self.config.webhook_callback_url())
            .await?;

        let now = Utc::now();
        let question = QuestionModel {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            name: request.name.as_deref().map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            category: request.category.trim().to_string(),
            question_text: question_text.to_string(),
            tier: tier.id.clone(),
            amount_sats: amount_sats as i64,
            status: QuestionStatus::Submitted.as_str().to_string(),
            response_text: None,
            response_video_url: None,
            responded_by: None,
            responded_at: None,
            published: false,
            published_at: None,
            created_at: now,
            updated_at: now,
        };

        let payment = PaymentModel {
            id: uuid::Uuid::new_v4().to_string(),
            question_id: question.id.clone(),
            invoice_id: invoice.id.clone(),
            invoice_url: invoice.url.clone(),
            raw_invoice: invoice.raw.clone(),
            amount_sats: amount_sats as i64,
            amount_btc: invoice.amount_btc.clone(),
            status: PaymentStatus::Pending.as_str().to_string(),
            paid_at: None,
            expires_at: invoice.expires_at,
            webhook_received: false,
            last_webhook_signature: None,
            last_webhook_payload: None,
            created_at: now,
            updated_at: now,
        };

        QuestionQueries::new(&self.db)
            .insert_with_payment(&question, &payment)
            .await
            .map_err(|e| QaError::Database(format!("Failed to persist submission: {}", e)))?;

        info!(
            "Question {} submitted by {} (tier={}, amount={} sats, invoice={})",
            question.id, question.email, question.tier, amount_sats, invoice.id
        );

        let receipt = SubmissionReceipt {
            question_id: question.id,
            invoice_id: invoice.id,
            invoice_url: invoice.url,
            qr_payload: format!("lightning:{}", invoice.raw.to_uppercase()),
            raw_invoice: invoice.raw,
            amount_sats,
            expires_at: invoice.expires_at.timestamp(),
        };

        // Best-effort: the invoice and question already exist, a failed email
        // must not undo them
        if let Err(e) = self
            .notifier
            .send(
                NotificationKind::PaymentRequested,
                &question.email,
                json!({
                    "question_id": receipt.question_id.clone(),
                    "amount_sats": amount_sats,
                    "invoice_url": receipt.invoice_url.clone(),
                    "expires_at": receipt.expires_at,
                }),
            )
            .await
        {
            warn!(
                "Payment-requested notification failed for {}: {}",
                receipt.question_id, e
            );
        }

        Ok(receipt)
    }

    /// Apply an authenticated provider event. Idempotent: replaying a
    /// delivery never repeats a transition or a notification, and it never
    /// moves a terminal payment back to pending.
    pub async fn handle_event(
        &self,
        event: &ProviderEvent,
        signature: &str,
        raw_payload: &str,
    ) -> QaResult<WebhookOutcome> {
        let payments = PaymentQueries::new(&self.db);

        let payment = match payments
            .get_by_invoice_id(&event.invoice_id)
            .await
            .map_err(|e| QaError::Database(e.to_string()))?
        {
            Some(payment) => payment,
            None => {
                // Provider/application desync, not an attack: acknowledge so
                // the provider stops retrying, change nothing.
                warn!(
                    "Webhook for unknown invoice {} (event={})",
                    event.invoice_id, event.event_type
                );
                return Ok(WebhookOutcome::UnknownInvoice);
            }
        };

        payments
            .record_webhook(&event.invoice_id, signature, raw_payload)
            .await
            .map_err(|e| QaError::Database(e.to_string()))?;

        match event.event_type.as_str() {
            "invoice.paid" => self.confirm_payment(&payment, event.paid_at).await,
            "invoice.expired" | "invoice.failed" => {
                let changed = payments
                    .mark_expired_if_pending(&event.invoice_id)
                    .await
                    .map_err(|e| QaError::Database(e.to_string()))?;
                if changed {
                    // Question stays `submitted`; the row survives for audit
                    info!(
                        "Invoice {} expired without payment (question {})",
                        event.invoice_id, payment.question_id
                    );
                    Ok(WebhookOutcome::Expired)
                } else {
                    Ok(WebhookOutcome::Duplicate)
                }
            }
            other => {
                info!("Ignoring unrecognized webhook event type: {}", other);
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    /// Transition a payment pending -> paid and fan out notifications.
    /// Shared by the webhook path and the sweep's missed-webhook recovery.
    async fn confirm_payment(
        &self,
        payment: &PaymentModel,
        paid_at_unix: Option<i64>,
    ) -> QaResult<WebhookOutcome> {
        let payments = PaymentQueries::new(&self.db);
        let questions = QuestionQueries::new(&self.db);

        let paid_at = paid_at_unix
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(Utc::now);

        let changed = payments
            .mark_paid_if_pending(&payment.invoice_id, paid_at)
            .await
            .map_err(|e| QaError::Database(e.to_string()))?;

        if !changed {
            info!(
                "Duplicate payment confirmation for invoice {} ignored",
                payment.invoice_id
            );
            return Ok(WebhookOutcome::Duplicate);
        }

        questions
            .transition_status(
                &payment.question_id,
                QuestionStatus::Submitted.as_str(),
                QuestionStatus::Paid.as_str(),
            )
            .await
            .map_err(|e| QaError::Database(e.to_string()))?;

        info!(
            "Payment confirmed for question {} (invoice {}, {} sats)",
            payment.question_id, payment.invoice_id, payment.amount_sats
        );

        let question = questions
            .get_by_id(&payment.question_id)
            .await
            .map_err(|e| QaError::Database(e.to_string()))?;

        if let Some(question) = question {
            let data = json!({
                "question_id": question.id.clone(),
                "category": question.category.clone(),
                "tier": question.tier.clone(),
                "amount_sats": question.amount_sats,
            });

            if let Err(e) = self
                .notifier
                .send(NotificationKind::PaymentConfirmed, &question.email, data.clone())
                .await
            {
                warn!("Payment-confirmed notification failed for {}: {}", question.id, e);
            }
            if let Err(e) = self
                .notifier
                .send(
                    NotificationKind::TeamNewPaidQuestion,
                    &self.config.notifications.team_recipient,
                    data,
                )
                .await
            {
                warn!("Team notification failed for {}: {}", question.id, e);
            }
        }

        Ok(WebhookOutcome::Confirmed)
    }

    /// Read-only payment status for the polling endpoint. Never mutates:
    /// all payment truth is written by the webhook path (or the sweep).
    pub async fn payment_status(&self, question_id: &str) -> QaResult<PaymentStatusView> {
        let question = QuestionQueries::new(&self.db)
            .get_by_id(question_id)
            .await
            .map_err(|e| QaError::Database(e.to_string()))?
            .ok_or_else(|| QaError::NotFound(format!("Question {} not found", question_id)))?;

        let payment = PaymentQueries::new(&self.db)
            .get_by_question_id(question_id)
            .await
            .map_err(|e| QaError::Database(e.to_string()))?
            .ok_or_else(|| QaError::Database(format!("Question {} has no payment", question_id)))?;

        let payment_status = payment
            .payment_status()
            .map_err(QaError::Database)?;

        let status = match payment_status {
            PaymentStatus::Paid => PublicPaymentStatus::Paid,
            PaymentStatus::Expired => PublicPaymentStatus::Expired,
            PaymentStatus::Pending | PaymentStatus::Refunded => PublicPaymentStatus::Unpaid,
        };

        let response_available =
            question.question_status().map_err(QaError::Database)? == QuestionStatus::Answered;

        Ok(PaymentStatusView {
            status,
            response_available,
        })
    }

    /// Load a question for the operator view
    pub async fn get_question(&self, question_id: &str) -> QaResult<QuestionModel> {
        QuestionQueries::new(&self.db)
            .get_by_id(question_id)
            .await
            .map_err(|e| QaError::Database(e.to_string()))?
            .ok_or_else(|| QaError::NotFound(format!("Question {} not found", question_id)))
    }

    /// Record an operator's answer on a paid question. The paid-only
    /// precondition is enforced by the row update itself, so a racing
    /// duplicate submit cannot answer twice or corrupt `responded_at`.
    pub async fn answer(&self, question_id: &str, input: AnswerInput) -> QaResult<AnswerReceipt> {
        let text = input
            .response_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let video = input
            .response_video_url
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty());

        if text.is_none() && video.is_none() {
            return Err(QaError::Validation(
                "An answer requires response text or a video URL".to_string(),
            ));
        }

        let questions = QuestionQueries::new(&self.db);
        let question = questions
            .get_by_id(question_id)
            .await
            .map_err(|e| QaError::Database(e.to_string()))?
            .ok_or_else(|| QaError::NotFound(format!("Question {} not found", question_id)))?;

        let responded_at = Utc::now();
        let changed = questions
            .set_answer(
                question_id,
                text,
                video,
                &input.responded_by,
                responded_at,
                input.publish_to_archive,
            )
            .await
            .map_err(|e| QaError::Database(e.to_string()))?;

        if !changed {
            // Re-read for an error message that names the actual state
            let current = questions
                .get_by_id(question_id)
                .await
                .map_err(|e| QaError::Database(e.to_string()))?
                .map(|q| q.status)
                .unwrap_or_else(|| question.status.clone());
            return Err(QaError::StateConflict(format!(
                "Question {} cannot be answered in status '{}' (must be 'paid')",
                question_id, current
            )));
        }

        info!(
            "Question {} answered by {} (published={})",
            question_id, input.responded_by, input.publish_to_archive
        );

        // The answer is saved; a failed delivery email is reported to the
        // operator, not rolled back
        let notification_sent = match self
            .notifier
            .send(
                NotificationKind::AnswerReady,
                &question.email,
                json!({
                    "question_id": question_id,
                    "has_text": text.is_some(),
                    "has_video": video.is_some(),
                }),
            )
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!("Answer-ready notification failed for {}: {}", question_id, e);
                false
            }
        };

        Ok(AnswerReceipt {
            question_id: question_id.to_string(),
            notification_sent,
        })
    }

    /// Refund a paid question's payment. Audited manual override; the
    /// question row itself is never deleted.
    pub async fn refund(&self, question_id: &str) -> QaResult<()> {
        // 404 before state conflict, so unknown ids are distinguishable
        self.get_question(question_id).await?;

        let changed = PaymentQueries::new(&self.db)
            .mark_refunded_if_paid(question_id)
            .await
            .map_err(|e| QaError::Database(e.to_string()))?;

        if !changed {
            return Err(QaError::StateConflict(format!(
                "Payment for question {} is not in 'paid' state",
                question_id
            )));
        }

        info!("Payment for question {} refunded", question_id);
        Ok(())
    }

    /// Expire payments whose invoice window elapsed without a webhook.
    /// Before expiring, the provider is asked once per invoice: a settled
    /// invoice whose webhook never arrived is recovered as paid instead.
    /// Every transition is the same pending-only compare-and-swap the
    /// webhook path uses, so racing deliveries are safe.
    pub async fn expire_stale_payments(&self) -> QaResult<SweepSummary> {
        let payments = PaymentQueries::new(&self.db);
        let stale = payments
            .list_pending_expired(Utc::now())
            .await
            .map_err(|e| QaError::Database(e.to_string()))?;

        if stale.is_empty() {
            return Ok(SweepSummary::default());
        }

        let mut summary = SweepSummary {
            checked: stale.len(),
            ..Default::default()
        };

        for payment in stale {
            match self.provider.invoice_status(&payment.invoice_id).await {
                Ok(status) if status.state == InvoiceState::Paid => {
                    warn!(
                        "Invoice {} settled at the provider but no webhook arrived; recovering",
                        payment.invoice_id
                    );
                    let paid_at = status.paid_at.map(|t| t.timestamp());
                    if self.confirm_payment(&payment, paid_at).await? == WebhookOutcome::Confirmed {
                        summary.recovered_paid += 1;
                    }
                }
                Ok(_) => {
                    if payments
                        .mark_expired_if_pending(&payment.invoice_id)
                        .await
                        .map_err(|e| QaError::Database(e.to_string()))?
                    {
                        summary.expired += 1;
                    }
                }
                Err(e) => {
                    // Leave it pending; the next sweep retries
                    warn!(
                        "Provider unreachable while sweeping invoice {}: {}",
                        payment.invoice_id, e
                    );
                    summary.skipped += 1;
                }
            }
        }

        info!(
            "Expiry sweep completed: {} checked, {} expired, {} recovered paid, {} skipped",
            summary.checked, summary.expired, summary.recovered_paid, summary.skipped
        );
        Ok(summary)
    }

    /// Interval between expiry sweeps
    pub fn sweep_interval(&self) -> std::time::Duration {
        // Half the invoice expiry, clamped to [60s, 15min]
        let secs = (self.config.provider.invoice_expiry_secs / 2).clamp(60, 900);
        std::time::Duration::from_secs(secs)
    }
}

/// Cheap structural email check. Deliverability is proven by the
/// notification path, not guessed here.
fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyError;
    use crate::provider::{Invoice, InvoiceStatus, ProviderError};
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Mutex;

    /// Provider fake: hands out deterministic invoices, optionally fails
    struct FakeProvider {
        fail_create: bool,
        status: Mutex<Option<InvoiceStatus>>,
        counter: Mutex<u32>,
    }

    impl FakeProvider {
        fn new() -> Self {
            Self {
                fail_create: false,
                status: Mutex::new(None),
                counter: Mutex::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail_create: true,
                status: Mutex::new(None),
                counter: Mutex::new(0),
            }
        }

        fn set_status(&self, status: InvoiceStatus) {
            *self.status.lock().unwrap() = Some(status);
        }
    }

    #[async_trait]
    impl InvoiceProvider for FakeProvider {
        async fn create_invoice(
            &self,
            amount_sats: u64,
            _description: &str,
            _callback_url: &str,
        ) -> Result<Invoice, ProviderError> {
            if self.fail_create {
                return Err(ProviderError::Unavailable("connection refused".to_string()));
            }
            let mut counter = self.counter.lock().unwrap();
            *counter += 1;
            let id = format!("inv{}", counter);
            Ok(Invoice {
                url: format!("https://pay.example/{}", id),
                raw: format!("lnbc_{}", id),
                id,
                amount_sats,
                amount_btc: crate::provider::sats_to_btc(amount_sats),
                expires_at: Utc::now() + Duration::hours(1),
            })
        }

        async fn invoice_status(&self, _invoice_id: &str) -> Result<InvoiceStatus, ProviderError> {
            self.status
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| ProviderError::Unavailable("no status configured".to_string()))
        }
    }

    /// Gateway fake: records every send, optionally fails
    #[derive(Default)]
    struct RecordingGateway {
        sent: Mutex<Vec<(NotificationKind, String)>>,
        fail: bool,
    }

    impl RecordingGateway {
        fn sent(&self) -> Vec<(NotificationKind, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationGateway for RecordingGateway {
        async fn send(
            &self,
            kind: NotificationKind,
            recipient: &str,
            _data: serde_json::Value,
        ) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push((kind, recipient.to_string()));
            if self.fail {
                Err(NotifyError("smtp down".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct Harness {
        service: QaService,
        db: Arc<Database>,
        provider: Arc<FakeProvider>,
        gateway: Arc<RecordingGateway>,
    }

    async fn harness_with(provider: FakeProvider, gateway: RecordingGateway) -> Harness {
        let mut config = Config::default();
        config.webhook.secret = Some("whsec_test".to_string());
        config.admin.password = "hunter2".to_string();
        let config = Arc::new(config);

        let db = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
        let provider = Arc::new(provider);
        let gateway = Arc::new(gateway);
        let service = QaService::new(
            config,
            db.clone(),
            provider.clone(),
            gateway.clone(),
        );
        Harness {
            service,
            db,
            provider,
            gateway,
        }
    }

    async fn harness() -> Harness {
        harness_with(FakeProvider::new(), RecordingGateway::default()).await
    }

    fn quick_question() -> NewQuestion {
        NewQuestion {
            email: "alice@example.com".to_string(),
            name: Some("Alice".to_string()),
            category: "lightning".to_string(),
            question_text: "How do HTLCs time out?".to_string(),
            tier: "quick".to_string(),
        }
    }

    fn paid_event(invoice_id: &str) -> ProviderEvent {
        ProviderEvent {
            event_type: "invoice.paid".to_string(),
            invoice_id: invoice_id.to_string(),
            paid_at: Some(Utc::now().timestamp()),
        }
    }

    #[tokio::test]
    async fn test_submit_quotes_tier_price() {
        let h = harness().await;
        let receipt = h.service.submit(quick_question()).await.unwrap();

        assert_eq!(receipt.amount_sats, 1_000);
        assert!(receipt.qr_payload.starts_with("lightning:LNBC_"));

        let question = h.service.get_question(&receipt.question_id).await.unwrap();
        assert_eq!(question.amount_sats, 1_000);
        assert_eq!(question.status, "submitted");

        // Payment-requested notification fired
        assert_eq!(
            h.gateway.sent(),
            vec![(NotificationKind::PaymentRequested, "alice@example.com".to_string())]
        );
    }

    #[tokio::test]
    async fn test_submit_validation_rejects_before_invoice() {
        let h = harness().await;

        let mut request = quick_question();
        request.question_text = "   ".to_string();
        assert!(matches!(
            h.service.submit(request).await,
            Err(QaError::Validation(_))
        ));

        let mut request = quick_question();
        request.email = "not-an-email".to_string();
        assert!(matches!(
            h.service.submit(request).await,
            Err(QaError::Validation(_))
        ));

        let mut request = quick_question();
        request.tier = "platinum".to_string();
        assert!(matches!(
            h.service.submit(request).await,
            Err(QaError::Validation(_))
        ));

        // No invoice was created and nothing was persisted
        assert_eq!(*h.provider.counter.lock().unwrap(), 0);
        assert!(h.gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_persists_nothing() {
        let h = harness_with(FakeProvider::failing(), RecordingGateway::default()).await;

        let result = h.service.submit(quick_question()).await;
        assert!(matches!(result, Err(QaError::Provider(_))));

        // No orphan question rows
        let questions = QuestionQueries::new(&h.db)
            .list_by_status("submitted")
            .await
            .unwrap();
        assert!(questions.is_empty());
        assert!(h.gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_roll_back_submission() {
        let gateway = RecordingGateway {
            fail: true,
            ..Default::default()
        };
        let h = harness_with(FakeProvider::new(), gateway).await;

        let receipt = h.service.submit(quick_question()).await.unwrap();
        assert!(h.service.get_question(&receipt.question_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_paid_webhook_confirms_and_notifies() {
        let h = harness().await;
        let receipt = h.service.submit(quick_question()).await.unwrap();

        let outcome = h
            .service
            .handle_event(&paid_event(&receipt.invoice_id), "t=1,v1=aa", "{}")
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Confirmed);

        let view = h.service.payment_status(&receipt.question_id).await.unwrap();
        assert_eq!(view.status, PublicPaymentStatus::Paid);
        assert!(!view.response_available);

        let kinds: Vec<_> = h.gateway.sent().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            kinds,
            vec![
                NotificationKind::PaymentRequested,
                NotificationKind::PaymentConfirmed,
                NotificationKind::TeamNewPaidQuestion,
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_webhook_is_idempotent() {
        let h = harness().await;
        let receipt = h.service.submit(quick_question()).await.unwrap();
        let event = paid_event(&receipt.invoice_id);

        let first = h.service.handle_event(&event, "t=1,v1=aa", "{}").await.unwrap();
        let sent_after_first = h.gateway.sent().len();
        let second = h.service.handle_event(&event, "t=1,v1=aa", "{}").await.unwrap();

        assert_eq!(first, WebhookOutcome::Confirmed);
        assert_eq!(second, WebhookOutcome::Duplicate);
        // No re-sent notifications
        assert_eq!(h.gateway.sent().len(), sent_after_first);

        // And an expiry event cannot drag it back
        let expire = ProviderEvent {
            event_type: "invoice.expired".to_string(),
            invoice_id: receipt.invoice_id.clone(),
            paid_at: None,
        };
        assert_eq!(
            h.service.handle_event(&expire, "t=2,v1=bb", "{}").await.unwrap(),
            WebhookOutcome::Duplicate
        );
        let view = h.service.payment_status(&receipt.question_id).await.unwrap();
        assert_eq!(view.status, PublicPaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_unknown_invoice_acknowledged_without_state() {
        let h = harness().await;
        let outcome = h
            .service
            .handle_event(&paid_event("inv-nobody-sold"), "t=1,v1=aa", "{}")
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::UnknownInvoice);
    }

    #[tokio::test]
    async fn test_unrecognized_event_type_ignored() {
        let h = harness().await;
        let receipt = h.service.submit(quick_question()).await.unwrap();
        let event = ProviderEvent {
            event_type: "invoice.underpaid".to_string(),
            invoice_id: receipt.invoice_id,
            paid_at: None,
        };
        assert_eq!(
            h.service.handle_event(&event, "t=1,v1=aa", "{}").await.unwrap(),
            WebhookOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn test_expired_webhook_leaves_question_submitted() {
        let h = harness().await;
        let receipt = h.service.submit(quick_question()).await.unwrap();
        let event = ProviderEvent {
            event_type: "invoice.expired".to_string(),
            invoice_id: receipt.invoice_id,
            paid_at: None,
        };

        assert_eq!(
            h.service.handle_event(&event, "t=1,v1=aa", "{}").await.unwrap(),
            WebhookOutcome::Expired
        );

        let view = h.service.payment_status(&receipt.question_id).await.unwrap();
        assert_eq!(view.status, PublicPaymentStatus::Expired);
        // Audit trail survives
        let question = h.service.get_question(&receipt.question_id).await.unwrap();
        assert_eq!(question.status, "submitted");
    }

    #[tokio::test]
    async fn test_answer_requires_paid() {
        let h = harness().await;
        let receipt = h.service.submit(quick_question()).await.unwrap();

        let input = AnswerInput {
            response_text: Some("HTLCs time out when...".to_string()),
            response_video_url: None,
            publish_to_archive: false,
            responded_by: "admin".to_string(),
        };
        assert!(matches!(
            h.service.answer(&receipt.question_id, input).await,
            Err(QaError::StateConflict(_))
        ));
    }

    #[tokio::test]
    async fn test_answer_requires_content() {
        let h = harness().await;
        let receipt = h.service.submit(quick_question()).await.unwrap();
        h.service
            .handle_event(&paid_event(&receipt.invoice_id), "t=1,v1=aa", "{}")
            .await
            .unwrap();

        let input = AnswerInput {
            response_text: Some("   ".to_string()),
            response_video_url: None,
            publish_to_archive: false,
            responded_by: "admin".to_string(),
        };
        assert!(matches!(
            h.service.answer(&receipt.question_id, input).await,
            Err(QaError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let h = harness().await;

        let receipt = h.service.submit(quick_question()).await.unwrap();
        assert_eq!(receipt.amount_sats, 1_000);

        h.service
            .handle_event(&paid_event(&receipt.invoice_id), "t=1,v1=aa", "{}")
            .await
            .unwrap();
        assert_eq!(
            h.service.payment_status(&receipt.question_id).await.unwrap().status,
            PublicPaymentStatus::Paid
        );

        let input = AnswerInput {
            response_text: Some("They time out via the CLTV expiry.".to_string()),
            response_video_url: None,
            publish_to_archive: true,
            responded_by: "admin".to_string(),
        };
        let answer = h.service.answer(&receipt.question_id, input).await.unwrap();
        assert!(answer.notification_sent);

        let question = h.service.get_question(&receipt.question_id).await.unwrap();
        assert_eq!(question.status, "answered");
        assert_eq!(
            question.response_text.as_deref(),
            Some("They time out via the CLTV expiry.")
        );
        assert!(question.published);

        let view = h.service.payment_status(&receipt.question_id).await.unwrap();
        assert_eq!(view.status, PublicPaymentStatus::Paid);
        assert!(view.response_available);

        // Answering again is rejected and responded_at is untouched
        let first_responded_at = question.responded_at.unwrap();
        let again = AnswerInput {
            response_text: Some("Different answer".to_string()),
            response_video_url: None,
            publish_to_archive: false,
            responded_by: "admin".to_string(),
        };
        assert!(matches!(
            h.service.answer(&receipt.question_id, again).await,
            Err(QaError::StateConflict(_))
        ));
        let question = h.service.get_question(&receipt.question_id).await.unwrap();
        assert_eq!(question.responded_at.unwrap(), first_responded_at);
    }

    #[tokio::test]
    async fn test_answer_notification_failure_reported_not_rolled_back() {
        let gateway = RecordingGateway {
            fail: true,
            ..Default::default()
        };
        let h = harness_with(FakeProvider::new(), gateway).await;
        let receipt = h.service.submit(quick_question()).await.unwrap();
        h.service
            .handle_event(&paid_event(&receipt.invoice_id), "t=1,v1=aa", "{}")
            .await
            .unwrap();

        let input = AnswerInput {
            response_text: Some("answer".to_string()),
            response_video_url: None,
            publish_to_archive: false,
            responded_by: "admin".to_string(),
        };
        let answer = h.service.answer(&receipt.question_id, input).await.unwrap();
        assert!(!answer.notification_sent);
        // The transition stands
        let question = h.service.get_question(&receipt.question_id).await.unwrap();
        assert_eq!(question.status, "answered");
    }

    #[tokio::test]
    async fn test_refund_requires_paid() {
        let h = harness().await;
        let receipt = h.service.submit(quick_question()).await.unwrap();

        assert!(matches!(
            h.service.refund(&receipt.question_id).await,
            Err(QaError::StateConflict(_))
        ));
        assert!(matches!(
            h.service.refund("missing").await,
            Err(QaError::NotFound(_))
        ));

        h.service
            .handle_event(&paid_event(&receipt.invoice_id), "t=1,v1=aa", "{}")
            .await
            .unwrap();
        h.service.refund(&receipt.question_id).await.unwrap();

        // Refunded reads back as unpaid, not expired
        let view = h.service.payment_status(&receipt.question_id).await.unwrap();
        assert_eq!(view.status, PublicPaymentStatus::Unpaid);
    }

    #[tokio::test]
    async fn test_sweep_expires_and_recovers() {
        let h = harness().await;
        let receipt = h.service.submit(quick_question()).await.unwrap();

        // Backdate the invoice expiry
        {
            let conn = h.db.conn();
            let conn = conn.lock().await;
            conn.execute(
                "UPDATE payments SET expires_at = ?1 WHERE invoice_id = ?2",
                rusqlite::params![Utc::now() - Duration::minutes(10), receipt.invoice_id],
            )
            .unwrap();
        }

        // Provider unreachable: payment left pending for the next round
        let summary = h.service.expire_stale_payments().await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(
            h.service.payment_status(&receipt.question_id).await.unwrap().status,
            PublicPaymentStatus::Unpaid
        );

        // Provider reports it was actually settled: recovered as paid
        h.provider.set_status(InvoiceStatus {
            state: InvoiceState::Paid,
            paid_at: Some(Utc::now()),
        });
        let summary = h.service.expire_stale_payments().await.unwrap();
        assert_eq!(summary.recovered_paid, 1);
        assert_eq!(
            h.service.payment_status(&receipt.question_id).await.unwrap().status,
            PublicPaymentStatus::Paid
        );

        // A second question that genuinely expired
        let receipt2 = h.service.submit(quick_question()).await.unwrap();
        {
            let conn = h.db.conn();
            let conn = conn.lock().await;
            conn.execute(
                "UPDATE payments SET expires_at = ?1 WHERE invoice_id = ?2",
                rusqlite::params![Utc::now() - Duration::minutes(10), receipt2.invoice_id],
            )
            .unwrap();
        }
        h.provider.set_status(InvoiceStatus {
            state: InvoiceState::Expired,
            paid_at: None,
        });
        let summary = h.service.expire_stale_payments().await.unwrap();
        assert_eq!(summary.expired, 1);
        assert_eq!(
            h.service.payment_status(&receipt2.question_id).await.unwrap().status,
            PublicPaymentStatus::Expired
        );
    }

    #[test]
    fn test_is_plausible_email() {
        assert!(is_plausible_email("alice@example.com"));
        assert!(is_plausible_email("a.b+c@sub.example.co"));
        assert!(!is_plausible_email("alice"));
        assert!(!is_plausible_email("@example.com"));
        assert!(!is_plausible_email("alice@"));
        assert!(!is_plausible_email("alice@nodot"));
        assert!(!is_plausible_email("alice @example.com"));
    }
}

//! Payment provider client
//!
//! Creates and queries Lightning invoices against the external payment
//! provider's REST API. The client owns nothing but the outbound call: it
//! never persists, and it never retries — the caller decides whether a
//! failure aborts the user-facing request.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::ProviderConfig;

/// Satoshis per bitcoin
pub const SATS_PER_BTC: u64 = 100_000_000;

/// Convert satoshis to a BTC amount string with 8 decimal places.
/// Integer math only; the result is for provider API compatibility and
/// display, never authoritative.
pub fn sats_to_btc(sats: u64) -> String {
    format!("{}.{:08}", sats / SATS_PER_BTC, sats % SATS_PER_BTC)
}

/// Errors from the payment provider
#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    /// Provider unreachable, timed out, or returned a non-2xx status
    #[error("Payment provider unavailable: {0}")]
    Unavailable(String),

    /// Provider responded but the body could not be understood
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

/// A Lightning invoice issued by the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    /// Provider-assigned invoice ID
    pub id: String,
    /// Hosted checkout URL
    pub url: String,
    /// Raw BOLT11 invoice string
    pub raw: String,
    /// Amount in satoshis
    pub amount_sats: u64,
    /// Derived BTC amount (8 decimal places)
    pub amount_btc: String,
    /// Provider-supplied expiry time
    pub expires_at: DateTime<Utc>,
}

/// Settlement state reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceState {
    /// Awaiting payment
    Unpaid,
    /// Settled
    Paid,
    /// Expired without settlement
    Expired,
}

/// Result of an invoice status query
#[derive(Debug, Clone)]
pub struct InvoiceStatus {
    /// Settlement state
    pub state: InvoiceState,
    /// Settlement time, when paid
    pub paid_at: Option<DateTime<Utc>>,
}

/// Port to the payment provider. The HTTP client implements it for
/// production; tests substitute a fake so the lifecycle controller can be
/// exercised without a network.
#[async_trait]
pub trait InvoiceProvider: Send + Sync {
    /// Create an invoice for the given amount
    async fn create_invoice(
        &self,
        amount_sats: u64,
        description: &str,
        callback_url: &str,
    ) -> Result<Invoice, ProviderError>;

    /// Query the settlement state of an invoice
    async fn invoice_status(&self, invoice_id: &str) -> Result<InvoiceStatus, ProviderError>;
}

/// Wire shape for invoice creation
#[derive(Debug, Serialize)]
struct CreateInvoiceRequest<'a> {
    amount: &'a str,
    currency: &'a str,
    description: &'a str,
    callback_url: &'a str,
    expiry_secs: u64,
}

/// Wire shape of the provider's invoice object
#[derive(Debug, Deserialize)]
struct InvoiceResponse {
    id: String,
    checkout_url: String,
    payment_request: String,
    /// Unix seconds
    expires_at: i64,
}

/// Wire shape of the provider's status object
#[derive(Debug, Deserialize)]
struct InvoiceStatusResponse {
    status: String,
    /// Unix seconds, present when paid
    paid_at: Option<i64>,
}

/// HTTP client for the payment provider
#[derive(Debug, Clone)]
pub struct HttpInvoiceClient {
    base_url: String,
    api_key: String,
    invoice_expiry_secs: u64,
    client: reqwest::Client,
}

impl HttpInvoiceClient {
    /// Create a client from provider configuration
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("Failed to build client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            invoice_expiry_secs: config.invoice_expiry_secs,
            client,
        })
    }

    fn parse_unix(ts: i64) -> Result<DateTime<Utc>, ProviderError> {
        Utc.timestamp_opt(ts, 0)
            .single()
            .ok_or_else(|| ProviderError::InvalidResponse(format!("Bad timestamp: {}", ts)))
    }
}

#[async_trait]
impl InvoiceProvider for HttpInvoiceClient {
    async fn create_invoice(
        &self,
        amount_sats: u64,
        description: &str,
        callback_url: &str,
    ) -> Result<Invoice, ProviderError> {
        let amount_btc = sats_to_btc(amount_sats);
        debug!(
            "Creating invoice: amount={} sats ({} BTC), expiry={}s",
            amount_sats, amount_btc, self.invoice_expiry_secs
        );

        let body = CreateInvoiceRequest {
            amount: &amount_btc,
            currency: "BTC",
            description,
            callback_url,
            expiry_secs: self.invoice_expiry_secs,
        };

        let response = self
            .client
            .post(format!("{}/v1/invoices", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Invoice creation request failed: {}", e);
                ProviderError::Unavailable(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            error!("Provider returned error on invoice creation: {} - {}", status, text);
            return Err(ProviderError::Unavailable(format!("{} - {}", status, text)));
        }

        let invoice: InvoiceResponse = response.json().await.map_err(|e| {
            error!("Failed to parse invoice response: {}", e);
            ProviderError::InvalidResponse(e.to_string())
        })?;

        let expires_at = Self::parse_unix(invoice.expires_at)?;

        info!(
            "Created invoice {} for {} sats (expires {})",
            invoice.id, amount_sats, expires_at
        );

        Ok(Invoice {
            id: invoice.id,
            url: invoice.checkout_url,
            raw: invoice.payment_request,
            amount_sats,
            amount_btc,
            expires_at,
        })
    }

    async fn invoice_status(&self, invoice_id: &str) -> Result<InvoiceStatus, ProviderError> {
        debug!("Querying invoice status: {}", invoice_id);

        let response = self
            .client
            .get(format!("{}/v1/invoices/{}", self.base_url, invoice_id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Unavailable(format!("{} - {}", status, text)));
        }

        let body: InvoiceStatusResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let state = match body.status.as_str() {
            "unpaid" | "pending" => InvoiceState::Unpaid,
            "paid" | "settled" => InvoiceState::Paid,
            "expired" => InvoiceState::Expired,
            other => {
                return Err(ProviderError::InvalidResponse(format!(
                    "Unknown invoice status: {}",
                    other
                )))
            }
        };

        let paid_at = match body.paid_at {
            Some(ts) => Some(Self::parse_unix(ts)?),
            None => None,
        };

        Ok(InvoiceStatus { state, paid_at })
    }
}

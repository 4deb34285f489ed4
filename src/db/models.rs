//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    /// Created, invoice issued, payment not yet confirmed
    Submitted,
    /// Payment confirmed by the provider webhook
    Paid,
    /// Operator delivered a response
    Answered,
}

impl QuestionStatus {
    /// Stable string form stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionStatus::Submitted => "submitted",
            QuestionStatus::Paid => "paid",
            QuestionStatus::Answered => "answered",
        }
    }
}

impl fmt::Display for QuestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(QuestionStatus::Submitted),
            "paid" => Ok(QuestionStatus::Paid),
            "answered" => Ok(QuestionStatus::Answered),
            other => Err(format!("Unknown question status: {}", other)),
        }
    }
}

/// Status of a payment record. Only ever moves forward:
/// pending -> paid, pending -> expired, paid -> refunded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Invoice issued, awaiting settlement
    Pending,
    /// Settled on the Lightning Network
    Paid,
    /// Invoice window elapsed without payment
    Expired,
    /// Settled payment returned to the submitter
    Refunded,
}

impl PaymentStatus {
    /// Stable string form stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "expired" => Ok(PaymentStatus::Expired),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(format!("Unknown payment status: {}", other)),
        }
    }
}

/// Question database model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionModel {
    /// Question ID
    pub id: String,
    /// Submitter email
    pub email: String,
    /// Optional display name
    pub name: Option<String>,
    /// Question category
    pub category: String,
    /// Free-text question body
    pub question_text: String,
    /// Pricing tier chosen at submission
    pub tier: String,
    /// Quoted price in satoshis, fixed at submission time
    pub amount_sats: i64,
    /// Lifecycle status
    pub status: String,
    /// Expert response text (populated when answered)
    pub response_text: Option<String>,
    /// Expert response video URL (populated when answered)
    pub response_video_url: Option<String>,
    /// Operator who answered
    pub responded_by: Option<String>,
    /// When the answer was delivered
    pub responded_at: Option<DateTime<Utc>>,
    /// Whether the answer was published to the public archive
    pub published: bool,
    /// When the answer was published
    pub published_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl QuestionModel {
    /// Parse the stored status string
    pub fn question_status(&self) -> Result<QuestionStatus, String> {
        self.status.parse()
    }
}

/// Payment database model (1:1 with a question)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentModel {
    /// Payment ID
    pub id: String,
    /// Associated question ID
    pub question_id: String,
    /// Invoice ID issued by the payment provider
    pub invoice_id: String,
    /// Hosted invoice URL
    pub invoice_url: String,
    /// Raw BOLT11 invoice string
    pub raw_invoice: String,
    /// Amount in satoshis
    pub amount_sats: i64,
    /// Derived BTC amount, display only
    pub amount_btc: String,
    /// Payment status
    pub status: String,
    /// Settlement time
    pub paid_at: Option<DateTime<Utc>>,
    /// Invoice expiry time
    pub expires_at: DateTime<Utc>,
    /// Whether any webhook was received for this payment
    pub webhook_received: bool,
    /// Last webhook signature header, stored for audit
    pub last_webhook_signature: Option<String>,
    /// Last raw webhook payload, stored for audit
    pub last_webhook_payload: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl PaymentModel {
    /// Parse the stored status string
    pub fn payment_status(&self) -> Result<PaymentStatus, String> {
        self.status.parse()
    }
}

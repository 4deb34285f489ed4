//! Configuration management for the paid-question service
//!
//! Configuration is loaded from TOML files and validated once at startup.
//!
//! # Example Configuration File
//!
//! ```toml
//! [service]
//! public_url = "https://ask.example.com"
//! data_dir = "/var/lib/askbitcoin"
//!
//! [provider]
//! base_url = "https://api.lnprovider.example"
//! api_key = "sk_live_..."
//! invoice_expiry_secs = 3600
//!
//! [webhook]
//! secret = "whsec_..."
//!
//! [admin]
//! password = "..."
//!
//! [api]
//! bind_address = "0.0.0.0:8080"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service identity configuration
    #[serde(default)]
    pub service: ServiceConfig,

    /// Payment provider connection configuration
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Webhook verification configuration
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// API server configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Admin session configuration
    #[serde(default)]
    pub admin: AdminConfig,

    /// Pricing tiers offered to submitters
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierConfig>,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Notification gateway configuration
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            provider: ProviderConfig::default(),
            webhook: WebhookConfig::default(),
            api: ApiConfig::default(),
            admin: AdminConfig::default(),
            tiers: default_tiers(),
            database: DatabaseConfig::default(),
            notifications: NotificationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Service identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Public base URL of this service (used for webhook callback URLs)
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Data directory for storing service state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            public_url: default_public_url(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_public_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("askbitcoin"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// Payment provider connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider API base URL
    #[serde(default = "default_provider_url")]
    pub base_url: String,

    /// Provider API key
    #[serde(default)]
    pub api_key: String,

    /// Invoice expiry requested from the provider (seconds)
    #[serde(default = "default_invoice_expiry")]
    pub invoice_expiry_secs: u64,

    /// Outbound request timeout (seconds)
    #[serde(default = "default_provider_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_url(),
            api_key: String::new(),
            invoice_expiry_secs: default_invoice_expiry(),
            timeout_seconds: default_provider_timeout(),
        }
    }
}

fn default_provider_url() -> String {
    "http://127.0.0.1:9090".to_string()
}

fn default_invoice_expiry() -> u64 {
    3600 // 1 hour
}

fn default_provider_timeout() -> u64 {
    10
}

/// Webhook verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Shared secret for HMAC signature verification.
    /// When absent, `allow_unverified` must be set explicitly.
    pub secret: Option<String>,

    /// Maximum age of a webhook timestamp before it is rejected (seconds)
    #[serde(default = "default_webhook_tolerance")]
    pub tolerance_secs: i64,

    /// Accept unsigned webhooks. Unsafe; only for development setups
    /// without a configured secret.
    #[serde(default)]
    pub allow_unverified: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            tolerance_secs: default_webhook_tolerance(),
            allow_unverified: false,
        }
    }
}

fn default_webhook_tolerance() -> i64 {
    300 // 5 minutes
}

/// Per-action rate limit settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per window
    pub limit: u32,
    /// Window length in seconds
    pub window_secs: u64,
}

impl RateLimitConfig {
    /// Window length in milliseconds
    pub fn window_ms(&self) -> u64 {
        self.window_secs.saturating_mul(1000)
    }
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind the API server to
    #[serde(default = "default_api_bind")]
    pub bind_address: String,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Rate limit for question submission
    #[serde(default = "default_submit_rate_limit")]
    pub submit_rate_limit: RateLimitConfig,

    /// Rate limit for payment-status polling
    #[serde(default = "default_status_rate_limit")]
    pub status_rate_limit: RateLimitConfig,

    /// Rate limit for admin login attempts
    #[serde(default = "default_login_rate_limit")]
    pub login_rate_limit: RateLimitConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_api_bind(),
            enable_cors: true,
            submit_rate_limit: default_submit_rate_limit(),
            status_rate_limit: default_status_rate_limit(),
            login_rate_limit: default_login_rate_limit(),
        }
    }
}

fn default_api_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_submit_rate_limit() -> RateLimitConfig {
    RateLimitConfig {
        limit: 5,
        window_secs: 900, // 15 minutes
    }
}

fn default_status_rate_limit() -> RateLimitConfig {
    RateLimitConfig {
        limit: 120,
        window_secs: 60,
    }
}

fn default_login_rate_limit() -> RateLimitConfig {
    RateLimitConfig {
        limit: 5,
        window_secs: 900,
    }
}

fn default_true() -> bool {
    true
}

/// Admin session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Admin login password
    #[serde(default)]
    pub password: String,

    /// Operator identity recorded on answers
    #[serde(default = "default_operator_name")]
    pub operator_name: String,

    /// Session lifetime in minutes
    #[serde(default = "default_session_ttl")]
    pub session_ttl_minutes: i64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            password: String::new(),
            operator_name: default_operator_name(),
            session_ttl_minutes: default_session_ttl(),
        }
    }
}

fn default_operator_name() -> String {
    "admin".to_string()
}

fn default_session_ttl() -> i64 {
    120 // 2 hours
}

/// A pricing tier a submitter can choose
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// Tier identifier sent by clients (e.g. "quick")
    pub id: String,
    /// Fixed price in satoshis
    pub price_sats: u64,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
}

fn default_tiers() -> Vec<TierConfig> {
    vec![
        TierConfig {
            id: "quick".to_string(),
            price_sats: 1_000,
            description: "Short written answer".to_string(),
        },
        TierConfig {
            id: "detailed".to_string(),
            price_sats: 5_000,
            description: "In-depth written answer".to_string(),
        },
        TierConfig {
            id: "video".to_string(),
            price_sats: 21_000,
            description: "Recorded video answer".to_string(),
        },
    ]
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL or path
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite:askbitcoin.db".to_string()
}

/// Notification gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Endpoint of the transactional-email collaborator. When absent,
    /// notifications are logged and dropped.
    pub endpoint: Option<String>,

    /// Recipient address for internal team notifications
    #[serde(default = "default_team_recipient")]
    pub team_recipient: String,

    /// Outbound request timeout (seconds)
    #[serde(default = "default_notify_timeout")]
    pub timeout_seconds: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            team_recipient: default_team_recipient(),
            timeout_seconds: default_notify_timeout(),
        }
    }
}

fn default_team_recipient() -> String {
    "answers@localhost".to_string()
}

fn default_notify_timeout() -> u64 {
    10
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Resolve the database URL, making it relative to data_dir if needed
    pub fn resolve_database_url(&self) -> String {
        let url = &self.database.url;

        if url.starts_with("sqlite:/") || url == "sqlite::memory:" {
            return url.clone();
        }

        let path = if url.starts_with("sqlite:") {
            url.strip_prefix("sqlite:").unwrap_or(url)
        } else {
            url
        };

        if std::path::Path::new(path).is_absolute() {
            return url.clone();
        }

        let db_path = self.service.data_dir.join(path);
        format!("sqlite:{}", db_path.display())
    }

    /// The callback URL the payment provider will POST webhooks to
    pub fn webhook_callback_url(&self) -> String {
        format!(
            "{}/v1/webhook/payments",
            self.service.public_url.trim_end_matches('/')
        )
    }

    /// Look up a pricing tier by id
    pub fn tier(&self, id: &str) -> Option<&TierConfig> {
        self.tiers.iter().find(|t| t.id == id)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.webhook.secret.is_none() && !self.webhook.allow_unverified {
            return Err(
                "No webhook secret configured. Set [webhook] secret, or set \
                 allow_unverified = true to explicitly run without signature \
                 verification (unsafe outside development)"
                    .to_string(),
            );
        }

        if self.webhook.tolerance_secs <= 0 {
            return Err("Webhook tolerance must be positive".to_string());
        }

        if self.admin.password.is_empty() {
            return Err("Admin password must be configured".to_string());
        }

        if self.tiers.is_empty() {
            return Err("At least one pricing tier must be configured".to_string());
        }

        for tier in &self.tiers {
            if tier.id.trim().is_empty() {
                return Err("Tier ids must be non-empty".to_string());
            }
            if tier.price_sats == 0 {
                return Err(format!("Tier '{}' must have a non-zero price", tier.id));
            }
        }

        let mut ids: Vec<&str> = self.tiers.iter().map(|t| t.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.tiers.len() {
            return Err("Tier ids must be unique".to_string());
        }

        if self.provider.timeout_seconds == 0 {
            return Err("Provider timeout cannot be 0".to_string());
        }

        if self.api.submit_rate_limit.limit == 0 || self.api.submit_rate_limit.window_secs == 0 {
            return Err("Submit rate limit must have non-zero limit and window".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.webhook.secret = Some("whsec_test".to_string());
        config.admin.password = "hunter2".to_string();
        config
    }

    #[test]
    fn test_validate_config() {
        let config = valid_config();
        assert!(config.validate().is_ok());

        // Missing webhook secret without the explicit flag is rejected
        let mut config = valid_config();
        config.webhook.secret = None;
        assert!(config.validate().is_err());
        config.webhook.allow_unverified = true;
        assert!(config.validate().is_ok());

        // Missing admin password is rejected
        let mut config = valid_config();
        config.admin.password = String::new();
        assert!(config.validate().is_err());

        // Duplicate tier ids are rejected
        let mut config = valid_config();
        config.tiers.push(TierConfig {
            id: "quick".to_string(),
            price_sats: 2_000,
            description: String::new(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tier_lookup() {
        let config = valid_config();
        assert_eq!(config.tier("quick").unwrap().price_sats, 1_000);
        assert!(config.tier("nonexistent").is_none());
    }

    #[test]
    fn test_webhook_callback_url() {
        let mut config = valid_config();
        config.service.public_url = "https://ask.example.com/".to_string();
        assert_eq!(
            config.webhook_callback_url(),
            "https://ask.example.com/v1/webhook/payments"
        );
    }
}

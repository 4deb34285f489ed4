//! AskBitcoin: paid Bitcoin Q&A over Lightning
//!
//! This crate runs the payment lifecycle behind a "pay to ask a question"
//! site:
//!
//! - **Submission**: a visitor submits a question and receives a Lightning
//!   invoice quoted from a fixed pricing tier
//! - **Webhook confirmation**: the payment provider confirms settlement via
//!   an HMAC-signed callback, the single authoritative payment-truth path
//! - **Operator answers**: a logged-in operator answers paid questions and
//!   optionally publishes them to the public archive
//! - **Expiry sweep**: a background task expires invoices the provider never
//!   settled, recovering missed-webhook payments along the way
//!
//! # Architecture
//!
//! 1. `api` exposes the HTTP surface (public submission/polling, the
//!    provider webhook, the admin endpoints)
//! 2. `qa` owns the lifecycle state machine over the `db` layer
//! 3. `provider` and `notify` are thin clients for the two external
//!    collaborators (payment provider, transactional email)
//!
#![warn(missing_docs)]

pub mod api;
pub mod config;
pub mod db;
pub mod notify;
pub mod provider;
pub mod qa;
pub mod rate_limit;
pub mod webhook;

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

pub use config::Config;
use db::Database;
use provider::HttpInvoiceClient;
use qa::QaService;

/// The main application state
#[derive(Clone)]
pub struct App {
    /// Application configuration
    pub config: Arc<Config>,
    /// Database connection
    pub db: Arc<Database>,
    /// Question lifecycle service
    pub qa: Arc<QaService>,
}

impl App {
    /// Create a new application instance
    pub async fn new(config: Config) -> Result<Self> {
        info!("Initializing AskBitcoin application...");

        let config = Arc::new(config);

        let db_url = config.resolve_database_url();
        let db = Arc::new(Database::connect(&db_url).await?);

        let provider = Arc::new(
            HttpInvoiceClient::new(&config.provider)
                .map_err(|e| anyhow::anyhow!("Failed to build provider client: {}", e))?,
        );
        let notifier = notify::gateway_from_config(&config.notifications)
            .map_err(|e| anyhow::anyhow!("Failed to build notification gateway: {}", e))?;

        let qa = Arc::new(QaService::new(
            config.clone(),
            db.clone(),
            provider,
            notifier,
        ));

        info!("AskBitcoin application initialized successfully");

        Ok(Self { config, db, qa })
    }

    /// Start the application
    pub async fn run(&self) -> Result<()> {
        self.run_with_shutdown(tokio::sync::oneshot::channel().1).await
    }

    /// Start the application with a shutdown signal
    pub async fn run_with_shutdown(
        &self,
        shutdown_rx: tokio::sync::oneshot::Receiver<()>,
    ) -> Result<()> {
        info!("Starting AskBitcoin application...");

        // Background expiry sweep; one pass at startup to catch invoices
        // that lapsed while the service was down
        let sweep_handle = tokio::spawn({
            let qa = self.qa.clone();
            let interval = qa.sweep_interval();
            async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    if let Err(e) = qa.expire_stale_payments().await {
                        error!("Expiry sweep failed: {}", e);
                    }
                }
            }
        });

        // HTTP API server with shutdown handler
        let api_handle = tokio::spawn({
            let app = self.clone();
            async move {
                if let Err(e) = api::serve_with_shutdown(app, shutdown_rx).await {
                    warn!("API server error: {}", e);
                }
            }
        });

        info!(
            "AskBitcoin application running. API available at http://{}",
            self.config.api.bind_address
        );

        api_handle.await?;
        sweep_handle.abort();

        Ok(())
    }

    /// Shutdown the application gracefully
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down AskBitcoin application...");
        self.db.close().await;
        info!("AskBitcoin application shutdown complete");
        Ok(())
    }
}

/// Error types for the application
#[derive(thiserror::Error, Debug)]
pub enum QaError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or invalid credentials
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Session valid but the CSRF token did not match
    #[error("CSRF token mismatch")]
    CsrfMismatch,

    /// Payment provider error
    #[error(transparent)]
    Provider(#[from] provider::ProviderError),

    /// Webhook authenticity failure
    #[error(transparent)]
    Webhook(#[from] webhook::WebhookError),

    /// Operation not valid in the entity's current state
    #[error("State conflict: {0}")]
    StateConflict(String),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),
}

/// Result type alias for lifecycle operations
pub type QaResult<T> = std::result::Result<T, QaError>;

//! Database module for the paid-question service
//!
//! Persistent storage for:
//! - Questions (the lifecycle system of record)
//! - Payments (one invoice per question)

use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

mod models;
mod queries;

pub use models::*;
pub use queries::*;

/// Database connection
#[derive(Clone)]
pub struct Database {
    /// SQLite connection (wrapped in Arc<Mutex> for thread safety)
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Connect to the database
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        info!("Connecting to database at {}", database_url);

        let path = if database_url.starts_with("sqlite:") {
            database_url.strip_prefix("sqlite:").unwrap_or(database_url)
        } else {
            database_url
        };

        // Ensure the directory exists for file-based databases
        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let conn = Connection::open(path)?;

        Self::run_migrations(&conn)?;

        info!("Database connected successfully");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run database migrations
    fn run_migrations(conn: &Connection) -> anyhow::Result<()> {
        debug!("Running database migrations...");

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS questions (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                name TEXT,
                category TEXT NOT NULL,
                question_text TEXT NOT NULL,
                tier TEXT NOT NULL,
                amount_sats INTEGER NOT NULL,
                status TEXT NOT NULL,
                response_text TEXT,
                response_video_url TEXT,
                responded_by TEXT,
                responded_at DATETIME,
                published INTEGER NOT NULL DEFAULT 0,
                published_at DATETIME,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS payments (
                id TEXT PRIMARY KEY,
                question_id TEXT NOT NULL UNIQUE REFERENCES questions(id),
                invoice_id TEXT NOT NULL UNIQUE,
                invoice_url TEXT NOT NULL,
                raw_invoice TEXT NOT NULL,
                amount_sats INTEGER NOT NULL,
                amount_btc TEXT NOT NULL,
                status TEXT NOT NULL,
                paid_at DATETIME,
                expires_at DATETIME NOT NULL,
                webhook_received INTEGER NOT NULL DEFAULT 0,
                last_webhook_signature TEXT,
                last_webhook_payload TEXT,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_questions_status ON questions(status)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_payments_status ON payments(status)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_payments_invoice_id ON payments(invoice_id)",
            [],
        )?;

        debug!("Database migrations completed");
        Ok(())
    }

    /// Get the database connection
    pub fn conn(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    /// Close the database connection
    pub async fn close(&self) {
        info!("Closing database connection...");
        // The connection is closed when the Arc is dropped
        info!("Database connection closed");
    }
}

//! Admin session store
//!
//! Sessions are held in memory: a restart logs every operator out, which is
//! acceptable for a single-operator admin surface. Tokens and CSRF tokens
//! are random UUIDs; all secret comparisons go through `subtle` so a
//! mismatch takes the same time wherever the difference sits.

use crate::{QaError, QaResult};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// A live admin session
#[derive(Debug, Clone)]
struct Session {
    csrf_token: String,
    expires_at: DateTime<Utc>,
}

/// Credentials returned to the client on login
#[derive(Debug, Clone)]
pub struct NewSession {
    /// Opaque session token, delivered as an HttpOnly cookie
    pub token: String,
    /// CSRF token the client must echo in a header on mutating requests
    pub csrf_token: String,
    /// Session expiry
    pub expires_at: DateTime<Utc>,
}

/// In-memory session store for the admin surface
pub struct SessionStore {
    ttl: Duration,
    inner: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    /// Create a store with the given session lifetime
    pub fn new(ttl_minutes: i64) -> Self {
        Self {
            ttl: Duration::minutes(ttl_minutes.max(1)),
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Session>> {
        // A poisoned map still holds valid sessions
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a new session after a successful login
    pub fn create(&self) -> NewSession {
        let now = Utc::now();
        let session = NewSession {
            token: uuid::Uuid::new_v4().to_string(),
            csrf_token: uuid::Uuid::new_v4().to_string(),
            expires_at: now + self.ttl,
        };

        let mut sessions = self.lock();
        sessions.retain(|_, s| s.expires_at > now);
        sessions.insert(
            session.token.clone(),
            Session {
                csrf_token: session.csrf_token.clone(),
                expires_at: session.expires_at,
            },
        );
        info!("Admin session created (expires {})", session.expires_at);
        session
    }

    /// Validate a session token for a read-only request
    pub fn authorize_read(&self, token: Option<&str>) -> QaResult<()> {
        self.session_for(token).map(|_| ())
    }

    /// Validate a session token and CSRF token for a mutating request
    pub fn authorize_write(&self, token: Option<&str>, csrf_token: Option<&str>) -> QaResult<()> {
        let session = self.session_for(token)?;
        let provided = csrf_token.ok_or(QaError::CsrfMismatch)?;
        if !constant_time_eq(provided, &session.csrf_token) {
            return Err(QaError::CsrfMismatch);
        }
        Ok(())
    }

    fn session_for(&self, token: Option<&str>) -> QaResult<Session> {
        let token = token.ok_or_else(|| QaError::Auth("No session".to_string()))?;
        let mut sessions = self.lock();

        match sessions.get(token) {
            Some(session) if session.expires_at > Utc::now() => Ok(session.clone()),
            Some(_) => {
                debug!("Rejecting expired admin session");
                sessions.remove(token);
                Err(QaError::Auth("Session expired".to_string()))
            }
            None => Err(QaError::Auth("Invalid session".to_string())),
        }
    }
}

/// Constant-time string comparison
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

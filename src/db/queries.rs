//! Database queries
//!
//! Status transitions are compare-and-swap updates: every UPDATE carries the
//! expected current status in its WHERE clause and reports whether a row
//! actually changed. A stale duplicate webhook or a racing expiry sweep
//! therefore skips silently instead of overwriting a terminal state.

use super::{Database, PaymentModel, QuestionModel};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tracing::info;

const QUESTION_COLUMNS: &str = "id, email, name, category, question_text, tier, amount_sats, status, response_text, response_video_url, responded_by, responded_at, published, published_at, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, question_id, invoice_id, invoice_url, raw_invoice, amount_sats, amount_btc, status, paid_at, expires_at, webhook_received, last_webhook_signature, last_webhook_payload, created_at, updated_at";

fn question_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QuestionModel> {
    Ok(QuestionModel {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        category: row.get(3)?,
        question_text: row.get(4)?,
        tier: row.get(5)?,
        amount_sats: row.get(6)?,
        status: row.get(7)?,
        response_text: row.get(8)?,
        response_video_url: row.get(9)?,
        responded_by: row.get(10)?,
        responded_at: row.get(11)?,
        published: row.get::<_, i32>(12)? != 0,
        published_at: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

fn payment_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PaymentModel> {
    Ok(PaymentModel {
        id: row.get(0)?,
        question_id: row.get(1)?,
        invoice_id: row.get(2)?,
        invoice_url: row.get(3)?,
        raw_invoice: row.get(4)?,
        amount_sats: row.get(5)?,
        amount_btc: row.get(6)?,
        status: row.get(7)?,
        paid_at: row.get(8)?,
        expires_at: row.get(9)?,
        webhook_received: row.get::<_, i32>(10)? != 0,
        last_webhook_signature: row.get(11)?,
        last_webhook_payload: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

/// Question queries
pub struct QuestionQueries<'a> {
    db: &'a Database,
}

impl<'a> QuestionQueries<'a> {
    /// Create a new query instance
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a question and its payment in a single transaction.
    /// Either both rows exist afterwards or neither does.
    pub async fn insert_with_payment(
        &self,
        question: &QuestionModel,
        payment: &PaymentModel,
    ) -> Result<()> {
        let conn = self.db.conn();
        let mut conn = conn.lock().await;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO questions (id, email, name, category, question_text, tier, amount_sats, status, response_text, response_video_url, responded_by, responded_at, published, published_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            rusqlite::params![
                &question.id,
                &question.email,
                question.name.as_deref(),
                &question.category,
                &question.question_text,
                &question.tier,
                question.amount_sats,
                &question.status,
                question.response_text.as_deref(),
                question.response_video_url.as_deref(),
                question.responded_by.as_deref(),
                question.responded_at,
                question.published,
                question.published_at,
                question.created_at,
                question.updated_at,
            ],
        )?;

        tx.execute(
            r#"
            INSERT INTO payments (id, question_id, invoice_id, invoice_url, raw_invoice, amount_sats, amount_btc, status, paid_at, expires_at, webhook_received, last_webhook_signature, last_webhook_payload, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            rusqlite::params![
                &payment.id,
                &payment.question_id,
                &payment.invoice_id,
                &payment.invoice_url,
                &payment.raw_invoice,
                payment.amount_sats,
                &payment.amount_btc,
                &payment.status,
                payment.paid_at,
                payment.expires_at,
                payment.webhook_received,
                payment.last_webhook_signature.as_deref(),
                payment.last_webhook_payload.as_deref(),
                payment.created_at,
                payment.updated_at,
            ],
        )?;

        tx.commit()?;

        info!(
            "DB: Inserted question {} with payment {} (invoice_id={}, amount={} sats)",
            question.id, payment.id, payment.invoice_id, payment.amount_sats
        );
        Ok(())
    }

    /// Get a question by ID
    pub async fn get_by_id(&self, id: &str) -> Result<Option<QuestionModel>> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM questions WHERE id = ?1",
            QUESTION_COLUMNS
        ))?;

        let result = stmt
            .query_row(rusqlite::params![id], question_from_row)
            .optional()?;
        Ok(result)
    }

    /// Transition a question from one status to another.
    /// Returns true if the row was in the expected status and changed.
    pub async fn transition_status(
        &self,
        id: &str,
        from: &str,
        to: &str,
    ) -> Result<bool> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let changed = conn.execute(
            "UPDATE questions SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            rusqlite::params![to, Utc::now(), id, from],
        )?;
        if changed > 0 {
            info!("DB: Question {} transitioned {} -> {}", id, from, to);
        }
        Ok(changed > 0)
    }

    /// Record an answer on a paid question.
    /// The WHERE clause enforces the paid-only precondition: answering an
    /// unpaid or already-answered question changes no rows.
    #[allow(clippy::too_many_arguments)]
    pub async fn set_answer(
        &self,
        id: &str,
        response_text: Option<&str>,
        response_video_url: Option<&str>,
        responded_by: &str,
        responded_at: DateTime<Utc>,
        publish: bool,
    ) -> Result<bool> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let published_at = if publish { Some(responded_at) } else { None };
        let changed = conn.execute(
            r#"
            UPDATE questions
            SET status = 'answered',
                response_text = ?1,
                response_video_url = ?2,
                responded_by = ?3,
                responded_at = ?4,
                published = ?5,
                published_at = ?6,
                updated_at = ?7
            WHERE id = ?8 AND status = 'paid'
            "#,
            rusqlite::params![
                response_text,
                response_video_url,
                responded_by,
                responded_at,
                publish,
                published_at,
                Utc::now(),
                id,
            ],
        )?;
        if changed > 0 {
            info!(
                "DB: Recorded answer for question {} (responded_by={}, published={})",
                id, responded_by, publish
            );
        }
        Ok(changed > 0)
    }

    /// List questions by status
    pub async fn list_by_status(&self, status: &str) -> Result<Vec<QuestionModel>> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM questions WHERE status = ?1 ORDER BY created_at DESC",
            QUESTION_COLUMNS
        ))?;

        let rows = stmt.query_map(rusqlite::params![status], question_from_row)?;
        let mut questions = Vec::new();
        for row in rows {
            questions.push(row?);
        }
        Ok(questions)
    }
}

/// Payment queries
pub struct PaymentQueries<'a> {
    db: &'a Database,
}

impl<'a> PaymentQueries<'a> {
    /// Create a new query instance
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Get a payment by the provider's invoice ID
    pub async fn get_by_invoice_id(&self, invoice_id: &str) -> Result<Option<PaymentModel>> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM payments WHERE invoice_id = ?1",
            PAYMENT_COLUMNS
        ))?;

        let result = stmt
            .query_row(rusqlite::params![invoice_id], payment_from_row)
            .optional()?;
        Ok(result)
    }

    /// Get the payment belonging to a question
    pub async fn get_by_question_id(&self, question_id: &str) -> Result<Option<PaymentModel>> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM payments WHERE question_id = ?1",
            PAYMENT_COLUMNS
        ))?;

        let result = stmt
            .query_row(rusqlite::params![question_id], payment_from_row)
            .optional()?;
        Ok(result)
    }

    /// Store webhook audit fields. Runs for every authenticated delivery,
    /// including duplicates, independent of any status transition.
    pub async fn record_webhook(
        &self,
        invoice_id: &str,
        signature: &str,
        payload: &str,
    ) -> Result<()> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        conn.execute(
            r#"
            UPDATE payments
            SET webhook_received = 1,
                last_webhook_signature = ?1,
                last_webhook_payload = ?2,
                updated_at = ?3
            WHERE invoice_id = ?4
            "#,
            rusqlite::params![signature, payload, Utc::now(), invoice_id],
        )?;
        Ok(())
    }

    /// Mark a pending payment paid. Returns true if this call performed the
    /// transition; false means the payment was already in a terminal state.
    pub async fn mark_paid_if_pending(
        &self,
        invoice_id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let changed = conn.execute(
            "UPDATE payments SET status = 'paid', paid_at = ?1, updated_at = ?2 WHERE invoice_id = ?3 AND status = 'pending'",
            rusqlite::params![paid_at, Utc::now(), invoice_id],
        )?;
        if changed > 0 {
            info!("DB: Payment for invoice {} marked paid", invoice_id);
        }
        Ok(changed > 0)
    }

    /// Mark a pending payment expired
    pub async fn mark_expired_if_pending(&self, invoice_id: &str) -> Result<bool> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let changed = conn.execute(
            "UPDATE payments SET status = 'expired', updated_at = ?1 WHERE invoice_id = ?2 AND status = 'pending'",
            rusqlite::params![Utc::now(), invoice_id],
        )?;
        if changed > 0 {
            info!("DB: Payment for invoice {} marked expired", invoice_id);
        }
        Ok(changed > 0)
    }

    /// Mark a paid payment refunded
    pub async fn mark_refunded_if_paid(&self, question_id: &str) -> Result<bool> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let changed = conn.execute(
            "UPDATE payments SET status = 'refunded', updated_at = ?1 WHERE question_id = ?2 AND status = 'paid'",
            rusqlite::params![Utc::now(), question_id],
        )?;
        if changed > 0 {
            info!("DB: Payment for question {} marked refunded", question_id);
        }
        Ok(changed > 0)
    }

    /// List pending payments whose invoice expiry has elapsed
    pub async fn list_pending_expired(&self, now: DateTime<Utc>) -> Result<Vec<PaymentModel>> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM payments WHERE status = 'pending' AND expires_at < ?1 ORDER BY expires_at ASC",
            PAYMENT_COLUMNS
        ))?;

        let rows = stmt.query_map(rusqlite::params![now], payment_from_row)?;
        let mut payments = Vec::new();
        for row in rows {
            payments.push(row?);
        }
        Ok(payments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_question(id: &str) -> QuestionModel {
        let now = Utc::now();
        QuestionModel {
            id: id.to_string(),
            email: "alice@example.com".to_string(),
            name: Some("Alice".to_string()),
            category: "lightning".to_string(),
            question_text: "How do channels work?".to_string(),
            tier: "quick".to_string(),
            amount_sats: 1_000,
            status: "submitted".to_string(),
            response_text: None,
            response_video_url: None,
            responded_by: None,
            responded_at: None,
            published: false,
            published_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_payment(id: &str, question_id: &str, invoice_id: &str) -> PaymentModel {
        let now = Utc::now();
        PaymentModel {
            id: id.to_string(),
            question_id: question_id.to_string(),
            invoice_id: invoice_id.to_string(),
            invoice_url: "https://pay.example/inv1".to_string(),
            raw_invoice: "lnbc10u1p...".to_string(),
            amount_sats: 1_000,
            amount_btc: "0.00001000".to_string(),
            status: "pending".to_string(),
            paid_at: None,
            expires_at: now + Duration::hours(1),
            webhook_received: false,
            last_webhook_signature: None,
            last_webhook_payload: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn test_db() -> Database {
        Database::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_with_payment_and_lookup() {
        let db = test_db().await;
        let questions = QuestionQueries::new(&db);
        let payments = PaymentQueries::new(&db);

        let question = sample_question("q1");
        let payment = sample_payment("p1", "q1", "inv1");
        questions.insert_with_payment(&question, &payment).await.unwrap();

        let loaded = questions.get_by_id("q1").await.unwrap().unwrap();
        assert_eq!(loaded.email, "alice@example.com");
        assert_eq!(loaded.amount_sats, 1_000);
        assert_eq!(loaded.status, "submitted");

        let loaded = payments.get_by_invoice_id("inv1").await.unwrap().unwrap();
        assert_eq!(loaded.question_id, "q1");
        assert_eq!(loaded.status, "pending");

        assert!(questions.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_is_atomic() {
        let db = test_db().await;
        let questions = QuestionQueries::new(&db);
        let payments = PaymentQueries::new(&db);

        let question = sample_question("q1");
        let payment = sample_payment("p1", "q1", "inv1");
        questions.insert_with_payment(&question, &payment).await.unwrap();

        // A second insert reusing the invoice id violates the UNIQUE
        // constraint on payments; the new question row must roll back too.
        let question2 = sample_question("q2");
        let payment2 = sample_payment("p2", "q2", "inv1");
        assert!(questions
            .insert_with_payment(&question2, &payment2)
            .await
            .is_err());
        assert!(questions.get_by_id("q2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_paid_transition_is_idempotent() {
        let db = test_db().await;
        let questions = QuestionQueries::new(&db);
        let payments = PaymentQueries::new(&db);

        questions
            .insert_with_payment(&sample_question("q1"), &sample_payment("p1", "q1", "inv1"))
            .await
            .unwrap();

        let paid_at = Utc::now();
        assert!(payments.mark_paid_if_pending("inv1", paid_at).await.unwrap());
        // Duplicate delivery changes nothing
        assert!(!payments.mark_paid_if_pending("inv1", paid_at).await.unwrap());
        // A racing expiry sweep cannot overwrite the terminal state
        assert!(!payments.mark_expired_if_pending("inv1").await.unwrap());

        let payment = payments.get_by_invoice_id("inv1").await.unwrap().unwrap();
        assert_eq!(payment.status, "paid");
        assert!(payment.paid_at.is_some());
    }

    #[tokio::test]
    async fn test_expired_then_paid_is_rejected() {
        let db = test_db().await;
        let questions = QuestionQueries::new(&db);
        let payments = PaymentQueries::new(&db);

        questions
            .insert_with_payment(&sample_question("q1"), &sample_payment("p1", "q1", "inv1"))
            .await
            .unwrap();

        assert!(payments.mark_expired_if_pending("inv1").await.unwrap());
        assert!(!payments.mark_paid_if_pending("inv1", Utc::now()).await.unwrap());

        let payment = payments.get_by_invoice_id("inv1").await.unwrap().unwrap();
        assert_eq!(payment.status, "expired");
    }

    #[tokio::test]
    async fn test_set_answer_requires_paid() {
        let db = test_db().await;
        let questions = QuestionQueries::new(&db);

        questions
            .insert_with_payment(&sample_question("q1"), &sample_payment("p1", "q1", "inv1"))
            .await
            .unwrap();

        // Still submitted: answer rejected at the row level
        let changed = questions
            .set_answer("q1", Some("..."), None, "admin", Utc::now(), false)
            .await
            .unwrap();
        assert!(!changed);

        assert!(questions
            .transition_status("q1", "submitted", "paid")
            .await
            .unwrap());

        let responded_at = Utc::now();
        let changed = questions
            .set_answer("q1", Some("Channels are..."), None, "admin", responded_at, true)
            .await
            .unwrap();
        assert!(changed);

        // Answering twice changes nothing and preserves responded_at
        let changed = questions
            .set_answer("q1", Some("other"), None, "admin", Utc::now(), false)
            .await
            .unwrap();
        assert!(!changed);

        let question = questions.get_by_id("q1").await.unwrap().unwrap();
        assert_eq!(question.status, "answered");
        assert_eq!(question.response_text.as_deref(), Some("Channels are..."));
        assert!(question.published);
        assert!(question.published_at.is_some());
        assert_eq!(
            question.responded_at.unwrap().timestamp(),
            responded_at.timestamp()
        );
    }

    #[tokio::test]
    async fn test_list_pending_expired() {
        let db = test_db().await;
        let questions = QuestionQueries::new(&db);
        let payments = PaymentQueries::new(&db);

        let mut stale = sample_payment("p1", "q1", "inv1");
        stale.expires_at = Utc::now() - Duration::minutes(10);
        questions
            .insert_with_payment(&sample_question("q1"), &stale)
            .await
            .unwrap();

        let fresh = sample_payment("p2", "q2", "inv2");
        questions
            .insert_with_payment(&sample_question("q2"), &fresh)
            .await
            .unwrap();

        let expired = payments.list_pending_expired(Utc::now()).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].invoice_id, "inv1");
    }

    #[tokio::test]
    async fn test_record_webhook_audit() {
        let db = test_db().await;
        let questions = QuestionQueries::new(&db);
        let payments = PaymentQueries::new(&db);

        questions
            .insert_with_payment(&sample_question("q1"), &sample_payment("p1", "q1", "inv1"))
            .await
            .unwrap();

        payments
            .record_webhook("inv1", "t=1,v1=abc", "{\"type\":\"invoice.paid\"}")
            .await
            .unwrap();

        let payment = payments.get_by_invoice_id("inv1").await.unwrap().unwrap();
        assert!(payment.webhook_received);
        assert_eq!(payment.last_webhook_signature.as_deref(), Some("t=1,v1=abc"));
        // Audit write does not touch status
        assert_eq!(payment.status, "pending");
    }
}

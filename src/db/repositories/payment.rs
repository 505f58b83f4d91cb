//! Payment ledger repository
//!
//! Owns `payment_transactions`, `payment_splits` and `payment_events`.
//! Every multi-row write (checkout, status transition) runs in a single
//! database transaction. Status updates are guarded by the expected current
//! status so two racing transitions cannot both apply.

use crate::config::DatabaseDriver;
use crate::db::{mysql, sqlite, DynDatabasePool};
use crate::models::{
    CourseEarnings, EventOutcome, ListParams, PaymentEvent, PaymentSplit, PaymentStatus,
    PaymentTransaction, SplitAmounts, SplitRecipient, SplitTotals, TransactionDetail,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

const TRANSACTION_COLUMNS: &str = "id, reference, payer_id, course_id, educator_id, amount, currency, fee_bps, status, failure_reason, settled_at, created_at, updated_at";
const SPLIT_COLUMNS: &str = "id, transaction_id, reference, recipient, recipient_id, amount, status, created_at, updated_at";
const EVENT_COLUMNS: &str = "id, event_key, reference, event_type, outcome, payload, received_at";

/// A checkout to be written
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub reference: String,
    pub payer_id: i64,
    pub course_id: i64,
    pub educator_id: i64,
    pub currency: String,
    pub split: SplitAmounts,
}

/// A processed event to be recorded under its idempotency key
#[derive(Debug, Clone)]
pub struct NewPaymentEvent {
    pub event_key: String,
    pub reference: String,
    pub event_type: String,
    pub outcome: EventOutcome,
    pub payload: Option<String>,
}

/// Side effect on course access that accompanies a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentChange {
    None,
    Grant { course_id: i64, user_id: i64 },
    Revoke { course_id: i64, user_id: i64 },
}

/// Everything written by one applied transition
#[derive(Debug, Clone)]
pub struct TransitionWrite {
    pub transaction_id: i64,
    pub reference: String,
    pub from: PaymentStatus,
    pub to: PaymentStatus,
    pub failure_reason: Option<String>,
    pub enrollment: EnrollmentChange,
    pub event: NewPaymentEvent,
}

/// Platform-wide revenue figures, in minor units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueTotals {
    /// Amount of every transaction that ever settled
    pub gross: i64,
    pub refunded: i64,
    /// `gross - refunded`
    pub net: i64,
    /// Platform share of settled, unrefunded sales
    pub platform: i64,
    /// Educator share of settled, unrefunded sales
    pub educator: i64,
}

/// Payment ledger repository trait
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Insert a pending transaction and its two pending splits
    async fn create_checkout(&self, new: &NewTransaction) -> Result<TransactionDetail>;

    async fn get_by_reference(&self, reference: &str) -> Result<Option<PaymentTransaction>>;

    /// Open checkout for this learner and course, if any
    async fn find_pending(&self, payer_id: i64, course_id: i64) -> Result<Option<PaymentTransaction>>;

    async fn splits_for(&self, reference: &str) -> Result<Vec<PaymentSplit>>;

    async fn get_event(&self, event_key: &str) -> Result<Option<PaymentEvent>>;

    /// Record an event that did not change any status.
    /// Fails with a unique violation if the key was already recorded.
    async fn record_event(&self, event: &NewPaymentEvent) -> Result<()>;

    /// Apply a transition atomically. Returns false, writing nothing, when
    /// the transaction is no longer in `from`.
    async fn apply_transition(&self, write: &TransitionWrite) -> Result<bool>;

    /// All transactions, optionally filtered by status, newest first
    async fn list(&self, status: Option<PaymentStatus>, params: &ListParams) -> Result<(Vec<PaymentTransaction>, i64)>;

    async fn count_by_status(&self) -> Result<Vec<(PaymentStatus, i64)>>;

    async fn revenue_totals(&self) -> Result<RevenueTotals>;

    /// Educator split sums grouped by status
    async fn educator_split_totals(&self, educator_id: i64) -> Result<SplitTotals>;

    /// Settled revenue per course for an educator
    async fn earnings_by_course(&self, educator_id: i64) -> Result<Vec<CourseEarnings>>;

    /// An educator's splits, newest first
    async fn educator_splits(&self, educator_id: i64, params: &ListParams) -> Result<(Vec<PaymentSplit>, i64)>;
}

/// SQLx-based payment repository implementation
pub struct SqlxPaymentRepository {
    pool: DynDatabasePool,
}

impl SqlxPaymentRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn PaymentRepository> {
        Arc::new(Self::new(pool))
    }
}

/// `SUM` that always decodes as a 64-bit integer
fn sum(driver: DatabaseDriver, expr: &str) -> String {
    match driver {
        DatabaseDriver::Sqlite => format!("COALESCE(SUM({}), 0)", expr),
        DatabaseDriver::Mysql => format!("CAST(COALESCE(SUM({}), 0) AS SIGNED)", expr),
    }
}

#[async_trait]
impl PaymentRepository for SqlxPaymentRepository {
    async fn create_checkout(&self, new: &NewTransaction) -> Result<TransactionDetail> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_checkout_sqlite(sqlite(&self.pool)?, new).await,
            DatabaseDriver::Mysql => create_checkout_mysql(mysql(&self.pool)?, new).await,
        }
    }

    async fn get_by_reference(&self, reference: &str) -> Result<Option<PaymentTransaction>> {
        let sql = format!("SELECT {} FROM payment_transactions WHERE reference = ?", TRANSACTION_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(reference)
                .fetch_optional(sqlite(&self.pool)?)
                .await
                .context("Failed to get transaction")?
                .map(|row| row_to_transaction_sqlite(&row))
                .transpose(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(reference)
                .fetch_optional(mysql(&self.pool)?)
                .await
                .context("Failed to get transaction")?
                .map(|row| row_to_transaction_mysql(&row))
                .transpose(),
        }
    }

    async fn find_pending(&self, payer_id: i64, course_id: i64) -> Result<Option<PaymentTransaction>> {
        let sql = format!(
            r#"
            SELECT {} FROM payment_transactions
            WHERE payer_id = ? AND course_id = ? AND status = 'pending'
            ORDER BY id DESC LIMIT 1
            "#,
            TRANSACTION_COLUMNS
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(payer_id)
                .bind(course_id)
                .fetch_optional(sqlite(&self.pool)?)
                .await
                .context("Failed to find pending transaction")?
                .map(|row| row_to_transaction_sqlite(&row))
                .transpose(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(payer_id)
                .bind(course_id)
                .fetch_optional(mysql(&self.pool)?)
                .await
                .context("Failed to find pending transaction")?
                .map(|row| row_to_transaction_mysql(&row))
                .transpose(),
        }
    }

    async fn splits_for(&self, reference: &str) -> Result<Vec<PaymentSplit>> {
        let sql = format!(
            "SELECT {} FROM payment_splits WHERE reference = ? ORDER BY id ASC",
            SPLIT_COLUMNS
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(reference)
                .fetch_all(sqlite(&self.pool)?)
                .await
                .context("Failed to list splits")?
                .iter()
                .map(row_to_split_sqlite)
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(reference)
                .fetch_all(mysql(&self.pool)?)
                .await
                .context("Failed to list splits")?
                .iter()
                .map(row_to_split_mysql)
                .collect(),
        }
    }

    async fn get_event(&self, event_key: &str) -> Result<Option<PaymentEvent>> {
        let sql = format!("SELECT {} FROM payment_events WHERE event_key = ?", EVENT_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(event_key)
                .fetch_optional(sqlite(&self.pool)?)
                .await
                .context("Failed to get payment event")?
                .map(|row| row_to_event_sqlite(&row))
                .transpose(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(event_key)
                .fetch_optional(mysql(&self.pool)?)
                .await
                .context("Failed to get payment event")?
                .map(|row| row_to_event_mysql(&row))
                .transpose(),
        }
    }

    async fn record_event(&self, event: &NewPaymentEvent) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let mut conn = sqlite(&self.pool)?.acquire().await?;
                insert_event_sqlite(&mut *conn, event).await
            }
            DatabaseDriver::Mysql => {
                let mut conn = mysql(&self.pool)?.acquire().await?;
                insert_event_mysql(&mut *conn, event).await
            }
        }
    }

    async fn apply_transition(&self, write: &TransitionWrite) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => apply_transition_sqlite(sqlite(&self.pool)?, write).await,
            DatabaseDriver::Mysql => apply_transition_mysql(mysql(&self.pool)?, write).await,
        }
    }

    async fn list(&self, status: Option<PaymentStatus>, params: &ListParams) -> Result<(Vec<PaymentTransaction>, i64)> {
        let where_clause = if status.is_some() { "WHERE status = ?" } else { "" };
        let sql = format!(
            "SELECT {} FROM payment_transactions {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            TRANSACTION_COLUMNS, where_clause
        );
        let count_sql = format!("SELECT COUNT(*) as count FROM payment_transactions {}", where_clause);
        let status = status.map(|s| s.as_str());

        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let pool = sqlite(&self.pool)?;
                let mut query = sqlx::query(&sql);
                let mut count_query = sqlx::query(&count_sql);
                if let Some(status) = status {
                    query = query.bind(status);
                    count_query = count_query.bind(status);
                }
                let items = query
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(pool)
                    .await
                    .context("Failed to list transactions")?
                    .iter()
                    .map(row_to_transaction_sqlite)
                    .collect::<Result<Vec<_>>>()?;
                let total: i64 = count_query
                    .fetch_one(pool)
                    .await
                    .context("Failed to count transactions")?
                    .get("count");
                Ok((items, total))
            }
            DatabaseDriver::Mysql => {
                let pool = mysql(&self.pool)?;
                let mut query = sqlx::query(&sql);
                let mut count_query = sqlx::query(&count_sql);
                if let Some(status) = status {
                    query = query.bind(status);
                    count_query = count_query.bind(status);
                }
                let items = query
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(pool)
                    .await
                    .context("Failed to list transactions")?
                    .iter()
                    .map(row_to_transaction_mysql)
                    .collect::<Result<Vec<_>>>()?;
                let total: i64 = count_query
                    .fetch_one(pool)
                    .await
                    .context("Failed to count transactions")?
                    .get("count");
                Ok((items, total))
            }
        }
    }

    async fn count_by_status(&self) -> Result<Vec<(PaymentStatus, i64)>> {
        let sql = "SELECT status, COUNT(*) as count FROM payment_transactions GROUP BY status";
        let pairs: Vec<(String, i64)> = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .fetch_all(sqlite(&self.pool)?)
                .await
                .context("Failed to count transactions by status")?
                .iter()
                .map(|row| (row.get("status"), row.get("count")))
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .fetch_all(mysql(&self.pool)?)
                .await
                .context("Failed to count transactions by status")?
                .iter()
                .map(|row| (row.get("status"), row.get("count")))
                .collect(),
        };
        pairs
            .into_iter()
            .map(|(status, count)| -> Result<(PaymentStatus, i64)> {
                Ok((PaymentStatus::from_str(&status)?, count))
            })
            .collect()
    }

    async fn revenue_totals(&self) -> Result<RevenueTotals> {
        let driver = self.pool.driver();
        let txn_sql = format!(
            "SELECT {} as gross, {} as refunded FROM payment_transactions",
            sum(driver, "CASE WHEN status IN ('success', 'refunded') THEN amount ELSE 0 END"),
            sum(driver, "CASE WHEN status = 'refunded' THEN amount ELSE 0 END"),
        );
        let split_sql = format!(
            "SELECT {} as platform, {} as educator FROM payment_splits WHERE status = 'success'",
            sum(driver, "CASE WHEN recipient = 'platform' THEN amount ELSE 0 END"),
            sum(driver, "CASE WHEN recipient = 'educator' THEN amount ELSE 0 END"),
        );

        let (gross, refunded, platform, educator): (i64, i64, i64, i64) = match driver {
            DatabaseDriver::Sqlite => {
                let pool = sqlite(&self.pool)?;
                let txn = sqlx::query(&txn_sql)
                    .fetch_one(pool)
                    .await
                    .context("Failed to sum transactions")?;
                let split = sqlx::query(&split_sql)
                    .fetch_one(pool)
                    .await
                    .context("Failed to sum splits")?;
                (txn.get("gross"), txn.get("refunded"), split.get("platform"), split.get("educator"))
            }
            DatabaseDriver::Mysql => {
                let pool = mysql(&self.pool)?;
                let txn = sqlx::query(&txn_sql)
                    .fetch_one(pool)
                    .await
                    .context("Failed to sum transactions")?;
                let split = sqlx::query(&split_sql)
                    .fetch_one(pool)
                    .await
                    .context("Failed to sum splits")?;
                (txn.get("gross"), txn.get("refunded"), split.get("platform"), split.get("educator"))
            }
        };

        Ok(RevenueTotals {
            gross,
            refunded,
            net: gross - refunded,
            platform,
            educator,
        })
    }

    async fn educator_split_totals(&self, educator_id: i64) -> Result<SplitTotals> {
        let sql = format!(
            r#"
            SELECT status, {} as total, COUNT(*) as count
            FROM payment_splits
            WHERE recipient = 'educator' AND recipient_id = ?
            GROUP BY status
            "#,
            sum(self.pool.driver(), "amount")
        );
        let rows: Vec<(String, i64, i64)> = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(educator_id)
                .fetch_all(sqlite(&self.pool)?)
                .await
                .context("Failed to sum educator splits")?
                .iter()
                .map(|row| (row.get("status"), row.get("total"), row.get("count")))
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(educator_id)
                .fetch_all(mysql(&self.pool)?)
                .await
                .context("Failed to sum educator splits")?
                .iter()
                .map(|row| (row.get("status"), row.get("total"), row.get("count")))
                .collect(),
        };

        let mut totals = SplitTotals::default();
        for (status, total, count) in rows {
            match PaymentStatus::from_str(&status)? {
                PaymentStatus::Pending => totals.pending = total,
                PaymentStatus::Success => {
                    totals.earned = total;
                    totals.sales_count = count;
                }
                PaymentStatus::Refunded => totals.refunded = total,
                PaymentStatus::Failed | PaymentStatus::Cancelled => {}
            }
        }
        Ok(totals)
    }

    async fn earnings_by_course(&self, educator_id: i64) -> Result<Vec<CourseEarnings>> {
        let sql = format!(
            r#"
            SELECT c.id as course_id, c.title as title, COUNT(s.id) as sales_count, {} as earned
            FROM payment_splits s
            JOIN payment_transactions t ON t.id = s.transaction_id
            JOIN courses c ON c.id = t.course_id
            WHERE s.recipient = 'educator' AND s.recipient_id = ? AND s.status = 'success'
            GROUP BY c.id, c.title
            ORDER BY earned DESC, c.id ASC
            "#,
            sum(self.pool.driver(), "s.amount")
        );
        let earnings = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(educator_id)
                .fetch_all(sqlite(&self.pool)?)
                .await
                .context("Failed to load course earnings")?
                .iter()
                .map(|row| CourseEarnings {
                    course_id: row.get("course_id"),
                    title: row.get("title"),
                    sales_count: row.get("sales_count"),
                    earned: row.get("earned"),
                })
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(educator_id)
                .fetch_all(mysql(&self.pool)?)
                .await
                .context("Failed to load course earnings")?
                .iter()
                .map(|row| CourseEarnings {
                    course_id: row.get("course_id"),
                    title: row.get("title"),
                    sales_count: row.get("sales_count"),
                    earned: row.get("earned"),
                })
                .collect(),
        };
        Ok(earnings)
    }

    async fn educator_splits(&self, educator_id: i64, params: &ListParams) -> Result<(Vec<PaymentSplit>, i64)> {
        let sql = format!(
            r#"
            SELECT {} FROM payment_splits
            WHERE recipient = 'educator' AND recipient_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
            SPLIT_COLUMNS
        );
        let count_sql = "SELECT COUNT(*) as count FROM payment_splits WHERE recipient = 'educator' AND recipient_id = ?";

        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let pool = sqlite(&self.pool)?;
                let items = sqlx::query(&sql)
                    .bind(educator_id)
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(pool)
                    .await
                    .context("Failed to list educator splits")?
                    .iter()
                    .map(row_to_split_sqlite)
                    .collect::<Result<Vec<_>>>()?;
                let total: i64 = sqlx::query(count_sql)
                    .bind(educator_id)
                    .fetch_one(pool)
                    .await
                    .context("Failed to count educator splits")?
                    .get("count");
                Ok((items, total))
            }
            DatabaseDriver::Mysql => {
                let pool = mysql(&self.pool)?;
                let items = sqlx::query(&sql)
                    .bind(educator_id)
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(pool)
                    .await
                    .context("Failed to list educator splits")?
                    .iter()
                    .map(row_to_split_mysql)
                    .collect::<Result<Vec<_>>>()?;
                let total: i64 = sqlx::query(count_sql)
                    .bind(educator_id)
                    .fetch_one(pool)
                    .await
                    .context("Failed to count educator splits")?
                    .get("count");
                Ok((items, total))
            }
        }
    }
}

fn parse_fee_bps(raw: i64) -> Result<u32> {
    u32::try_from(raw).with_context(|| format!("Invalid fee_bps in database: {}", raw))
}

fn settled_at_for(to: PaymentStatus, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    (to == PaymentStatus::Success).then_some(now)
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_checkout_sqlite(pool: &SqlitePool, new: &NewTransaction) -> Result<TransactionDetail> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let transaction_id = sqlx::query(
        r#"
        INSERT INTO payment_transactions
            (reference, payer_id, course_id, educator_id, amount, currency, fee_bps, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)
        "#,
    )
    .bind(&new.reference)
    .bind(new.payer_id)
    .bind(new.course_id)
    .bind(new.educator_id)
    .bind(new.split.amount)
    .bind(&new.currency)
    .bind(new.split.fee_bps as i64)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("Failed to create transaction")?
    .last_insert_rowid();

    let mut splits = Vec::with_capacity(2);
    for (recipient, recipient_id, amount) in split_rows(new) {
        let id = sqlx::query(
            r#"
            INSERT INTO payment_splits
                (transaction_id, reference, recipient, recipient_id, amount, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(transaction_id)
        .bind(&new.reference)
        .bind(recipient.to_string())
        .bind(recipient_id)
        .bind(amount)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to create split")?
        .last_insert_rowid();
        splits.push(new_split(id, transaction_id, new, recipient, recipient_id, amount, now));
    }

    tx.commit().await.context("Failed to commit checkout")?;

    Ok(TransactionDetail {
        transaction: new_transaction(transaction_id, new, now),
        splits,
    })
}

async fn insert_event_sqlite(conn: &mut sqlx::SqliteConnection, event: &NewPaymentEvent) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO payment_events (event_key, reference, event_type, outcome, payload, received_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&event.event_key)
    .bind(&event.reference)
    .bind(&event.event_type)
    .bind(event.outcome.as_str())
    .bind(&event.payload)
    .bind(Utc::now())
    .execute(conn)
    .await
    .context("Failed to record payment event")?;
    Ok(())
}

async fn apply_transition_sqlite(pool: &SqlitePool, write: &TransitionWrite) -> Result<bool> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let updated = sqlx::query(
        r#"
        UPDATE payment_transactions
        SET status = ?, failure_reason = COALESCE(?, failure_reason), settled_at = COALESCE(?, settled_at), updated_at = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(write.to.as_str())
    .bind(&write.failure_reason)
    .bind(settled_at_for(write.to, now))
    .bind(now)
    .bind(write.transaction_id)
    .bind(write.from.as_str())
    .execute(&mut *tx)
    .await
    .context("Failed to update transaction status")?
    .rows_affected();

    if updated == 0 {
        return Ok(false);
    }

    sqlx::query("UPDATE payment_splits SET status = ?, updated_at = ? WHERE transaction_id = ?")
        .bind(write.to.as_str())
        .bind(now)
        .bind(write.transaction_id)
        .execute(&mut *tx)
        .await
        .context("Failed to update split status")?;

    match write.enrollment {
        EnrollmentChange::None => {}
        EnrollmentChange::Grant { course_id, user_id } => {
            sqlx::query(
                "INSERT OR IGNORE INTO enrollments (course_id, user_id, transaction_reference, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(course_id)
            .bind(user_id)
            .bind(&write.reference)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to grant enrollment")?;
        }
        EnrollmentChange::Revoke { course_id, user_id } => {
            // Only the enrollment this transaction paid for
            sqlx::query(
                "DELETE FROM enrollments WHERE course_id = ? AND user_id = ? AND transaction_reference = ?",
            )
            .bind(course_id)
            .bind(user_id)
            .bind(&write.reference)
            .execute(&mut *tx)
            .await
            .context("Failed to revoke enrollment")?;
        }
    }

    insert_event_sqlite(&mut *tx, &write.event).await?;

    tx.commit().await.context("Failed to commit transition")?;
    Ok(true)
}

fn row_to_transaction_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<PaymentTransaction> {
    let status: String = row.get("status");
    Ok(PaymentTransaction {
        id: row.get("id"),
        reference: row.get("reference"),
        payer_id: row.get("payer_id"),
        course_id: row.get("course_id"),
        educator_id: row.get("educator_id"),
        amount: row.get("amount"),
        currency: row.get("currency"),
        fee_bps: parse_fee_bps(row.get("fee_bps"))?,
        status: PaymentStatus::from_str(&status)?,
        failure_reason: row.get("failure_reason"),
        settled_at: row.get("settled_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_split_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<PaymentSplit> {
    let recipient: String = row.get("recipient");
    let status: String = row.get("status");
    Ok(PaymentSplit {
        id: row.get("id"),
        transaction_id: row.get("transaction_id"),
        reference: row.get("reference"),
        recipient: SplitRecipient::from_str(&recipient)?,
        recipient_id: row.get("recipient_id"),
        amount: row.get("amount"),
        status: PaymentStatus::from_str(&status)?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_event_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<PaymentEvent> {
    let outcome: String = row.get("outcome");
    Ok(PaymentEvent {
        id: row.get("id"),
        event_key: row.get("event_key"),
        reference: row.get("reference"),
        event_type: row.get("event_type"),
        outcome: EventOutcome::from_str(&outcome)?,
        payload: row.get("payload"),
        received_at: row.get("received_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_checkout_mysql(pool: &MySqlPool, new: &NewTransaction) -> Result<TransactionDetail> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let transaction_id = sqlx::query(
        r#"
        INSERT INTO payment_transactions
            (reference, payer_id, course_id, educator_id, amount, currency, fee_bps, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)
        "#,
    )
    .bind(&new.reference)
    .bind(new.payer_id)
    .bind(new.course_id)
    .bind(new.educator_id)
    .bind(new.split.amount)
    .bind(&new.currency)
    .bind(new.split.fee_bps as i64)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("Failed to create transaction")?
    .last_insert_id() as i64;

    let mut splits = Vec::with_capacity(2);
    for (recipient, recipient_id, amount) in split_rows(new) {
        let id = sqlx::query(
            r#"
            INSERT INTO payment_splits
                (transaction_id, reference, recipient, recipient_id, amount, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(transaction_id)
        .bind(&new.reference)
        .bind(recipient.to_string())
        .bind(recipient_id)
        .bind(amount)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to create split")?
        .last_insert_id() as i64;
        splits.push(new_split(id, transaction_id, new, recipient, recipient_id, amount, now));
    }

    tx.commit().await.context("Failed to commit checkout")?;

    Ok(TransactionDetail {
        transaction: new_transaction(transaction_id, new, now),
        splits,
    })
}

async fn insert_event_mysql(conn: &mut sqlx::MySqlConnection, event: &NewPaymentEvent) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO payment_events (event_key, reference, event_type, outcome, payload, received_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&event.event_key)
    .bind(&event.reference)
    .bind(&event.event_type)
    .bind(event.outcome.as_str())
    .bind(&event.payload)
    .bind(Utc::now())
    .execute(conn)
    .await
    .context("Failed to record payment event")?;
    Ok(())
}

async fn apply_transition_mysql(pool: &MySqlPool, write: &TransitionWrite) -> Result<bool> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let updated = sqlx::query(
        r#"
        UPDATE payment_transactions
        SET status = ?, failure_reason = COALESCE(?, failure_reason), settled_at = COALESCE(?, settled_at), updated_at = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(write.to.as_str())
    .bind(&write.failure_reason)
    .bind(settled_at_for(write.to, now))
    .bind(now)
    .bind(write.transaction_id)
    .bind(write.from.as_str())
    .execute(&mut *tx)
    .await
    .context("Failed to update transaction status")?
    .rows_affected();

    if updated == 0 {
        return Ok(false);
    }

    sqlx::query("UPDATE payment_splits SET status = ?, updated_at = ? WHERE transaction_id = ?")
        .bind(write.to.as_str())
        .bind(now)
        .bind(write.transaction_id)
        .execute(&mut *tx)
        .await
        .context("Failed to update split status")?;

    match write.enrollment {
        EnrollmentChange::None => {}
        EnrollmentChange::Grant { course_id, user_id } => {
            sqlx::query(
                "INSERT IGNORE INTO enrollments (course_id, user_id, transaction_reference, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(course_id)
            .bind(user_id)
            .bind(&write.reference)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to grant enrollment")?;
        }
        EnrollmentChange::Revoke { course_id, user_id } => {
            // Only the enrollment this transaction paid for
            sqlx::query(
                "DELETE FROM enrollments WHERE course_id = ? AND user_id = ? AND transaction_reference = ?",
            )
            .bind(course_id)
            .bind(user_id)
            .bind(&write.reference)
            .execute(&mut *tx)
            .await
            .context("Failed to revoke enrollment")?;
        }
    }

    insert_event_mysql(&mut *tx, &write.event).await?;

    tx.commit().await.context("Failed to commit transition")?;
    Ok(true)
}

fn row_to_transaction_mysql(row: &sqlx::mysql::MySqlRow) -> Result<PaymentTransaction> {
    let status: String = row.get("status");
    Ok(PaymentTransaction {
        id: row.get("id"),
        reference: row.get("reference"),
        payer_id: row.get("payer_id"),
        course_id: row.get("course_id"),
        educator_id: row.get("educator_id"),
        amount: row.get("amount"),
        currency: row.get("currency"),
        fee_bps: parse_fee_bps(row.get("fee_bps"))?,
        status: PaymentStatus::from_str(&status)?,
        failure_reason: row.get("failure_reason"),
        settled_at: row.get("settled_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_split_mysql(row: &sqlx::mysql::MySqlRow) -> Result<PaymentSplit> {
    let recipient: String = row.get("recipient");
    let status: String = row.get("status");
    Ok(PaymentSplit {
        id: row.get("id"),
        transaction_id: row.get("transaction_id"),
        reference: row.get("reference"),
        recipient: SplitRecipient::from_str(&recipient)?,
        recipient_id: row.get("recipient_id"),
        amount: row.get("amount"),
        status: PaymentStatus::from_str(&status)?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_event_mysql(row: &sqlx::mysql::MySqlRow) -> Result<PaymentEvent> {
    let outcome: String = row.get("outcome");
    Ok(PaymentEvent {
        id: row.get("id"),
        event_key: row.get("event_key"),
        reference: row.get("reference"),
        event_type: row.get("event_type"),
        outcome: EventOutcome::from_str(&outcome)?,
        payload: row.get("payload"),
        received_at: row.get("received_at"),
    })
}

// ============================================================================
// Shared builders
// ============================================================================

fn split_rows(new: &NewTransaction) -> [(SplitRecipient, Option<i64>, i64); 2] {
    [
        (SplitRecipient::Platform, None, new.split.platform_fee),
        (SplitRecipient::Educator, Some(new.educator_id), new.split.educator_amount),
    ]
}

fn new_split(
    id: i64,
    transaction_id: i64,
    new: &NewTransaction,
    recipient: SplitRecipient,
    recipient_id: Option<i64>,
    amount: i64,
    now: DateTime<Utc>,
) -> PaymentSplit {
    PaymentSplit {
        id,
        transaction_id,
        reference: new.reference.clone(),
        recipient,
        recipient_id,
        amount,
        status: PaymentStatus::Pending,
        created_at: now,
        updated_at: now,
    }
}

fn new_transaction(id: i64, new: &NewTransaction, now: DateTime<Utc>) -> PaymentTransaction {
    PaymentTransaction {
        id,
        reference: new.reference.clone(),
        payer_id: new.payer_id,
        course_id: new.course_id,
        educator_id: new.educator_id,
        amount: new.split.amount,
        currency: new.currency.clone(),
        fee_bps: new.split.fee_bps,
        status: PaymentStatus::Pending,
        failure_reason: None,
        settled_at: None,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::course::{CourseRepository, SqlxCourseRepository};
    use crate::db::repositories::test_support::{insert_user, setup_pool};
    use crate::models::{compute_split, new_reference, CreateCourseInput, UserRole};

    struct Fixture {
        repo: SqlxPaymentRepository,
        courses: SqlxCourseRepository,
        learner: i64,
        educator: i64,
        course_id: i64,
    }

    async fn fixture() -> Fixture {
        let pool = setup_pool().await;
        let educator = insert_user(&pool, "seller", UserRole::Educator).await;
        let learner = insert_user(&pool, "buyer", UserRole::Learner).await;
        let courses = SqlxCourseRepository::new(pool.clone());
        let course = courses
            .create(
                educator,
                &CreateCourseInput {
                    title: "Ledgers 101".to_string(),
                    description: None,
                    price: 10_000,
                },
            )
            .await
            .unwrap();
        Fixture {
            repo: SqlxPaymentRepository::new(pool),
            courses,
            learner,
            educator,
            course_id: course.id,
        }
    }

    fn checkout(f: &Fixture, amount: i64) -> NewTransaction {
        NewTransaction {
            reference: new_reference(),
            payer_id: f.learner,
            course_id: f.course_id,
            educator_id: f.educator,
            currency: "NGN".to_string(),
            split: compute_split(amount, 2000).unwrap(),
        }
    }

    fn confirm_write(txn: &PaymentTransaction, learner: i64, key: &str) -> TransitionWrite {
        TransitionWrite {
            transaction_id: txn.id,
            reference: txn.reference.clone(),
            from: PaymentStatus::Pending,
            to: PaymentStatus::Success,
            failure_reason: None,
            enrollment: EnrollmentChange::Grant {
                course_id: txn.course_id,
                user_id: learner,
            },
            event: NewPaymentEvent {
                event_key: key.to_string(),
                reference: txn.reference.clone(),
                event_type: "charge.success".to_string(),
                outcome: EventOutcome::Applied,
                payload: None,
            },
        }
    }

    #[tokio::test]
    async fn test_checkout_writes_transaction_and_splits() {
        let f = fixture().await;
        let detail = f.repo.create_checkout(&checkout(&f, 10_000)).await.unwrap();

        assert_eq!(detail.transaction.status, PaymentStatus::Pending);
        assert_eq!(detail.splits.len(), 2);
        let total: i64 = detail.splits.iter().map(|s| s.amount).sum();
        assert_eq!(total, 10_000);

        let stored = f.repo.splits_for(&detail.transaction.reference).await.unwrap();
        assert_eq!(stored[0].recipient, SplitRecipient::Platform);
        assert_eq!(stored[0].amount, 2_000);
        assert_eq!(stored[1].recipient_id, Some(f.educator));
        assert_eq!(stored[1].amount, 8_000);

        let pending = f.repo.find_pending(f.learner, f.course_id).await.unwrap();
        assert_eq!(pending.map(|t| t.id), Some(detail.transaction.id));
    }

    #[tokio::test]
    async fn test_apply_transition_cascades_and_guards() {
        let f = fixture().await;
        let detail = f.repo.create_checkout(&checkout(&f, 10_000)).await.unwrap();
        let txn = detail.transaction;

        assert!(f.repo.apply_transition(&confirm_write(&txn, f.learner, "evt_1")).await.unwrap());

        let stored = f.repo.get_by_reference(&txn.reference).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Success);
        assert!(stored.settled_at.is_some());
        assert!(f
            .repo
            .splits_for(&txn.reference)
            .await
            .unwrap()
            .iter()
            .all(|s| s.status == PaymentStatus::Success));
        let enrollment = f.courses.get_enrollment(f.course_id, f.learner).await.unwrap();
        assert_eq!(enrollment.and_then(|e| e.transaction_reference), Some(txn.reference.clone()));

        let event = f.repo.get_event("evt_1").await.unwrap().unwrap();
        assert_eq!(event.outcome, EventOutcome::Applied);

        // Already moved out of pending: the guarded update writes nothing
        assert!(!f.repo.apply_transition(&confirm_write(&txn, f.learner, "evt_2")).await.unwrap());
        assert!(f.repo.get_event("evt_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refund_revokes_enrollment_and_updates_totals() {
        let f = fixture().await;
        let txn = f.repo.create_checkout(&checkout(&f, 10_000)).await.unwrap().transaction;
        f.repo.apply_transition(&confirm_write(&txn, f.learner, "evt_a")).await.unwrap();

        let totals = f.repo.educator_split_totals(f.educator).await.unwrap();
        assert_eq!(totals.earned, 8_000);
        assert_eq!(totals.sales_count, 1);

        let revenue = f.repo.revenue_totals().await.unwrap();
        assert_eq!(revenue.net, 10_000);
        assert_eq!(revenue.platform, 2_000);

        let by_course = f.repo.earnings_by_course(f.educator).await.unwrap();
        assert_eq!(by_course.len(), 1);
        assert_eq!(by_course[0].earned, 8_000);

        let refund = TransitionWrite {
            transaction_id: txn.id,
            reference: txn.reference.clone(),
            from: PaymentStatus::Success,
            to: PaymentStatus::Refunded,
            failure_reason: None,
            enrollment: EnrollmentChange::Revoke {
                course_id: f.course_id,
                user_id: f.learner,
            },
            event: NewPaymentEvent {
                event_key: format!("{}:refund", txn.reference),
                reference: txn.reference.clone(),
                event_type: "refund".to_string(),
                outcome: EventOutcome::Applied,
                payload: None,
            },
        };
        assert!(f.repo.apply_transition(&refund).await.unwrap());
        assert!(f.courses.get_enrollment(f.course_id, f.learner).await.unwrap().is_none());

        let totals = f.repo.educator_split_totals(f.educator).await.unwrap();
        assert_eq!(totals.earned, 0);
        assert_eq!(totals.refunded, 8_000);

        let revenue = f.repo.revenue_totals().await.unwrap();
        assert_eq!(revenue.gross, 10_000);
        assert_eq!(revenue.refunded, 10_000);
        assert_eq!(revenue.net, 0);
        assert_eq!(revenue.platform, 0);
    }

    #[tokio::test]
    async fn test_refund_keeps_enrollment_paid_by_another_transaction() {
        let f = fixture().await;
        f.courses.enroll(f.course_id, f.learner, Some("ALX-earlier")).await.unwrap();

        let txn = f.repo.create_checkout(&checkout(&f, 10_000)).await.unwrap().transaction;
        assert!(f.repo.apply_transition(&confirm_write(&txn, f.learner, "evt_dup")).await.unwrap());

        let refund = TransitionWrite {
            transaction_id: txn.id,
            reference: txn.reference.clone(),
            from: PaymentStatus::Success,
            to: PaymentStatus::Refunded,
            failure_reason: None,
            enrollment: EnrollmentChange::Revoke {
                course_id: f.course_id,
                user_id: f.learner,
            },
            event: NewPaymentEvent {
                event_key: format!("{}:refund", txn.reference),
                reference: txn.reference.clone(),
                event_type: "refund".to_string(),
                outcome: EventOutcome::Applied,
                payload: None,
            },
        };
        assert!(f.repo.apply_transition(&refund).await.unwrap());

        let enrollment = f.courses.get_enrollment(f.course_id, f.learner).await.unwrap();
        assert_eq!(
            enrollment.and_then(|e| e.transaction_reference).as_deref(),
            Some("ALX-earlier")
        );
    }

    #[tokio::test]
    async fn test_record_event_key_is_unique() {
        let f = fixture().await;
        let event = NewPaymentEvent {
            event_key: "ALX-x:cancel".to_string(),
            reference: "ALX-x".to_string(),
            event_type: "cancel".to_string(),
            outcome: EventOutcome::Rejected,
            payload: None,
        };
        f.repo.record_event(&event).await.unwrap();
        let err = f.repo.record_event(&event).await.unwrap_err();
        assert!(crate::db::is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_list_and_count_by_status() {
        let f = fixture().await;
        f.repo.create_checkout(&checkout(&f, 500)).await.unwrap();
        f.repo.create_checkout(&checkout(&f, 700)).await.unwrap();

        let (all, total) = f.repo.list(None, &ListParams::default()).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(all[0].amount, 700);

        let (_, success) = f
            .repo
            .list(Some(PaymentStatus::Success), &ListParams::default())
            .await
            .unwrap();
        assert_eq!(success, 0);

        assert_eq!(
            f.repo.count_by_status().await.unwrap(),
            vec![(PaymentStatus::Pending, 2)]
        );
    }
}

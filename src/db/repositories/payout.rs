//! Payout repository

use crate::config::DatabaseDriver;
use crate::db::{mysql, sqlite, DynDatabasePool};
use crate::models::{ListParams, Payout, PayoutStatus, PayoutTotals};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

const PAYOUT_COLUMNS: &str = "id, educator_id, amount, currency, status, note, processed_by, processed_at, created_at";

/// Payout repository trait
#[async_trait]
pub trait PayoutRepository: Send + Sync {
    /// Open a payout request. Returns `None` when the educator already has
    /// one in `requested`.
    async fn create_request(&self, educator_id: i64, amount: i64, currency: &str) -> Result<Option<Payout>>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Payout>>;

    /// Payouts, newest first, optionally for one educator
    async fn list(&self, educator_id: Option<i64>, params: &ListParams) -> Result<(Vec<Payout>, i64)>;

    /// Sums of paid and still-requested payouts
    async fn totals(&self, educator_id: i64) -> Result<PayoutTotals>;

    /// Close a `requested` payout; returns false if it was not open
    async fn close(&self, id: i64, to: PayoutStatus, processed_by: i64, note: Option<&str>) -> Result<bool>;
}

/// SQLx-based payout repository implementation
pub struct SqlxPayoutRepository {
    pool: DynDatabasePool,
}

impl SqlxPayoutRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn PayoutRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl PayoutRepository for SqlxPayoutRepository {
    async fn create_request(&self, educator_id: i64, amount: i64, currency: &str) -> Result<Option<Payout>> {
        let now = Utc::now();
        // The NOT EXISTS guard keeps at most one open request per educator
        let from = match self.pool.driver() {
            DatabaseDriver::Sqlite => "",
            DatabaseDriver::Mysql => "FROM DUAL",
        };
        let sql = format!(
            r#"
            INSERT INTO payouts (educator_id, amount, currency, status, created_at)
            SELECT ?, ?, ?, 'requested', ? {from}
            WHERE NOT EXISTS (
                SELECT 1 FROM payouts WHERE educator_id = ? AND status = 'requested'
            )
            "#
        );
        let (affected, id) = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let result = sqlx::query(&sql)
                    .bind(educator_id)
                    .bind(amount)
                    .bind(currency)
                    .bind(now)
                    .bind(educator_id)
                    .execute(sqlite(&self.pool)?)
                    .await
                    .context("Failed to create payout")?;
                (result.rows_affected(), result.last_insert_rowid())
            }
            DatabaseDriver::Mysql => {
                let result = sqlx::query(&sql)
                    .bind(educator_id)
                    .bind(amount)
                    .bind(currency)
                    .bind(now)
                    .bind(educator_id)
                    .execute(mysql(&self.pool)?)
                    .await
                    .context("Failed to create payout")?;
                (result.rows_affected(), result.last_insert_id() as i64)
            }
        };

        if affected == 0 {
            return Ok(None);
        }

        Ok(Some(Payout {
            id,
            educator_id,
            amount,
            currency: currency.to_string(),
            status: PayoutStatus::Requested,
            note: None,
            processed_by: None,
            processed_at: None,
            created_at: now,
        }))
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Payout>> {
        let sql = format!("SELECT {} FROM payouts WHERE id = ?", PAYOUT_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(sqlite(&self.pool)?)
                .await
                .context("Failed to get payout")?
                .map(|row| row_to_payout_sqlite(&row))
                .transpose(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(mysql(&self.pool)?)
                .await
                .context("Failed to get payout")?
                .map(|row| row_to_payout_mysql(&row))
                .transpose(),
        }
    }

    async fn list(&self, educator_id: Option<i64>, params: &ListParams) -> Result<(Vec<Payout>, i64)> {
        let where_clause = if educator_id.is_some() { "WHERE educator_id = ?" } else { "" };
        let sql = format!(
            "SELECT {} FROM payouts {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            PAYOUT_COLUMNS, where_clause
        );
        let count_sql = format!("SELECT COUNT(*) as count FROM payouts {}", where_clause);

        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let pool = sqlite(&self.pool)?;
                let mut query = sqlx::query(&sql);
                let mut count_query = sqlx::query(&count_sql);
                if let Some(id) = educator_id {
                    query = query.bind(id);
                    count_query = count_query.bind(id);
                }
                let payouts = query
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(pool)
                    .await
                    .context("Failed to list payouts")?
                    .iter()
                    .map(row_to_payout_sqlite)
                    .collect::<Result<Vec<_>>>()?;
                let total: i64 = count_query
                    .fetch_one(pool)
                    .await
                    .context("Failed to count payouts")?
                    .get("count");
                Ok((payouts, total))
            }
            DatabaseDriver::Mysql => {
                let pool = mysql(&self.pool)?;
                let mut query = sqlx::query(&sql);
                let mut count_query = sqlx::query(&count_sql);
                if let Some(id) = educator_id {
                    query = query.bind(id);
                    count_query = count_query.bind(id);
                }
                let payouts = query
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(pool)
                    .await
                    .context("Failed to list payouts")?
                    .iter()
                    .map(row_to_payout_mysql)
                    .collect::<Result<Vec<_>>>()?;
                let total: i64 = count_query
                    .fetch_one(pool)
                    .await
                    .context("Failed to count payouts")?
                    .get("count");
                Ok((payouts, total))
            }
        }
    }

    async fn totals(&self, educator_id: i64) -> Result<PayoutTotals> {
        let (paid_out, requested): (i64, i64) = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(
                    r#"
                    SELECT
                        COALESCE(SUM(CASE WHEN status = 'paid' THEN amount ELSE 0 END), 0) as paid_out,
                        COALESCE(SUM(CASE WHEN status = 'requested' THEN amount ELSE 0 END), 0) as requested
                    FROM payouts WHERE educator_id = ?
                    "#,
                )
                .bind(educator_id)
                .fetch_one(sqlite(&self.pool)?)
                .await
                .context("Failed to sum payouts")?;
                (row.get("paid_out"), row.get("requested"))
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(
                    r#"
                    SELECT
                        CAST(COALESCE(SUM(CASE WHEN status = 'paid' THEN amount ELSE 0 END), 0) AS SIGNED) as paid_out,
                        CAST(COALESCE(SUM(CASE WHEN status = 'requested' THEN amount ELSE 0 END), 0) AS SIGNED) as requested
                    FROM payouts WHERE educator_id = ?
                    "#,
                )
                .bind(educator_id)
                .fetch_one(mysql(&self.pool)?)
                .await
                .context("Failed to sum payouts")?;
                (row.get("paid_out"), row.get("requested"))
            }
        };
        Ok(PayoutTotals { paid_out, requested })
    }

    async fn close(&self, id: i64, to: PayoutStatus, processed_by: i64, note: Option<&str>) -> Result<bool> {
        let sql = r#"
            UPDATE payouts
            SET status = ?, processed_by = ?, processed_at = ?, note = COALESCE(?, note)
            WHERE id = ? AND status = 'requested'
        "#;
        let now = Utc::now();
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(to.to_string())
                .bind(processed_by)
                .bind(now)
                .bind(note)
                .bind(id)
                .execute(sqlite(&self.pool)?)
                .await
                .context("Failed to close payout")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(to.to_string())
                .bind(processed_by)
                .bind(now)
                .bind(note)
                .bind(id)
                .execute(mysql(&self.pool)?)
                .await
                .context("Failed to close payout")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }
}

fn row_to_payout_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Payout> {
    let status: String = row.get("status");
    Ok(Payout {
        id: row.get("id"),
        educator_id: row.get("educator_id"),
        amount: row.get("amount"),
        currency: row.get("currency"),
        status: PayoutStatus::from_str(&status)?,
        note: row.get("note"),
        processed_by: row.get("processed_by"),
        processed_at: row.get("processed_at"),
        created_at: row.get("created_at"),
    })
}

fn row_to_payout_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Payout> {
    let status: String = row.get("status");
    Ok(Payout {
        id: row.get("id"),
        educator_id: row.get("educator_id"),
        amount: row.get("amount"),
        currency: row.get("currency"),
        status: PayoutStatus::from_str(&status)?,
        note: row.get("note"),
        processed_by: row.get("processed_by"),
        processed_at: row.get("processed_at"),
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{insert_user, setup_pool};
    use crate::models::UserRole;

    #[tokio::test]
    async fn test_one_open_request_per_educator() {
        let pool = setup_pool().await;
        let educator = insert_user(&pool, "earner", UserRole::Educator).await;
        let admin = insert_user(&pool, "payer", UserRole::Admin).await;
        let repo = SqlxPayoutRepository::new(pool);

        let first = repo.create_request(educator, 150_000, "NGN").await.unwrap();
        let first = first.expect("first request should open");
        assert!(repo.create_request(educator, 1_000, "NGN").await.unwrap().is_none());

        assert!(repo.close(first.id, PayoutStatus::Paid, admin, None).await.unwrap());
        assert!(!repo.close(first.id, PayoutStatus::Rejected, admin, Some("late")).await.unwrap());

        let stored = repo.get_by_id(first.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PayoutStatus::Paid);
        assert_eq!(stored.processed_by, Some(admin));

        let second = repo.create_request(educator, 2_000, "NGN").await.unwrap();
        assert!(second.is_some());

        let totals = repo.totals(educator).await.unwrap();
        assert_eq!(totals, PayoutTotals { paid_out: 150_000, requested: 2_000 });
    }

    #[tokio::test]
    async fn test_list_scoped_by_educator() {
        let pool = setup_pool().await;
        let a = insert_user(&pool, "edu_a", UserRole::Educator).await;
        let b = insert_user(&pool, "edu_b", UserRole::Educator).await;
        let repo = SqlxPayoutRepository::new(pool);

        repo.create_request(a, 100, "NGN").await.unwrap();
        repo.create_request(b, 200, "NGN").await.unwrap();

        let (mine, total) = repo.list(Some(a), &ListParams::default()).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(mine[0].amount, 100);

        let (_, total) = repo.list(None, &ListParams::default()).await.unwrap();
        assert_eq!(total, 2);
    }
}

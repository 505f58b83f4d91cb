//! AlexPoints repository
//!
//! Awards are append-only rows in `points_transactions`; the running total
//! on `users.alex_points` is bumped in the same transaction as the insert.

use crate::config::DatabaseDriver;
use crate::db::{mysql, sqlite, DynDatabasePool};
use crate::models::{level_for, LeaderboardEntry, ListParams, PointsAction, PointsTransaction};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// Limit on how many awards of one action a user may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwardCap {
    /// Only awards at or after this instant count; `None` counts all of them
    pub since: Option<DateTime<Utc>>,
    pub max: i64,
}

/// Points repository trait
#[async_trait]
pub trait PointsRepository: Send + Sync {
    /// Record an award and return the user's new total.
    ///
    /// The cap is checked by the insert itself, so concurrent awards cannot
    /// overshoot it. Returns `None` when the cap was already reached.
    async fn award(
        &self,
        user_id: i64,
        action: PointsAction,
        points: i64,
        reference: Option<&str>,
        cap: Option<AwardCap>,
    ) -> Result<Option<i64>>;

    /// Award history, newest first
    async fn history(&self, user_id: i64, params: &ListParams) -> Result<(Vec<PointsTransaction>, i64)>;

    /// Users with the most points
    async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardEntry>>;
}

/// SQLx-based points repository implementation
pub struct SqlxPointsRepository {
    pool: DynDatabasePool,
}

impl SqlxPointsRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn PointsRepository> {
        Arc::new(Self::new(pool))
    }
}

const LEADERBOARD_SQL: &str = r#"
    SELECT id, username, display_name, alex_points
    FROM users
    WHERE status = 'active'
    ORDER BY alex_points DESC, id ASC
    LIMIT ?
"#;

#[async_trait]
impl PointsRepository for SqlxPointsRepository {
    async fn award(
        &self,
        user_id: i64,
        action: PointsAction,
        points: i64,
        reference: Option<&str>,
        cap: Option<AwardCap>,
    ) -> Result<Option<i64>> {
        let sql = award_insert_sql(self.pool.driver(), cap);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                award_sqlite(sqlite(&self.pool)?, &sql, user_id, action, points, reference, cap).await
            }
            DatabaseDriver::Mysql => {
                award_mysql(mysql(&self.pool)?, &sql, user_id, action, points, reference, cap).await
            }
        }
    }

    async fn history(&self, user_id: i64, params: &ListParams) -> Result<(Vec<PointsTransaction>, i64)> {
        let sql = r#"
            SELECT id, user_id, action, points, reference, created_at
            FROM points_transactions
            WHERE user_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
        "#;
        let count_sql = "SELECT COUNT(*) as count FROM points_transactions WHERE user_id = ?";

        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let pool = sqlite(&self.pool)?;
                let items = sqlx::query(sql)
                    .bind(user_id)
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(pool)
                    .await
                    .context("Failed to list points history")?
                    .iter()
                    .map(row_to_transaction_sqlite)
                    .collect::<Result<Vec<_>>>()?;
                let total: i64 = sqlx::query(count_sql)
                    .bind(user_id)
                    .fetch_one(pool)
                    .await
                    .context("Failed to count points history")?
                    .get("count");
                Ok((items, total))
            }
            DatabaseDriver::Mysql => {
                let pool = mysql(&self.pool)?;
                let items = sqlx::query(sql)
                    .bind(user_id)
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(pool)
                    .await
                    .context("Failed to list points history")?
                    .iter()
                    .map(row_to_transaction_mysql)
                    .collect::<Result<Vec<_>>>()?;
                let total: i64 = sqlx::query(count_sql)
                    .bind(user_id)
                    .fetch_one(pool)
                    .await
                    .context("Failed to count points history")?
                    .get("count");
                Ok((items, total))
            }
        }
    }

    async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardEntry>> {
        let entries = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(LEADERBOARD_SQL)
                .bind(limit)
                .fetch_all(sqlite(&self.pool)?)
                .await
                .context("Failed to load leaderboard")?
                .iter()
                .map(|row| leaderboard_entry(row.get("id"), row.get("username"), row.get("display_name"), row.get("alex_points")))
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(LEADERBOARD_SQL)
                .bind(limit)
                .fetch_all(mysql(&self.pool)?)
                .await
                .context("Failed to load leaderboard")?
                .iter()
                .map(|row| leaderboard_entry(row.get("id"), row.get("username"), row.get("display_name"), row.get("alex_points")))
                .collect(),
        };
        Ok(entries)
    }
}

/// Insert for one award row. With a cap, the row is written only while the
/// user's count of matching awards is below `max`.
fn award_insert_sql(driver: DatabaseDriver, cap: Option<AwardCap>) -> String {
    let Some(cap) = cap else {
        return "INSERT INTO points_transactions (user_id, action, points, reference, created_at) VALUES (?, ?, ?, ?, ?)"
            .to_string();
    };
    let from = match driver {
        DatabaseDriver::Sqlite => "",
        DatabaseDriver::Mysql => "FROM DUAL",
    };
    let window = if cap.since.is_some() { " AND created_at >= ?" } else { "" };
    format!(
        r#"
        INSERT INTO points_transactions (user_id, action, points, reference, created_at)
        SELECT ?, ?, ?, ?, ? {from}
        WHERE (
            SELECT COUNT(*) FROM points_transactions WHERE user_id = ? AND action = ?{window}
        ) < ?
        "#
    )
}

fn leaderboard_entry(user_id: i64, username: String, display_name: Option<String>, points: i64) -> LeaderboardEntry {
    LeaderboardEntry {
        user_id,
        username,
        display_name,
        points,
        level: level_for(points),
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn award_sqlite(
    pool: &SqlitePool,
    sql: &str,
    user_id: i64,
    action: PointsAction,
    points: i64,
    reference: Option<&str>,
    cap: Option<AwardCap>,
) -> Result<Option<i64>> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let mut insert = sqlx::query(sql)
        .bind(user_id)
        .bind(action.as_str())
        .bind(points)
        .bind(reference)
        .bind(Utc::now());
    if let Some(cap) = cap {
        insert = insert.bind(user_id).bind(action.as_str());
        if let Some(since) = cap.since {
            insert = insert.bind(since);
        }
        insert = insert.bind(cap.max);
    }
    let inserted = insert
        .execute(&mut *tx)
        .await
        .context("Failed to record points award")?
        .rows_affected();
    if inserted == 0 {
        return Ok(None);
    }

    sqlx::query("UPDATE users SET alex_points = alex_points + ? WHERE id = ?")
        .bind(points)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .context("Failed to update points total")?;

    let total: i64 = sqlx::query("SELECT alex_points FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to read points total")?
        .get("alex_points");

    tx.commit().await.context("Failed to commit points award")?;
    Ok(Some(total))
}

fn row_to_transaction_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<PointsTransaction> {
    let action: String = row.get("action");
    Ok(PointsTransaction {
        id: row.get("id"),
        user_id: row.get("user_id"),
        action: PointsAction::from_str(&action)?,
        points: row.get("points"),
        reference: row.get("reference"),
        created_at: row.get("created_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn award_mysql(
    pool: &MySqlPool,
    sql: &str,
    user_id: i64,
    action: PointsAction,
    points: i64,
    reference: Option<&str>,
    cap: Option<AwardCap>,
) -> Result<Option<i64>> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let mut insert = sqlx::query(sql)
        .bind(user_id)
        .bind(action.as_str())
        .bind(points)
        .bind(reference)
        .bind(Utc::now());
    if let Some(cap) = cap {
        insert = insert.bind(user_id).bind(action.as_str());
        if let Some(since) = cap.since {
            insert = insert.bind(since);
        }
        insert = insert.bind(cap.max);
    }
    let inserted = insert
        .execute(&mut *tx)
        .await
        .context("Failed to record points award")?
        .rows_affected();
    if inserted == 0 {
        return Ok(None);
    }

    sqlx::query("UPDATE users SET alex_points = alex_points + ? WHERE id = ?")
        .bind(points)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .context("Failed to update points total")?;

    let total: i64 = sqlx::query("SELECT alex_points FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to read points total")?
        .get("alex_points");

    tx.commit().await.context("Failed to commit points award")?;
    Ok(Some(total))
}

fn row_to_transaction_mysql(row: &sqlx::mysql::MySqlRow) -> Result<PointsTransaction> {
    let action: String = row.get("action");
    Ok(PointsTransaction {
        id: row.get("id"),
        user_id: row.get("user_id"),
        action: PointsAction::from_str(&action)?,
        points: row.get("points"),
        reference: row.get("reference"),
        created_at: row.get("created_at"),
    })
}

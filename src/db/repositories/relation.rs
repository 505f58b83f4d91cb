//! Social graph repository
//!
//! Follows, blocks and mutes live in one `user_relations` table; a row is a
//! directed edge `user_id -> target_id` of a given kind.

use crate::config::DatabaseDriver;
use crate::db::{mysql, sqlite, DynDatabasePool};
use crate::models::{ListParams, Relation, RelationKind, UserRole, UserSummary};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// Relation repository trait
#[async_trait]
pub trait RelationRepository: Send + Sync {
    /// Insert an edge. Fails with a unique violation if it already exists.
    async fn create(&self, user_id: i64, target_id: i64, kind: RelationKind) -> Result<Relation>;

    /// Remove an edge; returns whether it existed
    async fn delete(&self, user_id: i64, target_id: i64, kind: RelationKind) -> Result<bool>;

    async fn exists(&self, user_id: i64, target_id: i64, kind: RelationKind) -> Result<bool>;

    /// Remove follow edges in both directions between two users
    async fn delete_follows_between(&self, a: i64, b: i64) -> Result<u64>;

    /// Users following `user_id`, newest first
    async fn followers(&self, user_id: i64, params: &ListParams) -> Result<(Vec<UserSummary>, i64)>;

    /// Users `user_id` follows, newest first
    async fn following(&self, user_id: i64, params: &ListParams) -> Result<(Vec<UserSummary>, i64)>;

    /// Number of incoming edges of a kind
    async fn count_incoming(&self, target_id: i64, kind: RelationKind) -> Result<i64>;

    /// Number of outgoing edges of a kind
    async fn count_outgoing(&self, user_id: i64, kind: RelationKind) -> Result<i64>;
}

/// SQLx-based relation repository implementation
pub struct SqlxRelationRepository {
    pool: DynDatabasePool,
}

impl SqlxRelationRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn RelationRepository> {
        Arc::new(Self::new(pool))
    }
}

/// Which side of the edge a list query anchors on
#[derive(Clone, Copy)]
enum Direction {
    /// Rows where `target_id` is the anchor; lists `user_id`
    Incoming,
    /// Rows where `user_id` is the anchor; lists `target_id`
    Outgoing,
}

impl Direction {
    fn columns(self) -> (&'static str, &'static str) {
        match self {
            Direction::Incoming => ("target_id", "user_id"),
            Direction::Outgoing => ("user_id", "target_id"),
        }
    }
}

fn list_sql(direction: Direction) -> (String, String) {
    let (anchor, other) = direction.columns();
    let list = format!(
        r#"
        SELECT u.id, u.username, u.display_name, u.role
        FROM user_relations r
        JOIN users u ON u.id = r.{other}
        WHERE r.{anchor} = ? AND r.kind = 'follow'
        ORDER BY r.created_at DESC, r.id DESC
        LIMIT ? OFFSET ?
        "#
    );
    let count = format!(
        "SELECT COUNT(*) as count FROM user_relations WHERE {anchor} = ? AND kind = 'follow'"
    );
    (list, count)
}

fn summary_from_parts(id: i64, username: String, display_name: Option<String>, role: String) -> Result<UserSummary> {
    let role = UserRole::from_str(&role)
        .with_context(|| format!("Invalid role in database: {}", role))?;
    Ok(UserSummary {
        id,
        username,
        display_name,
        role,
    })
}

#[async_trait]
impl RelationRepository for SqlxRelationRepository {
    async fn create(&self, user_id: i64, target_id: i64, kind: RelationKind) -> Result<Relation> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                create_relation_sqlite(sqlite(&self.pool)?, user_id, target_id, kind).await
            }
            DatabaseDriver::Mysql => {
                create_relation_mysql(mysql(&self.pool)?, user_id, target_id, kind).await
            }
        }
    }

    async fn delete(&self, user_id: i64, target_id: i64, kind: RelationKind) -> Result<bool> {
        let sql = "DELETE FROM user_relations WHERE user_id = ? AND target_id = ? AND kind = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(user_id)
                .bind(target_id)
                .bind(kind.to_string())
                .execute(sqlite(&self.pool)?)
                .await
                .context("Failed to delete relation")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(user_id)
                .bind(target_id)
                .bind(kind.to_string())
                .execute(mysql(&self.pool)?)
                .await
                .context("Failed to delete relation")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn exists(&self, user_id: i64, target_id: i64, kind: RelationKind) -> Result<bool> {
        let sql = "SELECT COUNT(*) as count FROM user_relations WHERE user_id = ? AND target_id = ? AND kind = ?";
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(user_id)
                .bind(target_id)
                .bind(kind.to_string())
                .fetch_one(sqlite(&self.pool)?)
                .await
                .context("Failed to check relation")?
                .get("count"),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(user_id)
                .bind(target_id)
                .bind(kind.to_string())
                .fetch_one(mysql(&self.pool)?)
                .await
                .context("Failed to check relation")?
                .get("count"),
        };
        Ok(count > 0)
    }

    async fn delete_follows_between(&self, a: i64, b: i64) -> Result<u64> {
        let sql = r#"
            DELETE FROM user_relations
            WHERE kind = 'follow'
              AND ((user_id = ? AND target_id = ?) OR (user_id = ? AND target_id = ?))
        "#;
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(a)
                .bind(b)
                .bind(b)
                .bind(a)
                .execute(sqlite(&self.pool)?)
                .await
                .context("Failed to remove follows")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(a)
                .bind(b)
                .bind(b)
                .bind(a)
                .execute(mysql(&self.pool)?)
                .await
                .context("Failed to remove follows")?
                .rows_affected(),
        };
        Ok(affected)
    }

    async fn followers(&self, user_id: i64, params: &ListParams) -> Result<(Vec<UserSummary>, i64)> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                list_follows_sqlite(sqlite(&self.pool)?, Direction::Incoming, user_id, params).await
            }
            DatabaseDriver::Mysql => {
                list_follows_mysql(mysql(&self.pool)?, Direction::Incoming, user_id, params).await
            }
        }
    }

    async fn following(&self, user_id: i64, params: &ListParams) -> Result<(Vec<UserSummary>, i64)> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                list_follows_sqlite(sqlite(&self.pool)?, Direction::Outgoing, user_id, params).await
            }
            DatabaseDriver::Mysql => {
                list_follows_mysql(mysql(&self.pool)?, Direction::Outgoing, user_id, params).await
            }
        }
    }

    async fn count_incoming(&self, target_id: i64, kind: RelationKind) -> Result<i64> {
        self.count_edges("target_id", target_id, kind).await
    }

    async fn count_outgoing(&self, user_id: i64, kind: RelationKind) -> Result<i64> {
        self.count_edges("user_id", user_id, kind).await
    }
}

impl SqlxRelationRepository {
    async fn count_edges(&self, column: &str, id: i64, kind: RelationKind) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) as count FROM user_relations WHERE {} = ? AND kind = ?",
            column
        );
        let count = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(id)
                .bind(kind.to_string())
                .fetch_one(sqlite(&self.pool)?)
                .await
                .context("Failed to count relations")?
                .get("count"),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(id)
                .bind(kind.to_string())
                .fetch_one(mysql(&self.pool)?)
                .await
                .context("Failed to count relations")?
                .get("count"),
        };
        Ok(count)
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_relation_sqlite(
    pool: &SqlitePool,
    user_id: i64,
    target_id: i64,
    kind: RelationKind,
) -> Result<Relation> {
    let now = Utc::now();
    let result = sqlx::query(
        "INSERT INTO user_relations (user_id, target_id, kind, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(target_id)
    .bind(kind.to_string())
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create relation")?;

    Ok(Relation {
        id: result.last_insert_rowid(),
        user_id,
        target_id,
        kind,
        created_at: now,
    })
}

async fn list_follows_sqlite(
    pool: &SqlitePool,
    direction: Direction,
    anchor_id: i64,
    params: &ListParams,
) -> Result<(Vec<UserSummary>, i64)> {
    let (list, count) = list_sql(direction);
    let rows = sqlx::query(&list)
        .bind(anchor_id)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list follows")?;

    let users = rows
        .iter()
        .map(|row| {
            summary_from_parts(
                row.get("id"),
                row.get("username"),
                row.get("display_name"),
                row.get("role"),
            )
        })
        .collect::<Result<Vec<_>>>()?;

    let total: i64 = sqlx::query(&count)
        .bind(anchor_id)
        .fetch_one(pool)
        .await
        .context("Failed to count follows")?
        .get("count");

    Ok((users, total))
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_relation_mysql(
    pool: &MySqlPool,
    user_id: i64,
    target_id: i64,
    kind: RelationKind,
) -> Result<Relation> {
    let now = Utc::now();
    let result = sqlx::query(
        "INSERT INTO user_relations (user_id, target_id, kind, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(target_id)
    .bind(kind.to_string())
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create relation")?;

    Ok(Relation {
        id: result.last_insert_id() as i64,
        user_id,
        target_id,
        kind,
        created_at: now,
    })
}

async fn list_follows_mysql(
    pool: &MySqlPool,
    direction: Direction,
    anchor_id: i64,
    params: &ListParams,
) -> Result<(Vec<UserSummary>, i64)> {
    let (list, count) = list_sql(direction);
    let rows = sqlx::query(&list)
        .bind(anchor_id)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list follows")?;

    let users = rows
        .iter()
        .map(|row| {
            summary_from_parts(
                row.get("id"),
                row.get("username"),
                row.get("display_name"),
                row.get("role"),
            )
        })
        .collect::<Result<Vec<_>>>()?;

    let total: i64 = sqlx::query(&count)
        .bind(anchor_id)
        .fetch_one(pool)
        .await
        .context("Failed to count follows")?
        .get("count");

    Ok((users, total))
}

//! Session repository
//!
//! Bearer/cookie sessions. Tokens are opaque UUIDs stored as the primary key.

use crate::config::DatabaseDriver;
use crate::db::{mysql, sqlite, DynDatabasePool};
use crate::models::Session;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::sync::Arc;

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Store a new session
    async fn create(&self, session: &Session) -> Result<Session>;

    /// Get session by token
    async fn get_by_id(&self, id: &str) -> Result<Option<Session>>;

    /// Delete a session; returns whether it existed
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Delete all sessions for a user
    async fn delete_by_user(&self, user_id: i64) -> Result<u64>;

    /// Delete expired sessions
    async fn delete_expired(&self) -> Result<u64>;
}

/// SQLx-based session repository implementation
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }

    /// Run a statement with one string/int bind and return rows affected.
    async fn execute_delete(&self, sql: &str, bind: DeleteKey<'_>) -> Result<u64> {
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let query = sqlx::query(sql);
                let query = match bind {
                    DeleteKey::Token(id) => query.bind(id),
                    DeleteKey::User(id) => query.bind(id),
                    DeleteKey::Before(at) => query.bind(at),
                };
                query.execute(sqlite(&self.pool)?).await?.rows_affected()
            }
            DatabaseDriver::Mysql => {
                let query = sqlx::query(sql);
                let query = match bind {
                    DeleteKey::Token(id) => query.bind(id),
                    DeleteKey::User(id) => query.bind(id),
                    DeleteKey::Before(at) => query.bind(at),
                };
                query.execute(mysql(&self.pool)?).await?.rows_affected()
            }
        };
        Ok(affected)
    }
}

enum DeleteKey<'a> {
    Token(&'a str),
    User(i64),
    Before(chrono::DateTime<Utc>),
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn create(&self, session: &Session) -> Result<Session> {
        let sql = "INSERT INTO sessions (id, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(&session.id)
                    .bind(session.user_id)
                    .bind(session.expires_at)
                    .bind(session.created_at)
                    .execute(sqlite(&self.pool)?)
                    .await
                    .context("Failed to create session")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(&session.id)
                    .bind(session.user_id)
                    .bind(session.expires_at)
                    .bind(session.created_at)
                    .execute(mysql(&self.pool)?)
                    .await
                    .context("Failed to create session")?;
            }
        }
        Ok(session.clone())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        let sql = "SELECT id, user_id, expires_at, created_at FROM sessions WHERE id = ?";
        let session = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(id)
                .fetch_optional(sqlite(&self.pool)?)
                .await
                .context("Failed to get session by ID")?
                .map(|row| Session {
                    id: row.get("id"),
                    user_id: row.get("user_id"),
                    expires_at: row.get("expires_at"),
                    created_at: row.get("created_at"),
                }),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(id)
                .fetch_optional(mysql(&self.pool)?)
                .await
                .context("Failed to get session by ID")?
                .map(|row| Session {
                    id: row.get("id"),
                    user_id: row.get("user_id"),
                    expires_at: row.get("expires_at"),
                    created_at: row.get("created_at"),
                }),
        };
        Ok(session)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let affected = self
            .execute_delete("DELETE FROM sessions WHERE id = ?", DeleteKey::Token(id))
            .await
            .context("Failed to delete session")?;
        Ok(affected > 0)
    }

    async fn delete_by_user(&self, user_id: i64) -> Result<u64> {
        self.execute_delete("DELETE FROM sessions WHERE user_id = ?", DeleteKey::User(user_id))
            .await
            .context("Failed to delete sessions by user")
    }

    async fn delete_expired(&self) -> Result<u64> {
        self.execute_delete("DELETE FROM sessions WHERE expires_at < ?", DeleteKey::Before(Utc::now()))
            .await
            .context("Failed to delete expired sessions")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{insert_user, setup_pool};
    use crate::models::UserRole;
    use chrono::Duration;
    use uuid::Uuid;

    fn session_for(user_id: i64, expires_in_days: i64) -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4().to_string(),
            user_id,
            expires_at: now + Duration::days(expires_in_days),
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let pool = setup_pool().await;
        let user_id = insert_user(&pool, "sess", UserRole::Learner).await;
        let repo = SqlxSessionRepository::new(pool);

        let session = repo.create(&session_for(user_id, 7)).await.unwrap();
        let found = repo.get_by_id(&session.id).await.unwrap().expect("Session not found");
        assert_eq!(found.user_id, user_id);
        assert!(!found.is_expired());

        assert!(repo.delete(&session.id).await.unwrap());
        assert!(!repo.delete(&session.id).await.unwrap());
        assert!(repo.get_by_id(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_expired_and_by_user() {
        let pool = setup_pool().await;
        let user_id = insert_user(&pool, "sess2", UserRole::Learner).await;
        let repo = SqlxSessionRepository::new(pool);

        repo.create(&session_for(user_id, -1)).await.unwrap();
        let live = repo.create(&session_for(user_id, 7)).await.unwrap();

        assert_eq!(repo.delete_expired().await.unwrap(), 1);
        assert!(repo.get_by_id(&live.id).await.unwrap().is_some());

        assert_eq!(repo.delete_by_user(user_id).await.unwrap(), 1);
        assert!(repo.get_by_id(&live.id).await.unwrap().is_none());
    }
}

//! User repository
//!
//! Database operations for users.
//!
//! This module provides:
//! - `UserRepository` trait defining the interface for user data access
//! - `SqlxUserRepository` implementing the trait for SQLite and MySQL

use crate::config::DatabaseDriver;
use crate::db::{mysql, sqlite, DynDatabasePool};
use crate::models::{User, UserRole, UserStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

const USER_COLUMNS: &str = "id, username, email, password_hash, display_name, role, status, alex_points, created_at, updated_at";

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user
    async fn create(&self, user: &User) -> Result<User>;

    /// Get user by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Get user by username
    async fn get_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Get user by email
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Persist email, display name, role, status and password hash
    async fn update(&self, user: &User) -> Result<User>;

    /// Count total users
    async fn count(&self) -> Result<i64>;

    /// Count users grouped by role
    async fn count_by_role(&self) -> Result<Vec<(UserRole, i64)>>;

    /// Count users registered at or after `since`
    async fn count_created_since(&self, since: DateTime<Utc>) -> Result<i64>;
}

/// SQLx-based user repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    /// Create a new SQLx user repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_user_sqlite(sqlite(&self.pool)?, user).await,
            DatabaseDriver::Mysql => create_user_mysql(mysql(&self.pool)?, user).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_user_sqlite(sqlite(&self.pool)?, "id", UserKey::Id(id)).await,
            DatabaseDriver::Mysql => get_user_mysql(mysql(&self.pool)?, "id", UserKey::Id(id)).await,
        }
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let key = UserKey::Text(username);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_user_sqlite(sqlite(&self.pool)?, "username", key).await,
            DatabaseDriver::Mysql => get_user_mysql(mysql(&self.pool)?, "username", key).await,
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let key = UserKey::Text(email);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_user_sqlite(sqlite(&self.pool)?, "email", key).await,
            DatabaseDriver::Mysql => get_user_mysql(mysql(&self.pool)?, "email", key).await,
        }
    }

    async fn update(&self, user: &User) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => update_user_sqlite(sqlite(&self.pool)?, user).await,
            DatabaseDriver::Mysql => update_user_mysql(mysql(&self.pool)?, user).await,
        }
    }

    async fn count(&self) -> Result<i64> {
        let sql = "SELECT COUNT(*) as count FROM users";
        let row = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .fetch_one(sqlite(&self.pool)?)
                    .await
                    .context("Failed to count users")?
                    .get::<i64, _>("count")
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .fetch_one(mysql(&self.pool)?)
                    .await
                    .context("Failed to count users")?
                    .get::<i64, _>("count")
            }
        };
        Ok(row)
    }

    async fn count_by_role(&self) -> Result<Vec<(UserRole, i64)>> {
        let sql = "SELECT role, COUNT(*) as count FROM users GROUP BY role";
        let pairs: Vec<(String, i64)> = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .fetch_all(sqlite(&self.pool)?)
                .await
                .context("Failed to count users by role")?
                .iter()
                .map(|row| (row.get("role"), row.get("count")))
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .fetch_all(mysql(&self.pool)?)
                .await
                .context("Failed to count users by role")?
                .iter()
                .map(|row| (row.get("role"), row.get("count")))
                .collect(),
        };

        pairs
            .into_iter()
            .map(|(role, count)| -> Result<(UserRole, i64)> {
                let role = UserRole::from_str(&role)
                    .with_context(|| format!("Invalid role in database: {}", role))?;
                Ok((role, count))
            })
            .collect()
    }

    async fn count_created_since(&self, since: DateTime<Utc>) -> Result<i64> {
        let sql = "SELECT COUNT(*) as count FROM users WHERE created_at >= ?";
        let count = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(since)
                .fetch_one(sqlite(&self.pool)?)
                .await
                .context("Failed to count new users")?
                .get::<i64, _>("count"),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(since)
                .fetch_one(mysql(&self.pool)?)
                .await
                .context("Failed to count new users")?
                .get::<i64, _>("count"),
        };
        Ok(count)
    }
}

/// Lookup value for single-user queries
#[derive(Clone, Copy)]
enum UserKey<'a> {
    Id(i64),
    Text(&'a str),
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_user_sqlite(pool: &SqlitePool, user: &User) -> Result<User> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO users (username, email, password_hash, display_name, role, status, alex_points, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.display_name)
    .bind(user.role.to_string())
    .bind(user.status.to_string())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create user")?;

    Ok(User {
        id: result.last_insert_rowid(),
        alex_points: 0,
        created_at: now,
        updated_at: now,
        ..user.clone()
    })
}

async fn get_user_sqlite(pool: &SqlitePool, column: &str, key: UserKey<'_>) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE {} = ?", USER_COLUMNS, column);
    let query = sqlx::query(&sql);
    let query = match key {
        UserKey::Id(id) => query.bind(id),
        UserKey::Text(text) => query.bind(text),
    };

    let row = query
        .fetch_optional(pool)
        .await
        .with_context(|| format!("Failed to get user by {}", column))?;

    row.map(|row| row_to_user_sqlite(&row)).transpose()
}

async fn update_user_sqlite(pool: &SqlitePool, user: &User) -> Result<User> {
    sqlx::query(
        r#"
        UPDATE users
        SET email = ?, password_hash = ?, display_name = ?, role = ?, status = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.display_name)
    .bind(user.role.to_string())
    .bind(user.status.to_string())
    .bind(Utc::now())
    .bind(user.id)
    .execute(pool)
    .await
    .context("Failed to update user")?;

    get_user_sqlite(pool, "id", UserKey::Id(user.id))
        .await?
        .ok_or_else(|| anyhow::anyhow!("User not found after update"))
}

pub(crate) fn row_to_user_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<User> {
    let role_str: String = row.get("role");
    let role = UserRole::from_str(&role_str)
        .with_context(|| format!("Invalid role in database: {}", role_str))?;
    let status_str: String = row.get("status");
    let status = UserStatus::from_str(&status_str).unwrap_or_default();

    Ok(User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        display_name: row.get("display_name"),
        role,
        status,
        alex_points: row.get("alex_points"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_user_mysql(pool: &MySqlPool, user: &User) -> Result<User> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO users (username, email, password_hash, display_name, role, status, alex_points, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.display_name)
    .bind(user.role.to_string())
    .bind(user.status.to_string())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create user")?;

    Ok(User {
        id: result.last_insert_id() as i64,
        alex_points: 0,
        created_at: now,
        updated_at: now,
        ..user.clone()
    })
}

async fn get_user_mysql(pool: &MySqlPool, column: &str, key: UserKey<'_>) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE {} = ?", USER_COLUMNS, column);
    let query = sqlx::query(&sql);
    let query = match key {
        UserKey::Id(id) => query.bind(id),
        UserKey::Text(text) => query.bind(text),
    };

    let row = query
        .fetch_optional(pool)
        .await
        .with_context(|| format!("Failed to get user by {}", column))?;

    row.map(|row| row_to_user_mysql(&row)).transpose()
}

async fn update_user_mysql(pool: &MySqlPool, user: &User) -> Result<User> {
    sqlx::query(
        r#"
        UPDATE users
        SET email = ?, password_hash = ?, display_name = ?, role = ?, status = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.display_name)
    .bind(user.role.to_string())
    .bind(user.status.to_string())
    .bind(Utc::now())
    .bind(user.id)
    .execute(pool)
    .await
    .context("Failed to update user")?;

    get_user_mysql(pool, "id", UserKey::Id(user.id))
        .await?
        .ok_or_else(|| anyhow::anyhow!("User not found after update"))
}

pub(crate) fn row_to_user_mysql(row: &sqlx::mysql::MySqlRow) -> Result<User> {
    let role_str: String = row.get("role");
    let role = UserRole::from_str(&role_str)
        .with_context(|| format!("Invalid role in database: {}", role_str))?;
    let status_str: String = row.get("status");
    let status = UserStatus::from_str(&status_str).unwrap_or_default();

    Ok(User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        display_name: row.get("display_name"),
        role,
        status,
        alex_points: row.get("alex_points"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    async fn setup_test_repo() -> SqlxUserRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxUserRepository::new(pool)
    }

    fn test_user(username: &str, role: UserRole) -> User {
        User::new(
            username.to_string(),
            format!("{}@example.com", username),
            "hash".to_string(),
            role,
        )
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let repo = setup_test_repo().await;
        let created = repo
            .create(&test_user("ada", UserRole::Educator))
            .await
            .expect("Failed to create user");
        assert!(created.id > 0);

        let by_id = repo.get_by_id(created.id).await.unwrap().expect("User not found");
        assert_eq!(by_id.username, "ada");
        assert_eq!(by_id.role, UserRole::Educator);
        assert_eq!(by_id.alex_points, 0);

        let by_email = repo.get_by_email("ada@example.com").await.unwrap();
        assert_eq!(by_email.map(|u| u.id), Some(created.id));
        assert!(repo.get_by_username("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unique_username_is_detected() {
        let repo = setup_test_repo().await;
        repo.create(&test_user("dup", UserRole::Learner)).await.unwrap();

        let mut other = test_user("dup", UserRole::Learner);
        other.email = "other@example.com".to_string();
        let err = repo.create(&other).await.expect_err("duplicate should fail");
        assert!(crate::db::is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_update_profile_fields() {
        let repo = setup_test_repo().await;
        let mut user = repo.create(&test_user("grace", UserRole::Learner)).await.unwrap();

        user.display_name = Some("Grace H".to_string());
        user.status = UserStatus::Banned;
        let updated = repo.update(&user).await.unwrap();

        assert_eq!(updated.display_name.as_deref(), Some("Grace H"));
        assert!(updated.is_banned());
    }

    #[tokio::test]
    async fn test_counts() {
        let repo = setup_test_repo().await;
        repo.create(&test_user("a_admin", UserRole::Admin)).await.unwrap();
        repo.create(&test_user("e_one", UserRole::Educator)).await.unwrap();
        repo.create(&test_user("l_one", UserRole::Learner)).await.unwrap();
        repo.create(&test_user("l_two", UserRole::Learner)).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 4);

        let by_role = repo.count_by_role().await.unwrap();
        let learners = by_role
            .iter()
            .find(|(role, _)| *role == UserRole::Learner)
            .map(|(_, n)| *n);
        assert_eq!(learners, Some(2));

        let since = Utc::now() - chrono::Duration::days(7);
        assert_eq!(repo.count_created_since(since).await.unwrap(), 4);
        let future = Utc::now() + chrono::Duration::days(1);
        assert_eq!(repo.count_created_since(future).await.unwrap(), 0);
    }
}

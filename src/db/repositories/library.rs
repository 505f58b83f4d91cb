//! Library repository
//!
//! Libraries, their ordered items and their followers (bookmarks).
//! Item positions are kept dense: appends take `MAX(position) + 1` and
//! removals shift the tail down, both inside one transaction.

use crate::config::DatabaseDriver;
use crate::db::{mysql, sqlite, DynDatabasePool};
use crate::models::{
    AddLibraryItemInput, ApprovalStatus, ContentType, Library, LibraryItem, ListParams,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

const LIBRARY_COLUMNS: &str = "id, owner_id, title, description, approval_status, rejection_reason, approved_by, approved_at, created_at, updated_at";
const ITEM_COLUMNS: &str = "id, library_id, content_type, content_id, title, url, position, created_at";

/// Filter for library listings
#[derive(Debug, Clone, Copy, Default)]
pub struct LibraryFilter {
    pub owner_id: Option<i64>,
    pub status: Option<ApprovalStatus>,
}

impl LibraryFilter {
    fn where_clause(&self) -> String {
        let mut conditions = Vec::new();
        if self.owner_id.is_some() {
            conditions.push("owner_id = ?");
        }
        if self.status.is_some() {
            conditions.push("approval_status = ?");
        }
        if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        }
    }
}

/// Approval state change written by `set_approval`
#[derive(Debug, Clone)]
pub struct ApprovalChange {
    pub to: ApprovalStatus,
    pub rejection_reason: Option<String>,
    pub approved_by: Option<i64>,
    pub approved_at: Option<DateTime<Utc>>,
}

/// Library repository trait
#[async_trait]
pub trait LibraryRepository: Send + Sync {
    async fn create(&self, owner_id: i64, title: &str, description: Option<&str>) -> Result<Library>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Library>>;

    /// Update title and description
    async fn update(&self, id: i64, title: &str, description: Option<&str>) -> Result<Library>;

    /// Delete a library with its items and followers
    async fn delete(&self, id: i64) -> Result<bool>;

    /// List libraries, newest first
    async fn list(&self, filter: LibraryFilter, params: &ListParams) -> Result<(Vec<Library>, i64)>;

    /// Change approval state only if the library is currently in `from`
    async fn set_approval(&self, id: i64, from: ApprovalStatus, change: &ApprovalChange) -> Result<bool>;

    async fn count_by_status(&self) -> Result<Vec<(ApprovalStatus, i64)>>;

    /// Items ordered by position
    async fn items(&self, library_id: i64) -> Result<Vec<LibraryItem>>;

    async fn count_items(&self, library_id: i64) -> Result<i64>;

    /// Append an item at the next position
    async fn add_item(&self, library_id: i64, input: &AddLibraryItemInput) -> Result<LibraryItem>;

    async fn item_exists(&self, library_id: i64, content_type: ContentType, content_id: i64) -> Result<bool>;

    /// Remove an item and close the gap in positions
    async fn remove_item(&self, library_id: i64, item_id: i64) -> Result<bool>;

    /// Bookmark a library. Fails with a unique violation if already followed.
    async fn follow(&self, library_id: i64, user_id: i64) -> Result<()>;

    async fn unfollow(&self, library_id: i64, user_id: i64) -> Result<bool>;

    async fn follower_count(&self, library_id: i64) -> Result<i64>;
}

/// SQLx-based library repository implementation
pub struct SqlxLibraryRepository {
    pool: DynDatabasePool,
}

impl SqlxLibraryRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn LibraryRepository> {
        Arc::new(Self::new(pool))
    }

    async fn count_where(&self, sql: &str, id: i64) -> Result<i64> {
        let count = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(id)
                .fetch_one(sqlite(&self.pool)?)
                .await?
                .get("count"),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(id)
                .fetch_one(mysql(&self.pool)?)
                .await?
                .get("count"),
        };
        Ok(count)
    }
}

#[async_trait]
impl LibraryRepository for SqlxLibraryRepository {
    async fn create(&self, owner_id: i64, title: &str, description: Option<&str>) -> Result<Library> {
        let now = Utc::now();
        let sql = r#"
            INSERT INTO libraries (owner_id, title, description, approval_status, created_at, updated_at)
            VALUES (?, ?, ?, 'pending', ?, ?)
        "#;
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(owner_id)
                .bind(title)
                .bind(description)
                .bind(now)
                .bind(now)
                .execute(sqlite(&self.pool)?)
                .await
                .context("Failed to create library")?
                .last_insert_rowid(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(owner_id)
                .bind(title)
                .bind(description)
                .bind(now)
                .bind(now)
                .execute(mysql(&self.pool)?)
                .await
                .context("Failed to create library")?
                .last_insert_id() as i64,
        };

        Ok(Library {
            id,
            owner_id,
            title: title.to_string(),
            description: description.map(str::to_string),
            approval_status: ApprovalStatus::Pending,
            rejection_reason: None,
            approved_by: None,
            approved_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Library>> {
        let sql = format!("SELECT {} FROM libraries WHERE id = ?", LIBRARY_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(sqlite(&self.pool)?)
                .await
                .context("Failed to get library")?
                .map(|row| row_to_library_sqlite(&row))
                .transpose(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(mysql(&self.pool)?)
                .await
                .context("Failed to get library")?
                .map(|row| row_to_library_mysql(&row))
                .transpose(),
        }
    }

    async fn update(&self, id: i64, title: &str, description: Option<&str>) -> Result<Library> {
        let sql = "UPDATE libraries SET title = ?, description = ?, updated_at = ? WHERE id = ?";
        let now = Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(title)
                    .bind(description)
                    .bind(now)
                    .bind(id)
                    .execute(sqlite(&self.pool)?)
                    .await
                    .context("Failed to update library")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(title)
                    .bind(description)
                    .bind(now)
                    .bind(id)
                    .execute(mysql(&self.pool)?)
                    .await
                    .context("Failed to update library")?;
            }
        }

        self.get_by_id(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Library not found after update"))
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let sql = "DELETE FROM libraries WHERE id = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(id)
                .execute(sqlite(&self.pool)?)
                .await
                .context("Failed to delete library")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(id)
                .execute(mysql(&self.pool)?)
                .await
                .context("Failed to delete library")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn list(&self, filter: LibraryFilter, params: &ListParams) -> Result<(Vec<Library>, i64)> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_libraries_sqlite(sqlite(&self.pool)?, filter, params).await,
            DatabaseDriver::Mysql => list_libraries_mysql(mysql(&self.pool)?, filter, params).await,
        }
    }

    async fn set_approval(&self, id: i64, from: ApprovalStatus, change: &ApprovalChange) -> Result<bool> {
        let sql = r#"
            UPDATE libraries
            SET approval_status = ?, rejection_reason = ?, approved_by = ?, approved_at = ?, updated_at = ?
            WHERE id = ? AND approval_status = ?
        "#;
        let now = Utc::now();
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(change.to.to_string())
                .bind(&change.rejection_reason)
                .bind(change.approved_by)
                .bind(change.approved_at)
                .bind(now)
                .bind(id)
                .bind(from.to_string())
                .execute(sqlite(&self.pool)?)
                .await
                .context("Failed to update library approval")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(change.to.to_string())
                .bind(&change.rejection_reason)
                .bind(change.approved_by)
                .bind(change.approved_at)
                .bind(now)
                .bind(id)
                .bind(from.to_string())
                .execute(mysql(&self.pool)?)
                .await
                .context("Failed to update library approval")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn count_by_status(&self) -> Result<Vec<(ApprovalStatus, i64)>> {
        let sql = "SELECT approval_status, COUNT(*) as count FROM libraries GROUP BY approval_status";
        let pairs: Vec<(String, i64)> = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .fetch_all(sqlite(&self.pool)?)
                .await
                .context("Failed to count libraries")?
                .iter()
                .map(|row| (row.get("approval_status"), row.get("count")))
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .fetch_all(mysql(&self.pool)?)
                .await
                .context("Failed to count libraries")?
                .iter()
                .map(|row| (row.get("approval_status"), row.get("count")))
                .collect(),
        };
        pairs
            .into_iter()
            .map(|(status, count)| -> Result<(ApprovalStatus, i64)> {
                Ok((ApprovalStatus::from_str(&status)?, count))
            })
            .collect()
    }

    async fn items(&self, library_id: i64) -> Result<Vec<LibraryItem>> {
        let sql = format!(
            "SELECT {} FROM library_items WHERE library_id = ? ORDER BY position ASC",
            ITEM_COLUMNS
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(library_id)
                .fetch_all(sqlite(&self.pool)?)
                .await
                .context("Failed to list library items")?
                .iter()
                .map(row_to_item_sqlite)
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(library_id)
                .fetch_all(mysql(&self.pool)?)
                .await
                .context("Failed to list library items")?
                .iter()
                .map(row_to_item_mysql)
                .collect(),
        }
    }

    async fn count_items(&self, library_id: i64) -> Result<i64> {
        self.count_where(
            "SELECT COUNT(*) as count FROM library_items WHERE library_id = ?",
            library_id,
        )
        .await
        .context("Failed to count library items")
    }

    async fn add_item(&self, library_id: i64, input: &AddLibraryItemInput) -> Result<LibraryItem> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => add_item_sqlite(sqlite(&self.pool)?, library_id, input).await,
            DatabaseDriver::Mysql => add_item_mysql(mysql(&self.pool)?, library_id, input).await,
        }
    }

    async fn item_exists(&self, library_id: i64, content_type: ContentType, content_id: i64) -> Result<bool> {
        let sql = r#"
            SELECT COUNT(*) as count FROM library_items
            WHERE library_id = ? AND content_type = ? AND content_id = ?
        "#;
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(library_id)
                .bind(content_type.to_string())
                .bind(content_id)
                .fetch_one(sqlite(&self.pool)?)
                .await
                .context("Failed to check library item")?
                .get("count"),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(library_id)
                .bind(content_type.to_string())
                .bind(content_id)
                .fetch_one(mysql(&self.pool)?)
                .await
                .context("Failed to check library item")?
                .get("count"),
        };
        Ok(count > 0)
    }

    async fn remove_item(&self, library_id: i64, item_id: i64) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => remove_item_sqlite(sqlite(&self.pool)?, library_id, item_id).await,
            DatabaseDriver::Mysql => remove_item_mysql(mysql(&self.pool)?, library_id, item_id).await,
        }
    }

    async fn follow(&self, library_id: i64, user_id: i64) -> Result<()> {
        let sql = "INSERT INTO library_followers (library_id, user_id, created_at) VALUES (?, ?, ?)";
        let now = Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(library_id)
                    .bind(user_id)
                    .bind(now)
                    .execute(sqlite(&self.pool)?)
                    .await
                    .context("Failed to follow library")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(library_id)
                    .bind(user_id)
                    .bind(now)
                    .execute(mysql(&self.pool)?)
                    .await
                    .context("Failed to follow library")?;
            }
        }
        Ok(())
    }

    async fn unfollow(&self, library_id: i64, user_id: i64) -> Result<bool> {
        let sql = "DELETE FROM library_followers WHERE library_id = ? AND user_id = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(library_id)
                .bind(user_id)
                .execute(sqlite(&self.pool)?)
                .await
                .context("Failed to unfollow library")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(library_id)
                .bind(user_id)
                .execute(mysql(&self.pool)?)
                .await
                .context("Failed to unfollow library")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn follower_count(&self, library_id: i64) -> Result<i64> {
        self.count_where(
            "SELECT COUNT(*) as count FROM library_followers WHERE library_id = ?",
            library_id,
        )
        .await
        .context("Failed to count library followers")
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn list_libraries_sqlite(
    pool: &SqlitePool,
    filter: LibraryFilter,
    params: &ListParams,
) -> Result<(Vec<Library>, i64)> {
    let where_clause = filter.where_clause();
    let sql = format!(
        "SELECT {} FROM libraries {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        LIBRARY_COLUMNS, where_clause
    );
    let count_sql = format!("SELECT COUNT(*) as count FROM libraries {}", where_clause);

    let mut query = sqlx::query(&sql);
    let mut count_query = sqlx::query(&count_sql);
    if let Some(owner_id) = filter.owner_id {
        query = query.bind(owner_id);
        count_query = count_query.bind(owner_id);
    }
    if let Some(status) = filter.status {
        query = query.bind(status.to_string());
        count_query = count_query.bind(status.to_string());
    }

    let libraries = query
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list libraries")?
        .iter()
        .map(row_to_library_sqlite)
        .collect::<Result<Vec<_>>>()?;

    let total: i64 = count_query
        .fetch_one(pool)
        .await
        .context("Failed to count libraries")?
        .get("count");

    Ok((libraries, total))
}

async fn add_item_sqlite(pool: &SqlitePool, library_id: i64, input: &AddLibraryItemInput) -> Result<LibraryItem> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let position: i64 = sqlx::query(
        "SELECT COALESCE(MAX(position) + 1, 0) as next FROM library_items WHERE library_id = ?",
    )
    .bind(library_id)
    .fetch_one(&mut *tx)
    .await
    .context("Failed to compute item position")?
    .get("next");

    let id = sqlx::query(
        r#"
        INSERT INTO library_items (library_id, content_type, content_id, title, url, position, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(library_id)
    .bind(input.content_type.to_string())
    .bind(input.content_id)
    .bind(&input.title)
    .bind(&input.url)
    .bind(position)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("Failed to add library item")?
    .last_insert_rowid();

    sqlx::query("UPDATE libraries SET updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(library_id)
        .execute(&mut *tx)
        .await
        .context("Failed to touch library")?;

    tx.commit().await.context("Failed to commit library item")?;

    Ok(new_item(id, library_id, input, position, now))
}

async fn remove_item_sqlite(pool: &SqlitePool, library_id: i64, item_id: i64) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let position: Option<i64> =
        sqlx::query("SELECT position FROM library_items WHERE id = ? AND library_id = ?")
            .bind(item_id)
            .bind(library_id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to get library item")?
            .map(|row| row.get("position"));

    let Some(position) = position else {
        return Ok(false);
    };

    sqlx::query("DELETE FROM library_items WHERE id = ?")
        .bind(item_id)
        .execute(&mut *tx)
        .await
        .context("Failed to remove library item")?;

    sqlx::query("UPDATE library_items SET position = position - 1 WHERE library_id = ? AND position > ?")
        .bind(library_id)
        .bind(position)
        .execute(&mut *tx)
        .await
        .context("Failed to compact item positions")?;

    tx.commit().await.context("Failed to commit item removal")?;
    Ok(true)
}

fn row_to_library_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Library> {
    let status: String = row.get("approval_status");
    Ok(Library {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        description: row.get("description"),
        approval_status: ApprovalStatus::from_str(&status)?,
        rejection_reason: row.get("rejection_reason"),
        approved_by: row.get("approved_by"),
        approved_at: row.get("approved_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_item_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<LibraryItem> {
    let content_type: String = row.get("content_type");
    Ok(LibraryItem {
        id: row.get("id"),
        library_id: row.get("library_id"),
        content_type: ContentType::from_str(&content_type)?,
        content_id: row.get("content_id"),
        title: row.get("title"),
        url: row.get("url"),
        position: row.get("position"),
        created_at: row.get("created_at"),
    })
}

fn new_item(id: i64, library_id: i64, input: &AddLibraryItemInput, position: i64, now: DateTime<Utc>) -> LibraryItem {
    LibraryItem {
        id,
        library_id,
        content_type: input.content_type,
        content_id: input.content_id,
        title: input.title.clone(),
        url: input.url.clone(),
        position,
        created_at: now,
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn list_libraries_mysql(
    pool: &MySqlPool,
    filter: LibraryFilter,
    params: &ListParams,
) -> Result<(Vec<Library>, i64)> {
    let where_clause = filter.where_clause();
    let sql = format!(
        "SELECT {} FROM libraries {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        LIBRARY_COLUMNS, where_clause
    );
    let count_sql = format!("SELECT COUNT(*) as count FROM libraries {}", where_clause);

    let mut query = sqlx::query(&sql);
    let mut count_query = sqlx::query(&count_sql);
    if let Some(owner_id) = filter.owner_id {
        query = query.bind(owner_id);
        count_query = count_query.bind(owner_id);
    }
    if let Some(status) = filter.status {
        query = query.bind(status.to_string());
        count_query = count_query.bind(status.to_string());
    }

    let libraries = query
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list libraries")?
        .iter()
        .map(row_to_library_mysql)
        .collect::<Result<Vec<_>>>()?;

    let total: i64 = count_query
        .fetch_one(pool)
        .await
        .context("Failed to count libraries")?
        .get("count");

    Ok((libraries, total))
}

async fn add_item_mysql(pool: &MySqlPool, library_id: i64, input: &AddLibraryItemInput) -> Result<LibraryItem> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    // Lock the parent row so concurrent appends serialize on it
    sqlx::query("SELECT id FROM libraries WHERE id = ? FOR UPDATE")
        .bind(library_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to lock library")?;

    let position: i64 = sqlx::query(
        "SELECT CAST(COALESCE(MAX(position) + 1, 0) AS SIGNED) as next FROM library_items WHERE library_id = ?",
    )
    .bind(library_id)
    .fetch_one(&mut *tx)
    .await
    .context("Failed to compute item position")?
    .get("next");

    let id = sqlx::query(
        r#"
        INSERT INTO library_items (library_id, content_type, content_id, title, url, position, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(library_id)
    .bind(input.content_type.to_string())
    .bind(input.content_id)
    .bind(&input.title)
    .bind(&input.url)
    .bind(position)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("Failed to add library item")?
    .last_insert_id() as i64;

    sqlx::query("UPDATE libraries SET updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(library_id)
        .execute(&mut *tx)
        .await
        .context("Failed to touch library")?;

    tx.commit().await.context("Failed to commit library item")?;

    Ok(new_item(id, library_id, input, position, now))
}

async fn remove_item_mysql(pool: &MySqlPool, library_id: i64, item_id: i64) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let position: Option<i64> =
        sqlx::query("SELECT position FROM library_items WHERE id = ? AND library_id = ? FOR UPDATE")
            .bind(item_id)
            .bind(library_id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to get library item")?
            .map(|row| row.get("position"));

    let Some(position) = position else {
        return Ok(false);
    };

    sqlx::query("DELETE FROM library_items WHERE id = ?")
        .bind(item_id)
        .execute(&mut *tx)
        .await
        .context("Failed to remove library item")?;

    sqlx::query("UPDATE library_items SET position = position - 1 WHERE library_id = ? AND position > ?")
        .bind(library_id)
        .bind(position)
        .execute(&mut *tx)
        .await
        .context("Failed to compact item positions")?;

    tx.commit().await.context("Failed to commit item removal")?;
    Ok(true)
}

fn row_to_library_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Library> {
    let status: String = row.get("approval_status");
    Ok(Library {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        description: row.get("description"),
        approval_status: ApprovalStatus::from_str(&status)?,
        rejection_reason: row.get("rejection_reason"),
        approved_by: row.get("approved_by"),
        approved_at: row.get("approved_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_item_mysql(row: &sqlx::mysql::MySqlRow) -> Result<LibraryItem> {
    let content_type: String = row.get("content_type");
    Ok(LibraryItem {
        id: row.get("id"),
        library_id: row.get("library_id"),
        content_type: ContentType::from_str(&content_type)?,
        content_id: row.get("content_id"),
        title: row.get("title"),
        url: row.get("url"),
        position: row.get("position"),
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{insert_user, setup_pool};
    use crate::models::UserRole;

    fn item(title: &str, content_id: i64) -> AddLibraryItemInput {
        AddLibraryItemInput {
            content_type: ContentType::Article,
            content_id: Some(content_id),
            title: title.to_string(),
            url: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_list_by_filter() {
        let pool = setup_pool().await;
        let owner = insert_user(&pool, "curator", UserRole::Educator).await;
        let repo = SqlxLibraryRepository::new(pool);

        let lib = repo.create(owner, "Rust", Some("systems")).await.unwrap();
        repo.create(owner, "Go", None).await.unwrap();
        assert_eq!(lib.approval_status, ApprovalStatus::Pending);

        let mine = LibraryFilter {
            owner_id: Some(owner),
            status: None,
        };
        let (libs, total) = repo.list(mine, &ListParams::default()).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(libs.len(), 2);

        let public = LibraryFilter {
            owner_id: None,
            status: Some(ApprovalStatus::Approved),
        };
        let (_, total) = repo.list(public, &ListParams::default()).await.unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_items_positions_stay_dense() {
        let pool = setup_pool().await;
        let owner = insert_user(&pool, "curator2", UserRole::Educator).await;
        let repo = SqlxLibraryRepository::new(pool);
        let lib = repo.create(owner, "Reading", None).await.unwrap();

        let a = repo.add_item(lib.id, &item("a", 1)).await.unwrap();
        let b = repo.add_item(lib.id, &item("b", 2)).await.unwrap();
        let c = repo.add_item(lib.id, &item("c", 3)).await.unwrap();
        assert_eq!((a.position, b.position, c.position), (0, 1, 2));
        assert!(repo.item_exists(lib.id, ContentType::Article, 2).await.unwrap());

        assert!(repo.remove_item(lib.id, b.id).await.unwrap());
        assert!(!repo.remove_item(lib.id, b.id).await.unwrap());

        let items = repo.items(lib.id).await.unwrap();
        let positions: Vec<(String, i64)> = items.into_iter().map(|i| (i.title, i.position)).collect();
        assert_eq!(positions, vec![("a".to_string(), 0), ("c".to_string(), 1)]);
        assert_eq!(repo.count_items(lib.id).await.unwrap(), 2);

        let d = repo.add_item(lib.id, &item("d", 4)).await.unwrap();
        assert_eq!(d.position, 2);
    }

    #[tokio::test]
    async fn test_set_approval_is_guarded_by_current_status() {
        let pool = setup_pool().await;
        let owner = insert_user(&pool, "curator3", UserRole::Educator).await;
        let admin = insert_user(&pool, "boss", UserRole::Admin).await;
        let repo = SqlxLibraryRepository::new(pool);
        let lib = repo.create(owner, "Math", None).await.unwrap();

        let approve = ApprovalChange {
            to: ApprovalStatus::Approved,
            rejection_reason: None,
            approved_by: Some(admin),
            approved_at: Some(Utc::now()),
        };
        assert!(repo.set_approval(lib.id, ApprovalStatus::Pending, &approve).await.unwrap());
        assert!(!repo.set_approval(lib.id, ApprovalStatus::Pending, &approve).await.unwrap());

        let stored = repo.get_by_id(lib.id).await.unwrap().unwrap();
        assert!(stored.is_public());
        assert_eq!(stored.approved_by, Some(admin));

        let counts = repo.count_by_status().await.unwrap();
        assert_eq!(counts, vec![(ApprovalStatus::Approved, 1)]);
    }

    #[tokio::test]
    async fn test_followers_and_delete_cascade() {
        let pool = setup_pool().await;
        let owner = insert_user(&pool, "curator4", UserRole::Educator).await;
        let reader = insert_user(&pool, "reader", UserRole::Learner).await;
        let repo = SqlxLibraryRepository::new(pool);
        let lib = repo.create(owner, "Art", None).await.unwrap();

        repo.follow(lib.id, reader).await.unwrap();
        let err = repo.follow(lib.id, reader).await.unwrap_err();
        assert!(crate::db::is_unique_violation(&err));
        assert_eq!(repo.follower_count(lib.id).await.unwrap(), 1);

        repo.add_item(lib.id, &item("x", 9)).await.unwrap();
        assert!(repo.delete(lib.id).await.unwrap());
        assert!(repo.get_by_id(lib.id).await.unwrap().is_none());
        assert_eq!(repo.count_items(lib.id).await.unwrap(), 0);
        assert_eq!(repo.follower_count(lib.id).await.unwrap(), 0);

        assert!(!repo.unfollow(lib.id, reader).await.unwrap());
    }
}

//! Course and enrollment repository

use crate::config::DatabaseDriver;
use crate::db::{mysql, sqlite, DynDatabasePool};
use crate::models::{Course, CreateCourseInput, Enrollment, ListParams};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

const COURSE_COLUMNS: &str = "id, educator_id, title, description, price, is_published, created_at, updated_at";

/// Filter for course listings
#[derive(Debug, Clone, Copy, Default)]
pub struct CourseFilter {
    pub educator_id: Option<i64>,
    pub published_only: bool,
}

impl CourseFilter {
    fn where_clause(&self) -> String {
        let mut conditions = Vec::new();
        if self.educator_id.is_some() {
            conditions.push("educator_id = ?");
        }
        if self.published_only {
            conditions.push("is_published = TRUE");
        }
        if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        }
    }
}

/// Course repository trait
#[async_trait]
pub trait CourseRepository: Send + Sync {
    async fn create(&self, educator_id: i64, input: &CreateCourseInput) -> Result<Course>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Course>>;

    /// Mark a course published; returns false if it already was
    async fn publish(&self, id: i64) -> Result<bool>;

    /// List courses, newest first
    async fn list(&self, filter: CourseFilter, params: &ListParams) -> Result<(Vec<Course>, i64)>;

    async fn count(&self) -> Result<i64>;

    /// Enroll a learner. Fails with a unique violation if already enrolled.
    async fn enroll(&self, course_id: i64, user_id: i64, reference: Option<&str>) -> Result<Enrollment>;

    async fn get_enrollment(&self, course_id: i64, user_id: i64) -> Result<Option<Enrollment>>;
}

/// SQLx-based course repository implementation
pub struct SqlxCourseRepository {
    pool: DynDatabasePool,
}

impl SqlxCourseRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CourseRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl CourseRepository for SqlxCourseRepository {
    async fn create(&self, educator_id: i64, input: &CreateCourseInput) -> Result<Course> {
        let now = Utc::now();
        let sql = r#"
            INSERT INTO courses (educator_id, title, description, price, is_published, created_at, updated_at)
            VALUES (?, ?, ?, ?, FALSE, ?, ?)
        "#;
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(educator_id)
                .bind(&input.title)
                .bind(&input.description)
                .bind(input.price)
                .bind(now)
                .bind(now)
                .execute(sqlite(&self.pool)?)
                .await
                .context("Failed to create course")?
                .last_insert_rowid(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(educator_id)
                .bind(&input.title)
                .bind(&input.description)
                .bind(input.price)
                .bind(now)
                .bind(now)
                .execute(mysql(&self.pool)?)
                .await
                .context("Failed to create course")?
                .last_insert_id() as i64,
        };

        Ok(Course {
            id,
            educator_id,
            title: input.title.clone(),
            description: input.description.clone(),
            price: input.price,
            is_published: false,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Course>> {
        let sql = format!("SELECT {} FROM courses WHERE id = ?", COURSE_COLUMNS);
        let course = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(sqlite(&self.pool)?)
                .await
                .context("Failed to get course")?
                .map(|row| row_to_course_sqlite(&row)),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(mysql(&self.pool)?)
                .await
                .context("Failed to get course")?
                .map(|row| row_to_course_mysql(&row)),
        };
        Ok(course)
    }

    async fn publish(&self, id: i64) -> Result<bool> {
        let sql = "UPDATE courses SET is_published = TRUE, updated_at = ? WHERE id = ? AND is_published = FALSE";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(Utc::now())
                .bind(id)
                .execute(sqlite(&self.pool)?)
                .await
                .context("Failed to publish course")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(Utc::now())
                .bind(id)
                .execute(mysql(&self.pool)?)
                .await
                .context("Failed to publish course")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn list(&self, filter: CourseFilter, params: &ListParams) -> Result<(Vec<Course>, i64)> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_courses_sqlite(sqlite(&self.pool)?, filter, params).await,
            DatabaseDriver::Mysql => list_courses_mysql(mysql(&self.pool)?, filter, params).await,
        }
    }

    async fn count(&self) -> Result<i64> {
        let sql = "SELECT COUNT(*) as count FROM courses";
        let count = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .fetch_one(sqlite(&self.pool)?)
                .await
                .context("Failed to count courses")?
                .get("count"),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .fetch_one(mysql(&self.pool)?)
                .await
                .context("Failed to count courses")?
                .get("count"),
        };
        Ok(count)
    }

    async fn enroll(&self, course_id: i64, user_id: i64, reference: Option<&str>) -> Result<Enrollment> {
        let now = Utc::now();
        let sql = "INSERT INTO enrollments (course_id, user_id, transaction_reference, created_at) VALUES (?, ?, ?, ?)";
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(course_id)
                .bind(user_id)
                .bind(reference)
                .bind(now)
                .execute(sqlite(&self.pool)?)
                .await
                .context("Failed to create enrollment")?
                .last_insert_rowid(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(course_id)
                .bind(user_id)
                .bind(reference)
                .bind(now)
                .execute(mysql(&self.pool)?)
                .await
                .context("Failed to create enrollment")?
                .last_insert_id() as i64,
        };

        Ok(Enrollment {
            id,
            course_id,
            user_id,
            transaction_reference: reference.map(str::to_string),
            created_at: now,
        })
    }

    async fn get_enrollment(&self, course_id: i64, user_id: i64) -> Result<Option<Enrollment>> {
        let sql = r#"
            SELECT id, course_id, user_id, transaction_reference, created_at
            FROM enrollments WHERE course_id = ? AND user_id = ?
        "#;
        let enrollment = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(course_id)
                .bind(user_id)
                .fetch_optional(sqlite(&self.pool)?)
                .await
                .context("Failed to get enrollment")?
                .map(|row| Enrollment {
                    id: row.get("id"),
                    course_id: row.get("course_id"),
                    user_id: row.get("user_id"),
                    transaction_reference: row.get("transaction_reference"),
                    created_at: row.get("created_at"),
                }),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(course_id)
                .bind(user_id)
                .fetch_optional(mysql(&self.pool)?)
                .await
                .context("Failed to get enrollment")?
                .map(|row| Enrollment {
                    id: row.get("id"),
                    course_id: row.get("course_id"),
                    user_id: row.get("user_id"),
                    transaction_reference: row.get("transaction_reference"),
                    created_at: row.get("created_at"),
                }),
        };
        Ok(enrollment)
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn list_courses_sqlite(
    pool: &SqlitePool,
    filter: CourseFilter,
    params: &ListParams,
) -> Result<(Vec<Course>, i64)> {
    let where_clause = filter.where_clause();
    let sql = format!(
        "SELECT {} FROM courses {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        COURSE_COLUMNS, where_clause
    );
    let count_sql = format!("SELECT COUNT(*) as count FROM courses {}", where_clause);

    let mut query = sqlx::query(&sql);
    let mut count_query = sqlx::query(&count_sql);
    if let Some(educator_id) = filter.educator_id {
        query = query.bind(educator_id);
        count_query = count_query.bind(educator_id);
    }

    let courses = query
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list courses")?
        .iter()
        .map(row_to_course_sqlite)
        .collect();
    let total: i64 = count_query
        .fetch_one(pool)
        .await
        .context("Failed to count courses")?
        .get("count");

    Ok((courses, total))
}

fn row_to_course_sqlite(row: &sqlx::sqlite::SqliteRow) -> Course {
    Course {
        id: row.get("id"),
        educator_id: row.get("educator_id"),
        title: row.get("title"),
        description: row.get("description"),
        price: row.get("price"),
        is_published: row.get("is_published"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn list_courses_mysql(
    pool: &MySqlPool,
    filter: CourseFilter,
    params: &ListParams,
) -> Result<(Vec<Course>, i64)> {
    let where_clause = filter.where_clause();
    let sql = format!(
        "SELECT {} FROM courses {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        COURSE_COLUMNS, where_clause
    );
    let count_sql = format!("SELECT COUNT(*) as count FROM courses {}", where_clause);

    let mut query = sqlx::query(&sql);
    let mut count_query = sqlx::query(&count_sql);
    if let Some(educator_id) = filter.educator_id {
        query = query.bind(educator_id);
        count_query = count_query.bind(educator_id);
    }

    let courses = query
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list courses")?
        .iter()
        .map(row_to_course_mysql)
        .collect();
    let total: i64 = count_query
        .fetch_one(pool)
        .await
        .context("Failed to count courses")?
        .get("count");

    Ok((courses, total))
}

fn row_to_course_mysql(row: &sqlx::mysql::MySqlRow) -> Course {
    Course {
        id: row.get("id"),
        educator_id: row.get("educator_id"),
        title: row.get("title"),
        description: row.get("description"),
        price: row.get("price"),
        is_published: row.get("is_published"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

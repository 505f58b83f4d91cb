//! Database layer
//!
//! This module provides database abstraction for the Alexandria platform.
//! It supports:
//! - SQLite (default, for single-binary deployment)
//! - MySQL (for larger deployments)
//!
//! The database driver is selected based on configuration. Repositories
//! dispatch on [`DatabasePool::driver`] and keep one function per backend.
//!
//! # Usage
//!
//! ```ignore
//! use alexandria::config::DatabaseConfig;
//! use alexandria::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, mysql, sqlite, DatabasePool, DynDatabasePool, MysqlDatabase,
    SqliteDatabase,
};

/// Returns true when a sqlx error is a unique-constraint violation.
///
/// Repositories use this to turn races on join tables into "already exists"
/// answers instead of internal errors.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<sqlx::Error>()
            .and_then(|e| match e {
                sqlx::Error::Database(db) => Some(db.is_unique_violation()),
                _ => None,
            })
            .unwrap_or(false)
    })
}

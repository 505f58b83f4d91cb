//! Fixtures shared by repository and service tests

use crate::db::{create_test_pool, migrations, DynDatabasePool};
use crate::models::{User, UserRole};

use super::{SqlxUserRepository, UserRepository};

/// Fresh in-memory database with all migrations applied
pub async fn setup_pool() -> DynDatabasePool {
    let pool = create_test_pool().await.expect("Failed to create test pool");
    migrations::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// Insert a user and return its id
pub async fn insert_user(pool: &DynDatabasePool, username: &str, role: UserRole) -> i64 {
    SqlxUserRepository::new(pool.clone())
        .create(&User::new(
            username.to_string(),
            format!("{}@example.com", username),
            "hash".to_string(),
            role,
        ))
        .await
        .expect("Failed to create test user")
        .id
}

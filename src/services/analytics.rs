//! Admin analytics
//!
//! The overview aggregates several tables, so it is cached for
//! `cache.ttl_seconds`. Ledger transitions drop the cached copy.

use crate::cache::{SharedCache, ANALYTICS_OVERVIEW_KEY, ANALYTICS_PREFIX};
use crate::db::repositories::{
    CourseRepository, LibraryRepository, PaymentRepository, RevenueTotals, UserRepository,
};
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Window for the "new users" figure
const NEW_USER_WINDOW_DAYS: i64 = 7;

#[derive(Debug, thiserror::Error)]
pub enum AnalyticsServiceError {
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStats {
    pub total: i64,
    pub by_role: BTreeMap<String, i64>,
    pub new_last_7_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsOverview {
    pub users: UserStats,
    pub libraries: BTreeMap<String, i64>,
    pub courses: i64,
    pub transactions: BTreeMap<String, i64>,
    pub revenue: RevenueTotals,
    pub currency: String,
    pub generated_at: DateTime<Utc>,
}

pub struct AnalyticsService {
    users: Arc<dyn UserRepository>,
    libraries: Arc<dyn LibraryRepository>,
    courses: Arc<dyn CourseRepository>,
    payments: Arc<dyn PaymentRepository>,
    cache: SharedCache,
    currency: String,
}

impl AnalyticsService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        libraries: Arc<dyn LibraryRepository>,
        courses: Arc<dyn CourseRepository>,
        payments: Arc<dyn PaymentRepository>,
        cache: SharedCache,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            users,
            libraries,
            courses,
            payments,
            cache,
            currency: currency.into(),
        }
    }

    /// Cached platform overview
    pub async fn overview(&self) -> Result<AnalyticsOverview, AnalyticsServiceError> {
        match self.cache.get::<AnalyticsOverview>(ANALYTICS_OVERVIEW_KEY).await {
            Ok(Some(hit)) => return Ok(hit),
            Ok(None) => {}
            Err(e) => tracing::warn!("discarding unreadable analytics cache entry: {}", e),
        }

        let overview = self.compute().await?;
        if let Err(e) = self.cache.set(ANALYTICS_OVERVIEW_KEY, &overview).await {
            tracing::warn!("failed to cache analytics overview: {}", e);
        }
        Ok(overview)
    }

    /// Drop cached analytics
    pub async fn invalidate(&self) {
        self.cache.delete_prefix(ANALYTICS_PREFIX).await;
    }

    async fn compute(&self) -> Result<AnalyticsOverview, AnalyticsServiceError> {
        let by_role = self.users.count_by_role().await.context("Failed to count users by role")?;
        let since = Utc::now() - Duration::days(NEW_USER_WINDOW_DAYS);
        let new_users = self
            .users
            .count_created_since(since)
            .await
            .context("Failed to count new users")?;

        let libraries = self
            .libraries
            .count_by_status()
            .await
            .context("Failed to count libraries")?;
        let courses = self.courses.count().await.context("Failed to count courses")?;
        let transactions = self
            .payments
            .count_by_status()
            .await
            .context("Failed to count transactions")?;
        let revenue = self
            .payments
            .revenue_totals()
            .await
            .context("Failed to total revenue")?;

        Ok(AnalyticsOverview {
            users: UserStats {
                total: by_role.iter().map(|(_, n)| n).sum(),
                by_role: tally(by_role),
                new_last_7_days: new_users,
            },
            libraries: tally(libraries),
            courses,
            transactions: tally(transactions),
            revenue,
            currency: self.currency.clone(),
            generated_at: Utc::now(),
        })
    }
}

fn tally<K: ToString>(counts: Vec<(K, i64)>) -> BTreeMap<String, i64> {
    counts.into_iter().map(|(k, n)| (k.to_string(), n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::repositories::test_support::{insert_user, setup_pool};
    use crate::db::repositories::{
        SqlxCourseRepository, SqlxLibraryRepository, SqlxPaymentRepository, SqlxUserRepository,
    };
    use crate::db::DynDatabasePool;
    use crate::models::{CreateCourseInput, UserRole};

    fn service(pool: &DynDatabasePool, cache: SharedCache) -> AnalyticsService {
        AnalyticsService::new(
            SqlxUserRepository::boxed(pool.clone()),
            SqlxLibraryRepository::boxed(pool.clone()),
            SqlxCourseRepository::boxed(pool.clone()),
            SqlxPaymentRepository::boxed(pool.clone()),
            cache,
            "NGN",
        )
    }

    #[test]
    fn test_tally_uses_display_names() {
        let counts = tally(vec![(UserRole::Educator, 2), (UserRole::Learner, 5)]);
        assert_eq!(counts.get("educator"), Some(&2));
        assert_eq!(counts.get("learner"), Some(&5));
    }

    #[tokio::test]
    async fn test_overview_counts() {
        let pool = setup_pool().await;
        insert_user(&pool, "root", UserRole::Admin).await;
        let educator = insert_user(&pool, "prof_ada", UserRole::Educator).await;
        insert_user(&pool, "student", UserRole::Learner).await;
        SqlxLibraryRepository::new(pool.clone())
            .create(educator, "Reading", None)
            .await
            .unwrap();
        SqlxCourseRepository::new(pool.clone())
            .create(
                educator,
                &CreateCourseInput {
                    title: "Rust".to_string(),
                    description: None,
                    price: 100,
                },
            )
            .await
            .unwrap();

        let overview = service(&pool, Arc::new(MemoryCache::new())).overview().await.unwrap();
        assert_eq!(overview.users.total, 3);
        assert_eq!(overview.users.new_last_7_days, 3);
        assert_eq!(overview.users.by_role.get("educator"), Some(&1));
        assert_eq!(overview.libraries.get("pending"), Some(&1));
        assert_eq!(overview.courses, 1);
        assert_eq!(overview.revenue, RevenueTotals::default());
    }

    #[tokio::test]
    async fn test_overview_is_cached_until_invalidated() {
        let pool = setup_pool().await;
        let cache: SharedCache = Arc::new(MemoryCache::new());
        let analytics = service(&pool, cache);

        let before = analytics.overview().await.unwrap();
        assert_eq!(before.users.total, 0);

        insert_user(&pool, "late", UserRole::Learner).await;
        let cached = analytics.overview().await.unwrap();
        assert_eq!(cached.users.total, 0);
        assert_eq!(cached.generated_at, before.generated_at);

        analytics.invalidate().await;
        let fresh = analytics.overview().await.unwrap();
        assert_eq!(fresh.users.total, 1);
    }
}

//! Cache layer
//!
//! A process-local moka cache for read models that are expensive to
//! compute, such as the admin analytics overview.

pub mod memory;

pub use memory::MemoryCache;

use crate::config::CacheConfig;
use std::sync::Arc;
use std::time::Duration;

/// Shared handle passed to services
pub type SharedCache = Arc<MemoryCache>;

/// Key of the cached admin analytics overview
pub const ANALYTICS_OVERVIEW_KEY: &str = "analytics:overview";

/// Prefix of every analytics entry; ledger transitions drop all of them
pub const ANALYTICS_PREFIX: &str = "analytics:";

/// Build the cache from configuration
pub fn create_cache(config: &CacheConfig) -> SharedCache {
    let ttl = Duration::from_secs(config.ttl_seconds);
    Arc::new(MemoryCache::with_capacity_and_ttl(config.max_capacity, ttl))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_cache_uses_configured_ttl() {
        let config = CacheConfig {
            ttl_seconds: 42,
            max_capacity: 16,
        };
        let cache = create_cache(&config);
        assert_eq!(cache.ttl(), Duration::from_secs(42));

        cache.set(ANALYTICS_OVERVIEW_KEY, &"cached").await.unwrap();
        let value: Option<String> = cache.get(ANALYTICS_OVERVIEW_KEY).await.unwrap();
        assert_eq!(value.as_deref(), Some("cached"));
    }
}

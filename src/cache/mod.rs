//! Redis caching layer for the storefront catalog
//!
//! The cache is an accelerator only: every read falls back to PostgreSQL
//! when Redis is unavailable, and writes invalidate whole namespaces.

pub mod cache;
pub mod error;
pub mod keys;

pub use cache::{Cache, RedisCache};

use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::logging::mask_secret;
use error::CacheError;

/// Redis connection pool type alias
pub type RedisPool = Pool<RedisConnectionManager>;

/// Redis pool settings
#[derive(Debug, Clone)]
pub struct RedisPoolConfig {
    pub redis_url: String,
    pub max_connections: u32,
    pub min_idle: u32,
    pub connection_timeout: Duration,
    pub max_lifetime: Duration,
    pub idle_timeout: Duration,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            max_connections: 20,
            min_idle: 2,
            connection_timeout: Duration::from_secs(5),
            max_lifetime: Duration::from_secs(300),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&crate::config::CacheConfig> for RedisPoolConfig {
    fn from(config: &crate::config::CacheConfig) -> Self {
        Self {
            redis_url: config.redis_url.clone(),
            max_connections: config.max_connections,
            ..Self::default()
        }
    }
}

/// Initialize Redis connection pool. A failed PING is logged but does
/// not fail startup.
pub async fn init_cache_pool(config: RedisPoolConfig) -> Result<RedisPool, CacheError> {
    info!(
        max_connections = config.max_connections,
        redis_url = %mask_secret(&config.redis_url),
        "Initializing Redis cache pool"
    );

    let manager = RedisConnectionManager::new(config.redis_url.as_str()).map_err(|e| {
        error!("Failed to create Redis connection manager: {}", e);
        CacheError::ConnectionError(e.to_string())
    })?;

    let pool = Pool::builder()
        .max_size(config.max_connections)
        .min_idle(config.min_idle)
        .connection_timeout(config.connection_timeout)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.idle_timeout)
        .test_on_check_out(false)
        .build(manager)
        .await
        .map_err(|e| {
            error!("Failed to build Redis connection pool: {}", e);
            CacheError::ConnectionError(e.to_string())
        })?;

    if let Err(e) = health_check(&pool).await {
        warn!("Initial Redis connection test failed, continuing without cache hits: {}", e);
    }

    info!("Redis cache pool initialized");
    Ok(pool)
}

/// PING through the pool
pub async fn health_check(pool: &RedisPool) -> Result<(), CacheError> {
    let mut conn = pool.get().await?;
    let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
    Ok(())
}

#[derive(Debug, serde::Serialize)]
pub struct CacheStats {
    pub connections: u32,
    pub idle_connections: u32,
}

pub fn get_cache_stats(pool: &RedisPool) -> CacheStats {
    let state = pool.state();
    CacheStats {
        connections: state.connections,
        idle_connections: state.idle_connections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_from_app_config() {
        let app = crate::config::CacheConfig {
            enabled: true,
            redis_url: "redis://cache:6379".to_string(),
            products_ttl: 60,
            max_connections: 4,
        };
        let config = RedisPoolConfig::from(&app);
        assert_eq!(config.redis_url, "redis://cache:6379");
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.min_idle, 2);
    }
}

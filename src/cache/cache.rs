//! Typed get/set/delete over the Redis pool

use super::error::{CacheError, CacheResult};
use super::RedisPool;
use async_trait::async_trait;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Key/value cache holding JSON-encoded values of type `T`
#[async_trait]
pub trait Cache<T>: Send + Sync
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn get(&self, key: &str) -> CacheResult<Option<T>>;
    async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()>;
    async fn delete(&self, key: &str) -> CacheResult<bool>;
}

#[derive(Clone)]
pub struct RedisCache {
    pool: RedisPool,
}

impl RedisCache {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }

    /// Deletes every key matching `pattern` using SCAN, returning the
    /// number of keys removed
    pub async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let mut conn = self.pool.get().await?;
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut *conn)
                .await?;

            if !keys.is_empty() {
                let count: u64 = conn.del(&keys).await?;
                removed += count;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(pattern = %pattern, removed = removed, "Cache pattern invalidated");
        Ok(removed)
    }
}

#[async_trait]
impl<T> Cache<T> for RedisCache
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> CacheResult<Option<T>> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.get(key).await?;

        match raw {
            Some(json) => {
                let value = serde_json::from_str(&json)?;
                debug!(key = %key, "Cache hit");
                Ok(Some(value))
            }
            None => {
                debug!(key = %key, "Cache miss");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.pool.get().await?;

        match ttl {
            Some(ttl) if ttl.as_secs() > 0 => {
                let _: () = conn.set_ex(key, json, ttl.as_secs()).await?;
            }
            Some(_) => {
                return Err(CacheError::OperationError(format!(
                    "refusing to cache '{}' with a zero TTL",
                    key
                )))
            }
            None => {
                let _: () = conn.set(key, json).await?;
            }
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.pool.get().await?;
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }
}

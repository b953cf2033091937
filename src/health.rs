//! Health check module
//! Reports the status of the database and the Redis cache

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::cache::{get_cache_stats, RedisCache};
use crate::database::get_pool_stats;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Disabled,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }

    /// The database decides availability; the cache only degrades it
    fn settle_overall(&mut self) {
        let down = |name: &str| {
            self.checks
                .get(name)
                .map(|c| c.status == ComponentState::Down)
                .unwrap_or(false)
        };
        self.status = if down("database") {
            HealthState::Unhealthy
        } else if down("cache") {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn disabled() -> Self {
        Self {
            status: ComponentState::Disabled,
            response_time_ms: None,
            details: Some("SKIP_CACHE".to_string()),
        }
    }
}

type CheckResult = Result<u128, Box<dyn std::error::Error + Send + Sync>>;

async fn run_check<F>(name: &str, check: F) -> ComponentHealth
where
    F: std::future::Future<Output = CheckResult>,
{
    match timeout(CHECK_TIMEOUT, check).await {
        Ok(Ok(response_time)) => {
            info!(component = name, response_time_ms = response_time as u64, "Health check OK");
            ComponentHealth::up(Some(response_time))
        }
        Ok(Err(e)) => {
            error!(component = name, error = %e, "Health check failed");
            ComponentHealth::down(Some(e.to_string()))
        }
        Err(_) => {
            error!(component = name, "Health check timed out");
            ComponentHealth::down(Some("Timeout".to_string()))
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    db_pool: sqlx::PgPool,
    cache: Option<RedisCache>,
}

impl HealthChecker {
    pub fn new(db_pool: sqlx::PgPool, cache: Option<RedisCache>) -> Self {
        Self { db_pool, cache }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        let mut database = run_check("database", check_database_health(&self.db_pool)).await;
        if database.status == ComponentState::Up {
            let stats = get_pool_stats(&self.db_pool);
            database.details = Some(format!("pool size={} idle={}", stats.size, stats.num_idle));
        }
        health_status.checks.insert("database".to_string(), database);

        let cache = match &self.cache {
            Some(cache) => {
                let mut component = run_check("cache", check_cache_health(cache)).await;
                if component.status == ComponentState::Up {
                    let stats = get_cache_stats(cache.pool());
                    component.details = Some(format!(
                        "pool size={} idle={}",
                        stats.connections, stats.idle_connections
                    ));
                }
                component
            }
            None => ComponentHealth::disabled(),
        };
        health_status.checks.insert("cache".to_string(), cache);

        health_status.settle_overall();
        health_status
    }
}

pub async fn check_database_health(pool: &sqlx::PgPool) -> CheckResult {
    let start = Instant::now();
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(start.elapsed().as_millis())
}

pub async fn check_cache_health(cache: &RedisCache) -> CheckResult {
    let start = Instant::now();
    crate::cache::health_check(cache.pool()).await?;
    Ok(start.elapsed().as_millis())
}

/// GET /health
pub async fn health(
    State(checker): State<HealthChecker>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let health_status = checker.check_health().await;
    match health_status.status {
        HealthState::Unhealthy => {
            error!("Health check failed - service unhealthy");
            Err((StatusCode::SERVICE_UNAVAILABLE, Json(health_status)))
        }
        HealthState::Degraded => {
            warn!("Health check degraded - cache unavailable");
            Ok(Json(health_status))
        }
        HealthState::Healthy => Ok(Json(health_status)),
    }
}

/// GET /health/ready
pub async fn ready(
    state: State<HealthChecker>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    health(state).await
}

/// GET /health/live
pub async fn live() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_status_creation() {
        let health_status = HealthStatus::new();
        assert!(health_status.is_healthy());
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[test]
    fn test_cache_outage_only_degrades() {
        let mut status = HealthStatus::new();
        status
            .checks
            .insert("database".to_string(), ComponentHealth::up(Some(3)));
        status
            .checks
            .insert("cache".to_string(), ComponentHealth::down(Some("refused".to_string())));
        status.settle_overall();
        assert_eq!(status.status, HealthState::Degraded);

        status
            .checks
            .insert("database".to_string(), ComponentHealth::down(None));
        status.settle_overall();
        assert_eq!(status.status, HealthState::Unhealthy);
    }

    #[test]
    fn test_disabled_cache_is_healthy() {
        let mut status = HealthStatus::new();
        status
            .checks
            .insert("database".to_string(), ComponentHealth::up(Some(1)));
        status
            .checks
            .insert("cache".to_string(), ComponentHealth::disabled());
        status.settle_overall();
        assert!(status.is_healthy());
    }

    #[tokio::test]
    async fn test_liveness() {
        assert_eq!(live().await, "OK");
    }
}

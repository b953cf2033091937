use crate::database::dashboard_repository::{DashboardRepository, DashboardStats};
use crate::error::AppResult;
use sqlx::PgPool;

/// Admin dashboard counters
pub struct DashboardService {
    repo: DashboardRepository,
}

impl DashboardService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repo: DashboardRepository::new(pool),
        }
    }

    pub async fn stats(&self) -> AppResult<DashboardStats> {
        Ok(self.repo.stats().await?)
    }
}

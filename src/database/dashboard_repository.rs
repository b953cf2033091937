use crate::database::error::DatabaseError;
use serde::Serialize;
use sqlx::{FromRow, PgPool};

/// Aggregate counters for the admin dashboard
#[derive(Debug, Clone, Default, FromRow, Serialize, PartialEq, Eq)]
pub struct DashboardStats {
    pub total_users: i64,
    pub active_products: i64,
    pub pending_orders: i64,
    pub completed_orders: i64,
    pub pending_payment_requests: i64,
    pub credits_outstanding: i64,
    pub approved_mmk_total: i64,
}

pub struct DashboardRepository {
    pool: PgPool,
}

impl DashboardRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn stats(&self) -> Result<DashboardStats, DatabaseError> {
        sqlx::query_as::<_, DashboardStats>(
            "SELECT
                (SELECT COUNT(*) FROM user_profiles) AS total_users,
                (SELECT COUNT(*) FROM products WHERE is_active) AS active_products,
                (SELECT COUNT(*) FROM orders WHERE status = 'pending') AS pending_orders,
                (SELECT COUNT(*) FROM orders WHERE status = 'completed') AS completed_orders,
                (SELECT COUNT(*) FROM payment_requests WHERE status = 'pending') AS pending_payment_requests,
                (SELECT COALESCE(SUM(credits_balance), 0)::BIGINT FROM user_profiles) AS credits_outstanding,
                (SELECT COALESCE(SUM(amount_mmk), 0)::BIGINT FROM payment_requests WHERE status = 'approved') AS approved_mmk_total",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

use crate::database::error::DatabaseError;
use crate::database::repository::Page;
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

const ORDER_COLUMNS: &str = "o.id, o.user_id, o.product_id, p.name AS product_name, \
                             p.operator AS product_operator, o.phone_number, o.credits_used, \
                             o.status, o.admin_note, o.processed_by, o.processed_at, \
                             o.created_at, o.updated_at";

/// Order row joined with the product it was placed for
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub product_operator: String,
    pub phone_number: String,
    pub credits_used: i64,
    pub status: String,
    pub admin_note: Option<String>,
    pub processed_by: Option<Uuid>,
    pub processed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Bare order row as written by a status transition
#[derive(Debug, Clone, FromRow)]
pub struct OrderTransition {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub credits_used: i64,
    pub status: String,
}

/// Repository for orders
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        conn: &mut PgConnection,
        id: Uuid,
        user_id: Uuid,
        product_id: Uuid,
        phone_number: &str,
        credits_used: i64,
    ) -> Result<Uuid, DatabaseError> {
        sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO orders (id, user_id, product_id, phone_number, credits_used)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id",
        )
        .bind(id)
        .bind(user_id)
        .bind(product_id)
        .bind(phone_number)
        .bind(credits_used)
        .fetch_one(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, DatabaseError> {
        sqlx::query_as::<_, Order>(&format!(
            "SELECT {} FROM orders o JOIN products p ON p.id = o.product_id WHERE o.id = $1",
            ORDER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Same as `find_by_id` but only when the order belongs to `user_id`
    pub async fn find_for_user(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Order>, DatabaseError> {
        sqlx::query_as::<_, Order>(&format!(
            "SELECT {} FROM orders o JOIN products p ON p.id = o.product_id
             WHERE o.id = $1 AND o.user_id = $2",
            ORDER_COLUMNS
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Lists orders, newest first; `user_id` and `status` narrow the result
    pub async fn list(
        &self,
        user_id: Option<Uuid>,
        status: Option<&str>,
        page: Page,
    ) -> Result<Vec<Order>, DatabaseError> {
        sqlx::query_as::<_, Order>(&format!(
            "SELECT {} FROM orders o JOIN products p ON p.id = o.product_id
             WHERE ($1::uuid IS NULL OR o.user_id = $1)
               AND ($2::text IS NULL OR o.status = $2)
             ORDER BY o.created_at DESC
             LIMIT $3 OFFSET $4",
            ORDER_COLUMNS
        ))
        .bind(user_id)
        .bind(status)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn current_status(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<String>, DatabaseError> {
        sqlx::query_scalar::<_, String>("SELECT status FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    /// Moves a pending order to `to_status`.
    ///
    /// Returns `None` when the order does not exist or is no longer
    /// pending; the `WHERE status = 'pending'` guard makes concurrent
    /// settlements of the same order race on the row lock, and only the
    /// first one sees a row back.
    pub async fn transition_from_pending(
        conn: &mut PgConnection,
        id: Uuid,
        to_status: &str,
        processed_by: Uuid,
        admin_note: Option<&str>,
    ) -> Result<Option<OrderTransition>, DatabaseError> {
        sqlx::query_as::<_, OrderTransition>(
            "UPDATE orders
             SET status = $2, processed_by = $3, admin_note = $4,
                 processed_at = NOW(), updated_at = NOW()
             WHERE id = $1 AND status = 'pending'
             RETURNING id, user_id, product_id, credits_used, status",
        )
        .bind(id)
        .bind(to_status)
        .bind(processed_by)
        .bind(admin_note)
        .fetch_optional(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}


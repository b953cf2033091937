use crate::database::error::DatabaseError;
use crate::database::repository::Page;
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

/// Name of the partial unique index over live (non-rejected) references
pub const REFERENCE_CONSTRAINT: &str = "uq_payment_requests_reference";

const PAYMENT_REQUEST_COLUMNS: &str = "id, user_id, amount_mmk, credits_requested, payment_method, \
                                       transaction_ref, proof_path, status, admin_note, \
                                       processed_by, processed_at, created_at, updated_at";

/// Credit purchase request entity
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PaymentRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount_mmk: i64,
    pub credits_requested: i64,
    pub payment_method: String,
    pub transaction_ref: String,
    pub proof_path: Option<String>,
    pub status: String,
    pub admin_note: Option<String>,
    pub processed_by: Option<Uuid>,
    pub processed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Fields supplied when a request is submitted
#[derive(Debug, Clone)]
pub struct NewPaymentRequest<'a> {
    pub user_id: Uuid,
    pub amount_mmk: i64,
    pub credits_requested: i64,
    pub payment_method: &'a str,
    pub transaction_ref: &'a str,
    pub proof_path: Option<&'a str>,
}

/// Repository for payment requests
pub struct PaymentRequestRepository {
    pool: PgPool,
}

impl PaymentRequestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a pending request. A live request with the same wallet and
    /// reference fails with a unique violation on [`REFERENCE_CONSTRAINT`].
    pub async fn insert(&self, new: &NewPaymentRequest<'_>) -> Result<PaymentRequest, DatabaseError> {
        sqlx::query_as::<_, PaymentRequest>(&format!(
            "INSERT INTO payment_requests
                (user_id, amount_mmk, credits_requested, payment_method, transaction_ref, proof_path)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            PAYMENT_REQUEST_COLUMNS
        ))
        .bind(new.user_id)
        .bind(new.amount_mmk)
        .bind(new.credits_requested)
        .bind(new.payment_method)
        .bind(new.transaction_ref)
        .bind(new.proof_path)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn reference_in_use(
        &self,
        payment_method: &str,
        transaction_ref: &str,
    ) -> Result<bool, DatabaseError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (
                SELECT 1 FROM payment_requests
                WHERE payment_method = $1 AND transaction_ref = $2 AND status <> 'rejected'
             )",
        )
        .bind(payment_method)
        .bind(transaction_ref)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentRequest>, DatabaseError> {
        sqlx::query_as::<_, PaymentRequest>(&format!(
            "SELECT {} FROM payment_requests WHERE id = $1",
            PAYMENT_REQUEST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Lists requests, newest first; `user_id` and `status` narrow the result
    pub async fn list(
        &self,
        user_id: Option<Uuid>,
        status: Option<&str>,
        page: Page,
    ) -> Result<Vec<PaymentRequest>, DatabaseError> {
        sqlx::query_as::<_, PaymentRequest>(&format!(
            "SELECT {} FROM payment_requests
             WHERE ($1::uuid IS NULL OR user_id = $1)
               AND ($2::text IS NULL OR status = $2)
             ORDER BY created_at DESC
             LIMIT $3 OFFSET $4",
            PAYMENT_REQUEST_COLUMNS
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
        sqlx::query_scalar::<_, String>("SELECT status FROM payment_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    /// Moves a pending request to `to_status`; `None` when it is missing
    /// or has already been decided
    pub async fn transition_from_pending(
        conn: &mut PgConnection,
        id: Uuid,
        to_status: &str,
        processed_by: Uuid,
        admin_note: Option<&str>,
    ) -> Result<Option<PaymentRequest>, DatabaseError> {
        sqlx::query_as::<_, PaymentRequest>(&format!(
            "UPDATE payment_requests
             SET status = $2, processed_by = $3, admin_note = $4,
                 processed_at = NOW(), updated_at = NOW()
             WHERE id = $1 AND status = 'pending'
             RETURNING {}",
            PAYMENT_REQUEST_COLUMNS
        ))
        .bind(id)
        .bind(to_status)
        .bind(processed_by)
        .bind(admin_note)
        .fetch_optional(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}


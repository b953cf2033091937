use crate::database::error::DatabaseError;
use crate::database::repository::Page;
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

/// One decision on an order, payment request or product
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ApprovalWorkflow {
    pub id: Uuid,
    pub target_type: String,
    pub target_id: Uuid,
    pub status: String,
    pub decided_by: Uuid,
    pub note: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub struct ApprovalRepository {
    pool: PgPool,
}

impl ApprovalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Records a decision. Orders and payment requests are unique per
    /// target, so a second decision on one fails with a unique violation;
    /// products keep a row per listing change.
    pub async fn insert(
        conn: &mut PgConnection,
        target_type: &str,
        target_id: Uuid,
        status: &str,
        decided_by: Uuid,
        note: Option<&str>,
    ) -> Result<ApprovalWorkflow, DatabaseError> {
        sqlx::query_as::<_, ApprovalWorkflow>(
            "INSERT INTO approval_workflows (target_type, target_id, status, decided_by, note)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, target_type, target_id, status, decided_by, note, created_at",
        )
        .bind(target_type)
        .bind(target_id)
        .bind(status)
        .bind(decided_by)
        .bind(note)
        .fetch_one(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn list(
        &self,
        target_type: Option<&str>,
        page: Page,
    ) -> Result<Vec<ApprovalWorkflow>, DatabaseError> {
        sqlx::query_as::<_, ApprovalWorkflow>(
            "SELECT id, target_type, target_id, status, decided_by, note, created_at
             FROM approval_workflows
             WHERE ($1::text IS NULL OR target_type = $1)
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(target_type)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

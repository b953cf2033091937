use crate::database::error::DatabaseError;
use crate::database::repository::Page;
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

/// Admin audit row. Append-only.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub admin_id: Uuid,
    pub action: String,
    pub target_type: String,
    pub target_id: Option<String>,
    pub details: Json<serde_json::Value>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub admin_id: Option<Uuid>,
    pub action: Option<String>,
}

pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        conn: &mut PgConnection,
        admin_id: Uuid,
        action: &str,
        target_type: &str,
        target_id: Option<&str>,
        details: &serde_json::Value,
    ) -> Result<Uuid, DatabaseError> {
        sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO admin_audit_logs (admin_id, action, target_type, target_id, details)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id",
        )
        .bind(admin_id)
        .bind(action)
        .bind(target_type)
        .bind(target_id)
        .bind(Json(details))
        .fetch_one(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn list(&self, filter: &AuditFilter, page: Page) -> Result<Vec<AuditLog>, DatabaseError> {
        sqlx::query_as::<_, AuditLog>(
            "SELECT id, admin_id, action, target_type, target_id, details, created_at
             FROM admin_audit_logs
             WHERE ($1::uuid IS NULL OR admin_id = $1)
               AND ($2::text IS NULL OR action = $2)
             ORDER BY created_at DESC
             LIMIT $3 OFFSET $4",
        )
        .bind(filter.admin_id)
        .bind(filter.action.as_deref())
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

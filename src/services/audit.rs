//! Audit trail, approval history and ledger reconciliation

use crate::database::approval_repository::{ApprovalRepository, ApprovalWorkflow};
use crate::database::audit_repository::{AuditFilter, AuditLog, AuditRepository};
use crate::database::credit_transaction_repository::{BalanceMismatch, CreditTransactionRepository};
use crate::database::repository::Page;
use crate::domain::{ApprovalTarget, AuditAction};
use crate::error::AppResult;
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

/// Appends an audit row inside the caller's transaction
pub async fn record(
    conn: &mut PgConnection,
    admin_id: Uuid,
    action: AuditAction,
    target_type: &str,
    target_id: Option<String>,
    details: Value,
) -> AppResult<Uuid> {
    let id = AuditRepository::insert(
        conn,
        admin_id,
        action.as_str(),
        target_type,
        target_id.as_deref(),
        &details,
    )
    .await?;

    info!(
        admin_id = %admin_id,
        action = %action,
        target_type = %target_type,
        target_id = ?target_id,
        "Admin action audited"
    );

    Ok(id)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ReconciliationReport {
    pub checked_at: chrono::DateTime<chrono::Utc>,
    pub mismatches: Vec<BalanceMismatch>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }
}

pub struct AuditService {
    audit_repo: AuditRepository,
    approval_repo: ApprovalRepository,
    ledger_repo: CreditTransactionRepository,
}

impl AuditService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            audit_repo: AuditRepository::new(pool.clone()),
            approval_repo: ApprovalRepository::new(pool.clone()),
            ledger_repo: CreditTransactionRepository::new(pool),
        }
    }

    pub async fn list_audit_logs(
        &self,
        admin_id: Option<Uuid>,
        action: Option<AuditAction>,
        page: Page,
    ) -> AppResult<Vec<AuditLog>> {
        let filter = AuditFilter {
            admin_id,
            action: action.map(|a| a.as_str().to_string()),
        };
        Ok(self.audit_repo.list(&filter, page).await?)
    }

    pub async fn list_approvals(
        &self,
        target_type: Option<ApprovalTarget>,
        page: Page,
    ) -> AppResult<Vec<ApprovalWorkflow>> {
        Ok(self
            .approval_repo
            .list(target_type.map(|t| t.as_str()), page)
            .await?)
    }

    /// Finds users whose balance differs from the sum of their ledger rows
    pub async fn reconcile(&self, limit: i64) -> AppResult<ReconciliationReport> {
        let mismatches = self.ledger_repo.find_mismatches(limit.max(1)).await?;

        if !mismatches.is_empty() {
            warn!(count = mismatches.len(), "Ledger mismatches detected");
        }

        Ok(ReconciliationReport {
            checked_at: chrono::Utc::now(),
            mismatches,
        })
    }
}

//! Approval and rejection of orders and payment requests
//!
//! Each settlement runs in one database transaction:
//! guarded `pending -> X` status update, ledger entry when the balance
//! moves, approval workflow row and audit row. The guarded update is
//! what makes a settlement happen at most once; a second attempt (double
//! click, a second admin, a Telegram callback racing the HTTP API) finds
//! no pending row and fails with `AlreadyProcessed`.

use crate::database::approval_repository::ApprovalRepository;
use crate::database::order_repository::OrderRepository;
use crate::database::payment_request_repository::PaymentRequestRepository;
use crate::database::product_repository::ProductRepository;
use crate::domain::{
    ApprovalDecision, ApprovalTarget, AuditAction, CreditTransactionType, OrderStatus,
    PaymentRequestStatus, ReferenceType,
};
use crate::error::{AppError, AppErrorKind, AppResult, DomainError};
use crate::services::audit;
use crate::services::ledger::{self, LedgerEntry};
use crate::services::notification::AdminNotifier;
use serde::Serialize;
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Result of a single settlement
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SettlementOutcome {
    pub target: ApprovalTarget,
    pub target_id: Uuid,
    pub user_id: Uuid,
    pub decision: ApprovalDecision,
    /// New status of the order or payment request
    pub status: String,
    /// Signed credit change applied to the user; 0 when none
    pub balance_change: i64,
    /// Balance after the change, when one was made
    pub new_balance: Option<i64>,
    pub decided_by: Uuid,
}

pub struct SettlementService {
    pool: PgPool,
    notifier: Arc<dyn AdminNotifier>,
}

impl SettlementService {
    pub fn new(pool: PgPool, notifier: Arc<dyn AdminNotifier>) -> Self {
        Self { pool, notifier }
    }

    /// Dispatches on target and decision, for callers that carry both as
    /// data (the Telegram relay)
    pub async fn settle(
        &self,
        admin_id: Uuid,
        target: ApprovalTarget,
        decision: ApprovalDecision,
        id: Uuid,
        note: Option<&str>,
    ) -> AppResult<SettlementOutcome> {
        match (target, decision) {
            (ApprovalTarget::PaymentRequest, ApprovalDecision::Approved) => {
                self.approve_payment_request(admin_id, id, note).await
            }
            (ApprovalTarget::PaymentRequest, ApprovalDecision::Rejected) => {
                self.reject_payment_request(admin_id, id, note).await
            }
            (ApprovalTarget::Order, ApprovalDecision::Approved) => {
                self.approve_order(admin_id, id, note).await
            }
            (ApprovalTarget::Order, ApprovalDecision::Rejected) => {
                self.reject_order(admin_id, id, note).await
            }
            (ApprovalTarget::Product, _) => Err(AppError::not_allowed(
                "products are not settled through approvals",
            )),
        }
    }

    pub async fn approve_payment_request(
        &self,
        admin_id: Uuid,
        id: Uuid,
        note: Option<&str>,
    ) -> AppResult<SettlementOutcome> {
        let mut tx = self.pool.begin().await?;

        let request = PaymentRequestRepository::transition_from_pending(
            &mut tx,
            id,
            PaymentRequestStatus::Approved.as_str(),
            admin_id,
            note,
        )
        .await?;
        let request = match request {
            Some(request) => request,
            None => return Err(payment_request_not_pending(&mut tx, id).await),
        };

        let description = format!("Credit purchase via {}", request.payment_method);
        let entry = ledger::apply_entry(
            &mut tx,
            &LedgerEntry {
                user_id: request.user_id,
                amount: request.credits_requested,
                transaction_type: CreditTransactionType::Purchase,
                reference_type: ReferenceType::PaymentRequest,
                reference_id: Some(id),
                description: Some(&description),
                created_by: Some(admin_id),
            },
        )
        .await?;

        let outcome = SettlementOutcome {
            target: ApprovalTarget::PaymentRequest,
            target_id: id,
            user_id: request.user_id,
            decision: ApprovalDecision::Approved,
            status: request.status.clone(),
            balance_change: entry.amount,
            new_balance: Some(entry.new_balance),
            decided_by: admin_id,
        };

        record_decision(
            &mut tx,
            &outcome,
            AuditAction::ApprovePaymentRequest,
            note,
            json!({
                "credits": request.credits_requested,
                "amount_mmk": request.amount_mmk,
                "payment_method": request.payment_method,
                "transaction_ref": request.transaction_ref,
                "new_balance": entry.new_balance,
            }),
        )
        .await?;

        tx.commit().await?;
        self.finish(outcome).await
    }

    pub async fn reject_payment_request(
        &self,
        admin_id: Uuid,
        id: Uuid,
        note: Option<&str>,
    ) -> AppResult<SettlementOutcome> {
        let mut tx = self.pool.begin().await?;

        let request = PaymentRequestRepository::transition_from_pending(
            &mut tx,
            id,
            PaymentRequestStatus::Rejected.as_str(),
            admin_id,
            note,
        )
        .await?;
        let request = match request {
            Some(request) => request,
            None => return Err(payment_request_not_pending(&mut tx, id).await),
        };

        let outcome = SettlementOutcome {
            target: ApprovalTarget::PaymentRequest,
            target_id: id,
            user_id: request.user_id,
            decision: ApprovalDecision::Rejected,
            status: request.status.clone(),
            balance_change: 0,
            new_balance: None,
            decided_by: admin_id,
        };

        record_decision(
            &mut tx,
            &outcome,
            AuditAction::RejectPaymentRequest,
            note,
            json!({
                "credits": request.credits_requested,
                "amount_mmk": request.amount_mmk,
                "transaction_ref": request.transaction_ref,
            }),
        )
        .await?;

        tx.commit().await?;
        self.finish(outcome).await
    }

    /// Credits were taken when the order was placed, so approval only
    /// closes the order
    pub async fn approve_order(
        &self,
        admin_id: Uuid,
        id: Uuid,
        note: Option<&str>,
    ) -> AppResult<SettlementOutcome> {
        let mut tx = self.pool.begin().await?;

        let order = OrderRepository::transition_from_pending(
            &mut tx,
            id,
            OrderStatus::Completed.as_str(),
            admin_id,
            note,
        )
        .await?;
        let order = match order {
            Some(order) => order,
            None => return Err(order_not_pending(&mut tx, id).await),
        };

        let outcome = SettlementOutcome {
            target: ApprovalTarget::Order,
            target_id: id,
            user_id: order.user_id,
            decision: ApprovalDecision::Approved,
            status: order.status.clone(),
            balance_change: 0,
            new_balance: None,
            decided_by: admin_id,
        };

        record_decision(
            &mut tx,
            &outcome,
            AuditAction::ApproveOrder,
            note,
            json!({
                "product_id": order.product_id,
                "credits_used": order.credits_used,
            }),
        )
        .await?;

        tx.commit().await?;
        self.finish(outcome).await
    }

    /// Rejection refunds the credits taken at placement and puts the
    /// reserved unit back into stock
    pub async fn reject_order(
        &self,
        admin_id: Uuid,
        id: Uuid,
        note: Option<&str>,
    ) -> AppResult<SettlementOutcome> {
        let mut tx = self.pool.begin().await?;

        let order = OrderRepository::transition_from_pending(
            &mut tx,
            id,
            OrderStatus::Rejected.as_str(),
            admin_id,
            note,
        )
        .await?;
        let order = match order {
            Some(order) => order,
            None => return Err(order_not_pending(&mut tx, id).await),
        };

        // Product row before profile row, the same order place_order locks in
        ProductRepository::adjust_stock(&mut tx, order.product_id, 1).await?;

        let description = format!("Refund for rejected order {}", id);
        let entry = ledger::apply_entry(
            &mut tx,
            &LedgerEntry {
                user_id: order.user_id,
                amount: order.credits_used,
                transaction_type: CreditTransactionType::Refund,
                reference_type: ReferenceType::Order,
                reference_id: Some(id),
                description: Some(&description),
                created_by: Some(admin_id),
            },
        )
        .await?;

        let outcome = SettlementOutcome {
            target: ApprovalTarget::Order,
            target_id: id,
            user_id: order.user_id,
            decision: ApprovalDecision::Rejected,
            status: order.status.clone(),
            balance_change: entry.amount,
            new_balance: Some(entry.new_balance),
            decided_by: admin_id,
        };

        record_decision(
            &mut tx,
            &outcome,
            AuditAction::RejectOrder,
            note,
            json!({
                "product_id": order.product_id,
                "refunded": order.credits_used,
                "new_balance": entry.new_balance,
            }),
        )
        .await?;

        tx.commit().await?;
        self.finish(outcome).await
    }

    async fn finish(&self, outcome: SettlementOutcome) -> AppResult<SettlementOutcome> {
        info!(
            target = %outcome.target,
            target_id = %outcome.target_id,
            status = %outcome.status,
            admin_id = %outcome.decided_by,
            balance_change = outcome.balance_change,
            "Settlement committed"
        );
        self.notifier.settlement_completed(&outcome).await;
        Ok(outcome)
    }
}

async fn record_decision(
    conn: &mut PgConnection,
    outcome: &SettlementOutcome,
    action: AuditAction,
    note: Option<&str>,
    mut details: serde_json::Value,
) -> AppResult<()> {
    ApprovalRepository::insert(
        conn,
        outcome.target.as_str(),
        outcome.target_id,
        outcome.decision.as_str(),
        outcome.decided_by,
        note,
    )
    .await
    .map_err(|e| {
        if e.is_unique_violation("approval_workflows_settled_target_key") {
            already_processed(outcome.target, outcome.target_id, &outcome.status)
        } else {
            e.into()
        }
    })?;

    if let Some(note) = note {
        details["note"] = json!(note);
    }
    audit::record(
        conn,
        outcome.decided_by,
        action,
        outcome.target.as_str(),
        Some(outcome.target_id.to_string()),
        details,
    )
    .await?;

    Ok(())
}

fn already_processed(target: ApprovalTarget, id: Uuid, status: &str) -> AppError {
    let entity = match target {
        ApprovalTarget::Order => "Order",
        ApprovalTarget::PaymentRequest => "Payment request",
        ApprovalTarget::Product => "Product",
    };
    AppError::new(AppErrorKind::Domain(DomainError::AlreadyProcessed {
        entity: entity.to_string(),
        id: id.to_string(),
        status: status.to_string(),
    }))
}

/// Distinguishes "missing" from "already decided" after a guarded update
/// matched nothing
async fn order_not_pending(conn: &mut PgConnection, id: Uuid) -> AppError {
    match OrderRepository::current_status(conn, id).await {
        Ok(Some(status)) => already_processed(ApprovalTarget::Order, id, &status),
        Ok(None) => AppError::not_found("Order", id),
        Err(e) => e.into(),
    }
}

async fn payment_request_not_pending(conn: &mut PgConnection, id: Uuid) -> AppError {
    match PaymentRequestRepository::current_status(conn, id).await {
        Ok(Some(status)) => already_processed(ApprovalTarget::PaymentRequest, id, &status),
        Ok(None) => AppError::not_found("Payment request", id),
        Err(e) => e.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_already_processed_error() {
        let id = Uuid::nil();
        let err = already_processed(ApprovalTarget::PaymentRequest, id, "approved");
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.error_code(), ErrorCode::AlreadyProcessed);
        assert_eq!(
            err.user_message(),
            format!("Payment request '{}' has already been approved", id)
        );
    }

    #[test]
    fn test_outcome_serializes_with_text_enums() {
        let outcome = SettlementOutcome {
            target: ApprovalTarget::Order,
            target_id: Uuid::nil(),
            user_id: Uuid::nil(),
            decision: ApprovalDecision::Rejected,
            status: "rejected".to_string(),
            balance_change: 1500,
            new_balance: Some(1500),
            decided_by: Uuid::nil(),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["target"], "order");
        assert_eq!(value["decision"], "rejected");
        assert_eq!(value["balance_change"], 1500);
    }
}

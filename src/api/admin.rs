//! Admin back office endpoints
//!
//! Every handler takes `AdminUser`, so the role is checked against the
//! database on each request.

use crate::api::{json_body, parse_filter, ApiPath, ApiQuery, AppState, ListMeta, ListQuery};
use crate::database::repository::Page;
use crate::domain::{ApprovalTarget, AuditAction, OrderStatus, PaymentRequestStatus};
use crate::error::AppError;
use crate::middleware::auth::AdminUser;
use crate::middleware::error::{success_response, success_response_with_meta};
use crate::services::catalog::{CreateProductInput, UpdateProductInput};
use crate::services::users::{AdjustCreditsInput, ProfileInput};
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

pub const MAX_NOTE_LEN: usize = 500;

pub async fn stats(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<impl IntoResponse, AppError> {
    Ok(success_response(state.dashboard.stats().await?))
}

// Products

pub async fn list_products(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = query.page();
    let products = state.catalog.list_all_products(page).await?;
    let meta = ListMeta::new(page, products.len());
    Ok(success_response_with_meta(products, meta))
}

pub async fn create_product(
    State(state): State<AppState>,
    admin: AdminUser,
    payload: Result<Json<CreateProductInput>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let input = json_body(payload)?;
    let product = state.catalog.create_product(admin.id(), input).await?;
    Ok((StatusCode::CREATED, success_response(product)))
}

pub async fn update_product(
    State(state): State<AppState>,
    admin: AdminUser,
    ApiPath(id): ApiPath<Uuid>,
    payload: Result<Json<UpdateProductInput>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let input = json_body(payload)?;
    let product = state.catalog.update_product(admin.id(), id, input).await?;
    Ok(success_response(product))
}

pub async fn delete_product(
    State(state): State<AppState>,
    admin: AdminUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let removal = state.catalog.delete_product(admin.id(), id).await?;
    Ok(success_response(serde_json::json!({ "id": id, "result": removal })))
}

// Users

pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = query.page();
    let users = state.users.list_users(query.search.as_deref(), page).await?;
    let meta = ListMeta::new(page, users.len());
    Ok(success_response_with_meta(users, meta))
}

pub async fn get_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(success_response(state.users.get_user(id).await?))
}

pub async fn update_user(
    State(state): State<AppState>,
    admin: AdminUser,
    ApiPath(id): ApiPath<Uuid>,
    payload: Result<Json<ProfileInput>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let input = json_body(payload)?;
    let profile = state.users.update_user(admin.id(), id, input).await?;
    Ok(success_response(profile))
}

pub async fn delete_user(
    State(state): State<AppState>,
    admin: AdminUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.users.delete_user(admin.id(), id).await?;
    Ok(success_response(serde_json::json!({ "id": id, "deleted": true })))
}

pub async fn adjust_credits(
    State(state): State<AppState>,
    admin: AdminUser,
    ApiPath(id): ApiPath<Uuid>,
    payload: Result<Json<AdjustCreditsInput>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let input = json_body(payload)?;
    let adjustment = state.users.adjust_credits(admin.id(), id, input).await?;
    Ok(success_response(adjustment))
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub admin: bool,
}

pub async fn set_role(
    State(state): State<AppState>,
    admin: AdminUser,
    ApiPath(id): ApiPath<Uuid>,
    payload: Result<Json<RoleRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = json_body(payload)?;
    let changed = state.users.set_admin(admin.id(), id, request.admin).await?;
    Ok(success_response(serde_json::json!({
        "user_id": id,
        "is_admin": request.admin,
        "changed": changed,
    })))
}

// Orders and payment requests

#[derive(Debug, Default, Deserialize)]
pub struct DecisionRequest {
    pub note: Option<String>,
}

/// The decision body is optional; an empty body means no note
pub fn decision_note(body: &Bytes) -> Result<Option<String>, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let request: DecisionRequest = serde_json::from_slice(body)
        .map_err(|e| AppError::invalid_field("body", e.to_string()))?;
    let note = request
        .note
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    if let Some(note) = &note {
        if note.chars().count() > MAX_NOTE_LEN {
            return Err(AppError::invalid_field(
                "note",
                format!("must be at most {} characters", MAX_NOTE_LEN),
            ));
        }
    }
    Ok(note)
}

pub async fn list_orders(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let status = parse_filter::<OrderStatus>("status", query.status.as_deref())?;
    let page = query.page();
    let orders = state.orders.list_orders(status, page).await?;
    let meta = ListMeta::new(page, orders.len());
    Ok(success_response_with_meta(orders, meta))
}

pub async fn approve_order(
    State(state): State<AppState>,
    admin: AdminUser,
    ApiPath(id): ApiPath<Uuid>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let note = decision_note(&body)?;
    let outcome = state
        .settlement
        .approve_order(admin.id(), id, note.as_deref())
        .await?;
    Ok(success_response(outcome))
}

pub async fn reject_order(
    State(state): State<AppState>,
    admin: AdminUser,
    ApiPath(id): ApiPath<Uuid>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let note = decision_note(&body)?;
    let outcome = state
        .settlement
        .reject_order(admin.id(), id, note.as_deref())
        .await?;
    Ok(success_response(outcome))
}

pub async fn list_payment_requests(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let status = parse_filter::<PaymentRequestStatus>("status", query.status.as_deref())?;
    let page = query.page();
    let requests = state.payment_requests.list(status, page).await?;
    let meta = ListMeta::new(page, requests.len());
    Ok(success_response_with_meta(requests, meta))
}

pub async fn approve_payment_request(
    State(state): State<AppState>,
    admin: AdminUser,
    ApiPath(id): ApiPath<Uuid>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let note = decision_note(&body)?;
    let outcome = state
        .settlement
        .approve_payment_request(admin.id(), id, note.as_deref())
        .await?;
    Ok(success_response(outcome))
}

pub async fn reject_payment_request(
    State(state): State<AppState>,
    admin: AdminUser,
    ApiPath(id): ApiPath<Uuid>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let note = decision_note(&body)?;
    let outcome = state
        .settlement
        .reject_payment_request(admin.id(), id, note.as_deref())
        .await?;
    Ok(success_response(outcome))
}

// Audit

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub admin_id: Option<Uuid>,
    pub action: Option<String>,
}

pub async fn list_audit_logs(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiQuery(query): ApiQuery<AuditQuery>,
) -> Result<impl IntoResponse, AppError> {
    let action = parse_filter::<AuditAction>("action", query.action.as_deref())?;
    let page = Page::new(query.limit, query.offset);
    let logs = state
        .audit
        .list_audit_logs(query.admin_id, action, page)
        .await?;
    let meta = ListMeta::new(page, logs.len());
    Ok(success_response_with_meta(logs, meta))
}

#[derive(Debug, Default, Deserialize)]
pub struct ApprovalQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub target_type: Option<String>,
}

pub async fn list_approvals(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiQuery(query): ApiQuery<ApprovalQuery>,
) -> Result<impl IntoResponse, AppError> {
    let target = parse_filter::<ApprovalTarget>("target_type", query.target_type.as_deref())?;
    let page = Page::new(query.limit, query.offset);
    let approvals = state.audit.list_approvals(target, page).await?;
    let meta = ListMeta::new(page, approvals.len());
    Ok(success_response_with_meta(approvals, meta))
}

/// On-demand ledger check, same query the background worker runs
pub async fn reconciliation(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<impl IntoResponse, AppError> {
    let report = state.audit.reconcile(state.reconciliation_batch).await?;
    Ok(success_response(serde_json::json!({
        "checked_at": report.checked_at,
        "clean": report.is_clean(),
        "mismatches": report.mismatches,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_note_accepts_empty_body() {
        assert_eq!(decision_note(&Bytes::new()).unwrap(), None);
        assert_eq!(decision_note(&Bytes::from_static(b"  \n")).unwrap(), None);
        assert_eq!(decision_note(&Bytes::from_static(b"{}")).unwrap(), None);
    }

    #[test]
    fn test_decision_note_trims_and_limits() {
        let note = decision_note(&Bytes::from_static(br#"{"note":"  slip unreadable "}"#)).unwrap();
        assert_eq!(note.as_deref(), Some("slip unreadable"));

        let long = format!(r#"{{"note":"{}"}}"#, "x".repeat(MAX_NOTE_LEN + 1));
        assert!(decision_note(&Bytes::from(long)).is_err());
        assert!(decision_note(&Bytes::from_static(b"not json")).is_err());
    }
}

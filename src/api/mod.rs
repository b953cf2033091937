//! HTTP surface: storefront, account, admin back office and the Telegram
//! webhook

pub mod account;
pub mod admin;
pub mod storefront;
pub mod webhooks;

use crate::database::repository::Page;
use crate::domain::UnknownVariant;
use crate::error::AppError;
use crate::health::HealthChecker;
use crate::middleware::auth::{tag_request, TokenVerifier};
use crate::middleware::error::route_not_found;
use crate::services::audit::AuditService;
use crate::services::catalog::CatalogService;
use crate::services::dashboard::DashboardService;
use crate::services::orders::OrderService;
use crate::services::payment_requests::PaymentRequestService;
use crate::services::settlement::SettlementService;
use crate::services::users::UserService;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRef, FromRequestParts, Path, Query};
use axum::http::request::Parts;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Shared handles for the storefront and admin routers
#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<TokenVerifier>,
    pub users: Arc<UserService>,
    pub catalog: Arc<CatalogService>,
    pub orders: Arc<OrderService>,
    pub payment_requests: Arc<PaymentRequestService>,
    pub settlement: Arc<SettlementService>,
    pub dashboard: Arc<DashboardService>,
    pub audit: Arc<AuditService>,
    pub reconciliation_batch: i64,
}

impl FromRef<AppState> for Arc<TokenVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.verifier.clone()
    }
}

impl FromRef<AppState> for Arc<UserService> {
    fn from_ref(state: &AppState) -> Self {
        state.users.clone()
    }
}

/// `limit`/`offset` plus the optional filters list endpoints accept
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub status: Option<String>,
    pub search: Option<String>,
}

impl ListQuery {
    pub fn page(&self) -> Page {
        Page::new(self.limit, self.offset)
    }
}

#[derive(Debug, Serialize)]
pub struct ListMeta {
    pub limit: i64,
    pub offset: i64,
    pub count: usize,
}

impl ListMeta {
    pub fn new(page: Page, count: usize) -> Self {
        Self {
            limit: page.limit,
            offset: page.offset,
            count,
        }
    }
}

/// Parses an optional enum query parameter, treating blank as absent
pub fn parse_filter<T>(field: &str, value: Option<&str>) -> Result<Option<T>, AppError>
where
    T: FromStr<Err = UnknownVariant>,
{
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|e: UnknownVariant| AppError::invalid_field(field, e.to_string())),
    }
}

/// Unwraps a JSON body, reporting malformed input in the standard error shape
pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::invalid_field("body", rejection.body_text()))
}

/// `Path` whose rejection renders in the standard error envelope
#[derive(Debug)]
pub struct ApiPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(Self(value)),
            Err(rejection) => Err(tag_request(
                AppError::invalid_field("path", rejection.body_text()),
                parts,
            )),
        }
    }
}

/// `Query` whose rejection renders in the standard error envelope
#[derive(Debug)]
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(tag_request(
                AppError::invalid_field("query", rejection.body_text()),
                parts,
            )),
        }
    }
}

/// Health, storefront, account and admin routes; the webhook router is
/// merged separately since it carries its own state
pub fn router(state: AppState, health: HealthChecker) -> Router {
    let health_routes = Router::new()
        .route("/health", get(crate::health::health))
        .route("/health/ready", get(crate::health::ready))
        .route("/health/live", get(crate::health::live))
        .with_state(health);

    let storefront_routes = Router::new()
        .route("/api/products", get(storefront::list_products))
        .route("/api/products/{id}", get(storefront::get_product))
        .route("/api/payment-methods", get(storefront::list_payment_methods))
        .route("/api/credits/quote", get(storefront::quote_credits))
        .route("/api/me", get(account::get_me).post(account::upsert_me))
        .route("/api/me/transactions", get(account::list_my_transactions))
        .route(
            "/api/orders",
            get(account::list_my_orders).post(account::place_order),
        )
        .route("/api/orders/{id}", get(account::get_my_order))
        .route(
            "/api/payment-requests",
            get(account::list_my_payment_requests).post(account::submit_payment_request),
        );

    let admin_routes = Router::new()
        .route("/api/admin/stats", get(admin::stats))
        .route(
            "/api/admin/products",
            get(admin::list_products).post(admin::create_product),
        )
        .route(
            "/api/admin/products/{id}",
            put(admin::update_product).delete(admin::delete_product),
        )
        .route("/api/admin/users", get(admin::list_users))
        .route(
            "/api/admin/users/{id}",
            get(admin::get_user)
                .patch(admin::update_user)
                .delete(admin::delete_user),
        )
        .route("/api/admin/users/{id}/credits", post(admin::adjust_credits))
        .route("/api/admin/users/{id}/role", put(admin::set_role))
        .route("/api/admin/orders", get(admin::list_orders))
        .route("/api/admin/orders/{id}/approve", post(admin::approve_order))
        .route("/api/admin/orders/{id}/reject", post(admin::reject_order))
        .route("/api/admin/payment-requests", get(admin::list_payment_requests))
        .route(
            "/api/admin/payment-requests/{id}/approve",
            post(admin::approve_payment_request),
        )
        .route(
            "/api/admin/payment-requests/{id}/reject",
            post(admin::reject_payment_request),
        )
        .route("/api/admin/audit-logs", get(admin::list_audit_logs))
        .route("/api/admin/approvals", get(admin::list_approvals))
        .route("/api/admin/reconciliation", get(admin::reconciliation));

    Router::new()
        .merge(health_routes)
        .merge(storefront_routes.merge(admin_routes).with_state(state))
        .fallback(route_not_found)
}

//! Signed-in user endpoints: profile, ledger, orders, payment requests

use crate::api::{json_body, parse_filter, ApiPath, ApiQuery, AppState, ListMeta, ListQuery};
use crate::domain::{OrderStatus, PaymentRequestStatus};
use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::middleware::error::{success_response, success_response_with_meta};
use crate::services::payment_requests::SubmitPaymentRequest;
use crate::services::users::ProfileInput;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

pub async fn get_me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let profile = state.users.get_profile(user.id).await?;
    Ok(success_response(profile))
}

/// First call registers the profile; later calls update it
pub async fn upsert_me(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<ProfileInput>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let input = json_body(payload)?;
    let profile = state
        .users
        .ensure_profile(user.id, user.email.as_deref(), input)
        .await?;
    Ok(success_response(profile))
}

pub async fn list_my_transactions(
    State(state): State<AppState>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = query.page();
    let transactions = state.users.list_transactions(user.id, page).await?;
    let meta = ListMeta::new(page, transactions.len());
    Ok(success_response_with_meta(transactions, meta))
}

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub product_id: Uuid,
    pub phone_number: String,
}

pub async fn place_order(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<PlaceOrderRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = json_body(payload)?;
    let order = state
        .orders
        .place_order(user.id, request.product_id, &request.phone_number)
        .await?;
    info!(order_id = %order.id, user_id = %user.id, "Order placed via API");
    Ok((StatusCode::CREATED, success_response(order)))
}

pub async fn list_my_orders(
    State(state): State<AppState>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let status = parse_filter::<OrderStatus>("status", query.status.as_deref())?;
    let page = query.page();
    let orders = state.orders.list_my_orders(user.id, status, page).await?;
    let meta = ListMeta::new(page, orders.len());
    Ok(success_response_with_meta(orders, meta))
}

pub async fn get_my_order(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let order = state.orders.get_my_order(user.id, id).await?;
    Ok(success_response(order))
}

pub async fn submit_payment_request(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<SubmitPaymentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let input = json_body(payload)?;
    let request = state.payment_requests.submit(user.id, input).await?;
    Ok((StatusCode::CREATED, success_response(request)))
}

pub async fn list_my_payment_requests(
    State(state): State<AppState>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let status = parse_filter::<PaymentRequestStatus>("status", query.status.as_deref())?;
    let page = query.page();
    let requests = state
        .payment_requests
        .list_mine(user.id, status, page)
        .await?;
    let meta = ListMeta::new(page, requests.len());
    Ok(success_response_with_meta(requests, meta))
}

//! Spending credits on products

use crate::database::order_repository::{Order, OrderRepository};
use crate::database::product_repository::ProductRepository;
use crate::database::repository::Page;
use crate::database::user_repository::UserRepository;
use crate::domain::{
    mask_phone_number, normalize_phone_number, CreditTransactionType, OrderStatus, ReferenceType,
};
use crate::error::{AppError, AppErrorKind, AppResult, DomainError, ValidationError};
use crate::services::ledger::{self, LedgerEntry};
use crate::services::notification::{AdminNotifier, OrderNotice};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct OrderService {
    pool: PgPool,
    orders: OrderRepository,
    users: UserRepository,
    notifier: Arc<dyn AdminNotifier>,
}

impl OrderService {
    pub fn new(pool: PgPool, notifier: Arc<dyn AdminNotifier>) -> Self {
        Self {
            orders: OrderRepository::new(pool.clone()),
            users: UserRepository::new(pool.clone()),
            pool,
            notifier,
        }
    }

    /// Places an order for one unit of `product_id`.
    ///
    /// The price is debited and one unit of stock reserved in the same
    /// transaction that creates the pending order; rejection later
    /// reverses both. Rows are locked product first, then profile (inside
    /// the ledger); every settlement path that touches both keeps that order.
    pub async fn place_order(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        phone_number: &str,
    ) -> AppResult<Order> {
        let phone = normalize_phone_number(phone_number).ok_or_else(|| {
            AppError::new(AppErrorKind::Validation(ValidationError::InvalidPhoneNumber {
                phone: phone_number.to_string(),
            }))
        })?;

        let mut tx = self.pool.begin().await?;

        let product = ProductRepository::lock_for_update(&mut tx, product_id)
            .await?
            .ok_or_else(|| AppError::not_found("Product", product_id))?;

        if !product.is_active {
            return Err(unavailable(product_id, "product is no longer sold"));
        }
        if product.stock <= 0 {
            return Err(unavailable(product_id, "out of stock"));
        }

        ProductRepository::adjust_stock(&mut tx, product_id, -1).await?;

        let order_id = Uuid::new_v4();
        let description = format!("Order for {}", product.name);
        ledger::apply_entry(
            &mut tx,
            &LedgerEntry {
                user_id,
                amount: -product.price_credits,
                transaction_type: CreditTransactionType::Order,
                reference_type: ReferenceType::Order,
                reference_id: Some(order_id),
                description: Some(&description),
                created_by: Some(user_id),
            },
        )
        .await?;

        OrderRepository::insert(
            &mut tx,
            order_id,
            user_id,
            product_id,
            &phone,
            product.price_credits,
        )
        .await?;

        tx.commit().await?;

        info!(
            order_id = %order_id,
            user_id = %user_id,
            product_id = %product_id,
            phone = %mask_phone_number(&phone),
            credits = product.price_credits,
            "Order placed"
        );

        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| AppError::not_found("Order", order_id))?;

        let customer = self.customer_label(user_id).await;
        self.notifier
            .order_placed(&OrderNotice {
                order_id,
                customer,
                product_name: order.product_name.clone(),
                operator: order.product_operator.clone(),
                phone_number: order.phone_number.clone(),
                credits: order.credits_used,
            })
            .await;

        Ok(order)
    }

    pub async fn list_my_orders(
        &self,
        user_id: Uuid,
        status: Option<OrderStatus>,
        page: Page,
    ) -> AppResult<Vec<Order>> {
        Ok(self
            .orders
            .list(Some(user_id), status.map(|s| s.as_str()), page)
            .await?)
    }

    /// Another user's order is reported as missing
    pub async fn get_my_order(&self, user_id: Uuid, id: Uuid) -> AppResult<Order> {
        self.orders
            .find_for_user(user_id, id)
            .await?
            .ok_or_else(|| AppError::not_found("Order", id))
    }

    pub async fn list_orders(&self, status: Option<OrderStatus>, page: Page) -> AppResult<Vec<Order>> {
        Ok(self.orders.list(None, status.map(|s| s.as_str()), page).await?)
    }

    async fn customer_label(&self, user_id: Uuid) -> String {
        match self.users.find_by_id(user_id).await {
            Ok(Some(profile)) => profile
                .display_name
                .or(profile.email)
                .unwrap_or_else(|| user_id.to_string()),
            _ => user_id.to_string(),
        }
    }
}

fn unavailable(product_id: Uuid, reason: &str) -> AppError {
    AppError::new(AppErrorKind::Domain(DomainError::ProductUnavailable {
        product_id: product_id.to_string(),
        reason: reason.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_unavailable_error() {
        let err = unavailable(Uuid::nil(), "out of stock");
        assert_eq!(err.status_code(), 422);
        assert_eq!(err.error_code(), ErrorCode::ProductUnavailable);
        assert!(err.user_message().ends_with("out of stock"));
    }
}

//! Product catalog: storefront browsing and back-office CRUD

use crate::cache::keys::products::{namespace_pattern, ListKey};
use crate::cache::{Cache, RedisCache};
use crate::database::approval_repository::ApprovalRepository;
use crate::database::product_repository::{Product, ProductFilter, ProductRepository};
use crate::database::repository::Page;
use crate::domain::{ApprovalDecision, ApprovalTarget, AuditAction, Operator, ProductCategory};
use crate::error::{AppError, AppErrorKind, AppResult, ValidationError};
use crate::services::audit;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const MAX_PRODUCT_NAME_LEN: usize = 120;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProductInput {
    pub name: String,
    pub description: Option<String>,
    pub operator: Operator,
    pub category: ProductCategory,
    pub price_credits: i64,
    #[serde(default)]
    pub stock: i32,
    pub is_active: Option<bool>,
}

/// Partial update; absent fields keep their value
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProductInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub operator: Option<Operator>,
    pub category: Option<ProductCategory>,
    pub price_credits: Option<i64>,
    pub stock: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProductRemoval {
    Deleted,
    /// Orders reference the product, so it was only hidden
    Deactivated,
}

pub struct CatalogService {
    repo: ProductRepository,
    pool: PgPool,
    cache: Option<RedisCache>,
    cache_ttl: Duration,
}

impl CatalogService {
    pub fn new(pool: PgPool, cache: Option<RedisCache>, cache_ttl: Duration) -> Self {
        Self {
            repo: ProductRepository::new(pool.clone()),
            pool,
            cache,
            cache_ttl,
        }
    }

    /// Active products for the storefront. Served from Redis when
    /// possible; any cache failure falls through to the database.
    pub async fn list_products(&self, filter: &ProductFilter) -> AppResult<Vec<Product>> {
        let key = ListKey::from_filter(filter).to_string();

        if let Some(ref cache) = self.cache {
            match <RedisCache as Cache<Vec<Product>>>::get(cache, &key).await {
                Ok(Some(products)) => return Ok(products),
                Ok(None) => {}
                Err(e) => warn!(error = %e, key = %key, "Product cache read failed"),
            }
        }

        let products = self.repo.list_active(filter).await?;

        if let Some(ref cache) = self.cache {
            if let Err(e) = cache.set(&key, &products, Some(self.cache_ttl)).await {
                warn!(error = %e, key = %key, "Product cache write failed");
            }
        }

        Ok(products)
    }

    /// Storefront lookup; inactive products are hidden
    pub async fn get_active_product(&self, id: Uuid) -> AppResult<Product> {
        match self.repo.find_by_id(id).await? {
            Some(product) if product.is_active => Ok(product),
            _ => Err(AppError::not_found("Product", id)),
        }
    }

    pub async fn list_all_products(&self, page: Page) -> AppResult<Vec<Product>> {
        Ok(self.repo.list_page(page).await?)
    }

    pub async fn create_product(&self, admin_id: Uuid, input: CreateProductInput) -> AppResult<Product> {
        let name = validate_name(&input.name)?;
        validate_price(input.price_credits)?;
        validate_stock(input.stock)?;

        let now = chrono::Utc::now();
        let draft = Product {
            id: Uuid::new_v4(),
            name,
            description: normalize_description(input.description),
            operator: input.operator.as_str().to_string(),
            category: input.category.as_str().to_string(),
            price_credits: input.price_credits,
            stock: input.stock,
            is_active: input.is_active.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool.begin().await?;
        let product = ProductRepository::insert_with(&mut tx, &draft).await?;
        audit::record(
            &mut tx,
            admin_id,
            AuditAction::CreateProduct,
            "product",
            Some(product.id.to_string()),
            json!({
                "name": product.name,
                "operator": product.operator,
                "price_credits": product.price_credits,
                "stock": product.stock,
            }),
        )
        .await?;
        tx.commit().await?;

        info!(product_id = %product.id, admin_id = %admin_id, "Product created");
        self.invalidate().await;
        Ok(product)
    }

    pub async fn update_product(
        &self,
        admin_id: Uuid,
        id: Uuid,
        input: UpdateProductInput,
    ) -> AppResult<Product> {
        let mut tx = self.pool.begin().await?;
        let current = ProductRepository::lock_for_update(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::not_found("Product", id))?;

        let updated = apply_update(&current, input.clone())?;
        let product = ProductRepository::update_with(&mut tx, id, &updated)
            .await?
            .ok_or_else(|| AppError::not_found("Product", id))?;
        record_listing_change(&mut tx, admin_id, id, current.is_active, product.is_active).await?;

        audit::record(
            &mut tx,
            admin_id,
            AuditAction::UpdateProduct,
            "product",
            Some(id.to_string()),
            json!({
                "before": {
                    "name": current.name,
                    "price_credits": current.price_credits,
                    "stock": current.stock,
                    "is_active": current.is_active,
                },
                "after": {
                    "name": product.name,
                    "price_credits": product.price_credits,
                    "stock": product.stock,
                    "is_active": product.is_active,
                },
            }),
        )
        .await?;
        tx.commit().await?;

        info!(product_id = %id, admin_id = %admin_id, "Product updated");
        self.invalidate().await;
        Ok(product)
    }

    /// Hard delete when no order references the product, otherwise the
    /// product is deactivated so order history keeps its foreign key
    pub async fn delete_product(&self, admin_id: Uuid, id: Uuid) -> AppResult<ProductRemoval> {
        let mut tx = self.pool.begin().await?;
        let current = ProductRepository::lock_for_update(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::not_found("Product", id))?;

        let removal = if ProductRepository::has_orders(&mut tx, id).await? {
            let hidden = Product {
                is_active: false,
                ..current.clone()
            };
            ProductRepository::update_with(&mut tx, id, &hidden).await?;
            record_listing_change(&mut tx, admin_id, id, current.is_active, false).await?;
            ProductRemoval::Deactivated
        } else {
            ProductRepository::delete_with(&mut tx, id).await?;
            ProductRemoval::Deleted
        };

        let action = match removal {
            ProductRemoval::Deleted => AuditAction::DeleteProduct,
            ProductRemoval::Deactivated => AuditAction::DeactivateProduct,
        };
        audit::record(
            &mut tx,
            admin_id,
            action,
            "product",
            Some(id.to_string()),
            json!({ "name": current.name, "operator": current.operator }),
        )
        .await?;
        tx.commit().await?;

        info!(product_id = %id, admin_id = %admin_id, removal = ?removal, "Product removed");
        self.invalidate().await;
        Ok(removal)
    }

    async fn invalidate(&self) {
        if let Some(ref cache) = self.cache {
            match cache.delete_pattern(&namespace_pattern()).await {
                Ok(removed) => debug!(removed = removed, "Product cache invalidated"),
                Err(e) => warn!(error = %e, "Product cache invalidation failed"),
            }
        }
    }
}

/// Listing a product is an approval, hiding it a rejection
pub fn listing_decision(was_active: bool, is_active: bool) -> Option<ApprovalDecision> {
    match (was_active, is_active) {
        (false, true) => Some(ApprovalDecision::Approved),
        (true, false) => Some(ApprovalDecision::Rejected),
        _ => None,
    }
}

async fn record_listing_change(
    conn: &mut PgConnection,
    admin_id: Uuid,
    id: Uuid,
    was_active: bool,
    is_active: bool,
) -> AppResult<()> {
    if let Some(decision) = listing_decision(was_active, is_active) {
        ApprovalRepository::insert(
            conn,
            ApprovalTarget::Product.as_str(),
            id,
            decision.as_str(),
            admin_id,
            None,
        )
        .await?;
        debug!(product_id = %id, decision = %decision, "Product listing decision recorded");
    }
    Ok(())
}

fn validate_name(raw: &str) -> AppResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::MissingField {
                field: "name".to_string(),
            },
        )));
    }
    if name.chars().count() > MAX_PRODUCT_NAME_LEN {
        return Err(AppError::invalid_field(
            "name",
            format!("must be at most {} characters", MAX_PRODUCT_NAME_LEN),
        ));
    }
    Ok(name.to_string())
}

fn validate_price(price_credits: i64) -> AppResult<()> {
    if price_credits <= 0 {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidAmount {
                amount: price_credits.to_string(),
                reason: "price must be positive".to_string(),
            },
        )));
    }
    Ok(())
}

fn validate_stock(stock: i32) -> AppResult<()> {
    if stock < 0 {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::OutOfRange {
                field: "stock".to_string(),
                min: Some("0".to_string()),
                max: None,
            },
        )));
    }
    Ok(())
}

fn normalize_description(description: Option<String>) -> Option<String> {
    description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}

/// Merges a partial update into the current row, validating the result
pub fn apply_update(current: &Product, input: UpdateProductInput) -> AppResult<Product> {
    let mut product = current.clone();

    if let Some(name) = input.name {
        product.name = validate_name(&name)?;
    }
    if let Some(description) = input.description {
        product.description = normalize_description(Some(description));
    }
    if let Some(operator) = input.operator {
        product.operator = operator.as_str().to_string();
    }
    if let Some(category) = input.category {
        product.category = category.as_str().to_string();
    }
    if let Some(price) = input.price_credits {
        validate_price(price)?;
        product.price_credits = price;
    }
    if let Some(stock) = input.stock {
        validate_stock(stock)?;
        product.stock = stock;
    }
    if let Some(is_active) = input.is_active {
        product.is_active = is_active;
    }

    Ok(product)
}

use crate::database::error::DatabaseError;
use crate::database::repository::Page;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

const PRODUCT_COLUMNS: &str = "id, name, description, operator, category, price_credits, stock, \
                               is_active, created_at, updated_at";

/// Product entity
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub operator: String,
    pub category: String,
    pub price_credits: i64,
    pub stock: i32,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Storefront listing filter; `None` fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductFilter {
    pub operator: Option<String>,
    pub category: Option<String>,
    pub search: Option<String>,
}

/// Repository for the product catalog
pub struct ProductRepository {
    pool: PgPool,
}

impl ProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Product>, DatabaseError> {
        sqlx::query_as::<_, Product>(&format!(
            "SELECT {} FROM products WHERE id = $1",
            PRODUCT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Active products matching the filter, ordered by operator then price
    pub async fn list_active(&self, filter: &ProductFilter) -> Result<Vec<Product>, DatabaseError> {
        let pattern = filter.search.as_ref().map(|s| format!("%{}%", s.trim()));
        sqlx::query_as::<_, Product>(&format!(
            "SELECT {} FROM products
             WHERE is_active
               AND ($1::text IS NULL OR operator = $1)
               AND ($2::text IS NULL OR category = $2)
               AND ($3::text IS NULL OR name ILIKE $3)
             ORDER BY operator ASC, price_credits ASC, name ASC",
            PRODUCT_COLUMNS
        ))
        .bind(filter.operator.as_deref())
        .bind(filter.category.as_deref())
        .bind(pattern)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Every product including inactive ones, for the back office
    pub async fn list_page(&self, page: Page) -> Result<Vec<Product>, DatabaseError> {
        sqlx::query_as::<_, Product>(&format!(
            "SELECT {} FROM products ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            PRODUCT_COLUMNS
        ))
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn lock_for_update(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Product>, DatabaseError> {
        sqlx::query_as::<_, Product>(&format!(
            "SELECT {} FROM products WHERE id = $1 FOR UPDATE",
            PRODUCT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Adds `delta` to stock; the CHECK constraint rejects going below zero
    pub async fn adjust_stock(
        conn: &mut PgConnection,
        id: Uuid,
        delta: i32,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE products SET stock = stock + $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(delta)
            .execute(conn)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    pub async fn insert_with(
        conn: &mut PgConnection,
        entity: &Product,
    ) -> Result<Product, DatabaseError> {
        sqlx::query_as::<_, Product>(&format!(
            "INSERT INTO products (id, name, description, operator, category, price_credits, stock, is_active)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {}",
            PRODUCT_COLUMNS
        ))
        .bind(entity.id)
        .bind(&entity.name)
        .bind(&entity.description)
        .bind(&entity.operator)
        .bind(&entity.category)
        .bind(entity.price_credits)
        .bind(entity.stock)
        .bind(entity.is_active)
        .fetch_one(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn update_with(
        conn: &mut PgConnection,
        id: Uuid,
        entity: &Product,
    ) -> Result<Option<Product>, DatabaseError> {
        sqlx::query_as::<_, Product>(&format!(
            "UPDATE products
             SET name = $2, description = $3, operator = $4, category = $5,
                 price_credits = $6, stock = $7, is_active = $8, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            PRODUCT_COLUMNS
        ))
        .bind(id)
        .bind(&entity.name)
        .bind(&entity.description)
        .bind(&entity.operator)
        .bind(&entity.category)
        .bind(entity.price_credits)
        .bind(entity.stock)
        .bind(entity.is_active)
        .fetch_optional(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn has_orders(conn: &mut PgConnection, id: Uuid) -> Result<bool, DatabaseError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM orders WHERE product_id = $1)")
            .bind(id)
            .fetch_one(conn)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    pub async fn delete_with(conn: &mut PgConnection, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }
}

//! Public catalogue and purchase information

use crate::api::{parse_filter, ApiPath, ApiQuery, AppState};
use crate::database::product_repository::ProductFilter;
use crate::domain::{Operator, ProductCategory};
use crate::error::AppError;
use crate::middleware::error::{success_response, success_response_with_meta};
use axum::extract::State;
use axum::response::IntoResponse;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct ProductQuery {
    pub operator: Option<String>,
    pub category: Option<String>,
    pub search: Option<String>,
}

impl ProductQuery {
    /// Validates enum filters and normalises them to their stored form
    pub fn to_filter(&self) -> Result<ProductFilter, AppError> {
        let operator = parse_filter::<Operator>("operator", self.operator.as_deref())?;
        let category = parse_filter::<ProductCategory>("category", self.category.as_deref())?;
        Ok(ProductFilter {
            operator: operator.map(|o| o.as_str().to_string()),
            category: category.map(|c| c.as_str().to_string()),
            search: self
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        })
    }
}

pub async fn list_products(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ProductQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = query.to_filter()?;
    let products = state.catalog.list_products(&filter).await?;
    let count = products.len();
    Ok(success_response_with_meta(
        products,
        serde_json::json!({ "count": count }),
    ))
}

pub async fn get_product(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let product = state.catalog.get_active_product(id).await?;
    Ok(success_response(product))
}

pub async fn list_payment_methods(State(state): State<AppState>) -> impl IntoResponse {
    success_response(state.payment_requests.list_payment_methods())
}

#[derive(Debug, Deserialize)]
pub struct QuoteQuery {
    pub credits: Option<i64>,
}

pub async fn quote_credits(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<QuoteQuery>,
) -> Result<impl IntoResponse, AppError> {
    let credits = query
        .credits
        .ok_or_else(|| AppError::invalid_field("credits", "is required"))?;
    let quote = state.payment_requests.quote(credits)?;
    Ok(success_response(quote))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_query_normalises_filters() {
        let query = ProductQuery {
            operator: Some("MPT".to_string()),
            category: Some("".to_string()),
            search: Some("  1GB ".to_string()),
        };
        let filter = query.to_filter().unwrap();
        assert_eq!(filter.operator.as_deref(), Some("mpt"));
        assert_eq!(filter.category, None);
        assert_eq!(filter.search.as_deref(), Some("1GB"));
    }

    #[test]
    fn test_unknown_operator_is_rejected() {
        let query = ProductQuery {
            operator: Some("telenor".to_string()),
            ..Default::default()
        };
        assert_eq!(query.to_filter().unwrap_err().status_code(), 400);
    }
}

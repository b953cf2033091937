//! JSON envelopes for API responses
//!
//! Failures render as `{error, message, request_id, timestamp, retryable}`
//! and successes as `{success, data, meta?, timestamp}`.

use crate::error::{AppError, ErrorCode};
use axum::{
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorCode,
    pub message: String,
    pub request_id: Option<String>,
    /// RFC 3339
    pub timestamp: String,
    pub retryable: bool,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            retryable: error.is_retryable(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // 5xx bodies carry only the generic message; the cause goes to the log
        if status_code.is_server_error() {
            tracing::error!(
                error = ?self,
                context = ?self.context,
                request_id = ?self.request_id,
                status = status_code.as_u16(),
                "Request failed"
            );
        } else {
            tracing::warn!(
                error = ?self.error_code(),
                message = %self.user_message(),
                request_id = ?self.request_id,
                status = status_code.as_u16(),
                "Request rejected"
            );
        }

        (status_code, Json(ErrorResponse::from_app_error(&self))).into_response()
    }
}

pub fn success_response<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "data": data,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Success envelope with a `meta` object, used by list endpoints
pub fn success_response_with_meta<T: Serialize, M: Serialize>(
    data: T,
    meta: M,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "data": data,
        "meta": meta,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub fn get_request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Router fallback so unknown paths get the same error envelope
pub async fn route_not_found(headers: HeaderMap, uri: Uri) -> AppError {
    let error = AppError::not_found("Route", uri.path());
    match get_request_id_from_headers(&headers) {
        Some(request_id) => error.with_request_id(request_id),
        None => error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppErrorKind, DomainError, ValidationError};

    #[test]
    fn test_error_response_from_app_error() {
        let app_error = AppError::new(AppErrorKind::Domain(DomainError::InsufficientBalance {
            available: 50,
            required: 100,
        }))
        .with_request_id("req_123");

        let error_response = ErrorResponse::from_app_error(&app_error);

        assert_eq!(error_response.error, ErrorCode::InsufficientBalance);
        assert_eq!(error_response.request_id, Some("req_123".to_string()));
        assert!(error_response.message.contains("Insufficient credit balance"));
        assert!(!error_response.retryable);
    }

    #[test]
    fn test_validation_error_is_bad_request() {
        let app_error = AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "Amount must be positive".to_string(),
        }));

        let response = app_error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_error_code_serializes_screaming_case() {
        let json = serde_json::to_string(&ErrorCode::AlreadyProcessed).unwrap();
        assert_eq!(json, "\"ALREADY_PROCESSED\"");
    }

    #[test]
    fn test_success_response_shape() {
        let Json(body) = success_response(serde_json::json!({ "id": 1 }));
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["id"], 1);
        assert!(body.get("timestamp").is_some());

        let Json(body) = success_response_with_meta(vec![1, 2], serde_json::json!({ "count": 2 }));
        assert_eq!(body["meta"]["count"], 2);
    }

    #[tokio::test]
    async fn test_route_not_found_keeps_request_id() {
        let mut headers = HeaderMap::new();
        assert_eq!(get_request_id_from_headers(&headers), None);
        headers.insert("x-request-id", "abc".parse().unwrap());

        let error = route_not_found(headers, Uri::from_static("/api/nope")).await;
        assert_eq!(error.status_code(), 404);
        assert_eq!(error.request_id.as_deref(), Some("abc"));
    }
}

//! Error handling for the Operators Hub backend
//!
//! This module provides a unified error system with proper HTTP status mapping,
//! user-friendly messages, and structured error codes for client handling.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "INSUFFICIENT_BALANCE")]
    InsufficientBalance,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "ALREADY_PROCESSED")]
    AlreadyProcessed,
    #[serde(rename = "PRODUCT_UNAVAILABLE")]
    ProductUnavailable,
    #[serde(rename = "DUPLICATE_PAYMENT_REFERENCE")]
    DuplicatePaymentReference,
    #[serde(rename = "OPERATION_NOT_ALLOWED")]
    OperationNotAllowed,

    // Auth errors
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CACHE_ERROR")]
    CacheError,
    #[serde(rename = "STORAGE_ERROR")]
    StorageError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 504)
    #[serde(rename = "NOTIFICATION_ERROR")]
    NotificationError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Domain-specific business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// User doesn't have enough credits for the operation
    InsufficientBalance { available: i64, required: i64 },
    /// Entity with given id doesn't exist (or isn't visible to the caller)
    NotFound { entity: String, id: String },
    /// Order or payment request already left the pending state
    AlreadyProcessed {
        entity: String,
        id: String,
        status: String,
    },
    /// Product is inactive or out of stock
    ProductUnavailable { product_id: String, reason: String },
    /// The same wallet transaction reference was already submitted
    DuplicatePaymentReference { reference: String },
    /// Request is well-formed but not permitted in the current state
    NotAllowed { reason: String },
}

/// Infrastructure-level errors (database, cache, storage, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Redis cache unavailable
    Cache { message: String },
    /// Payment proof could not be written
    Storage { message: String },
    /// Missing or invalid configuration
    Configuration { message: String },
}

/// External service errors
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Telegram Bot API error
    Notification { message: String, is_retryable: bool },
    /// External service timeout
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Invalid credit or MMK amount
    InvalidAmount { amount: String, reason: String },
    /// Not a Myanmar mobile number
    InvalidPhoneNumber { phone: String },
    /// Field has an invalid value
    InvalidField { field: String, reason: String },
    /// Required field missing
    MissingField { field: String },
    /// Field value out of acceptable range
    OutOfRange {
        field: String,
        min: Option<String>,
        max: Option<String>,
    },
}

/// Authentication and authorization errors
#[derive(Debug, Clone)]
pub enum AuthError {
    MissingToken,
    InvalidToken { reason: String },
    Forbidden,
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
    Auth(AuthError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn not_found(entity: &str, id: impl fmt::Display) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }))
    }

    pub fn invalid_field(field: &str, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }))
    }

    pub fn not_allowed(reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::NotAllowed {
            reason: reason.into(),
        }))
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientBalance { .. } => 422, // Unprocessable Entity
                DomainError::NotFound { .. } => 404,
                DomainError::AlreadyProcessed { .. } => 409, // Conflict
                DomainError::ProductUnavailable { .. } => 422,
                DomainError::DuplicatePaymentReference { .. } => 409,
                DomainError::NotAllowed { .. } => 422,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::Notification { .. } => 502, // Bad Gateway
                ExternalError::Timeout { .. } => 504,      // Gateway Timeout
            },
            AppErrorKind::Validation(_) => 400,
            AppErrorKind::Auth(err) => match err {
                AuthError::MissingToken | AuthError::InvalidToken { .. } => 401,
                AuthError::Forbidden => 403,
            },
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
                DomainError::NotFound { .. } => ErrorCode::NotFound,
                DomainError::AlreadyProcessed { .. } => ErrorCode::AlreadyProcessed,
                DomainError::ProductUnavailable { .. } => ErrorCode::ProductUnavailable,
                DomainError::DuplicatePaymentReference { .. } => {
                    ErrorCode::DuplicatePaymentReference
                }
                DomainError::NotAllowed { .. } => ErrorCode::OperationNotAllowed,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Cache { .. } => ErrorCode::CacheError,
                InfrastructureError::Storage { .. } => ErrorCode::StorageError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Notification { .. } => ErrorCode::NotificationError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
            AppErrorKind::Auth(err) => match err {
                AuthError::MissingToken | AuthError::InvalidToken { .. } => {
                    ErrorCode::Unauthorized
                }
                AuthError::Forbidden => ErrorCode::Forbidden,
            },
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientBalance {
                    available,
                    required,
                } => {
                    format!(
                        "Insufficient credit balance. Available: {}, Required: {}",
                        available, required
                    )
                }
                DomainError::NotFound { entity, id } => {
                    format!("{} '{}' not found", entity, id)
                }
                DomainError::AlreadyProcessed { entity, id, status } => {
                    format!("{} '{}' has already been {}", entity, id, status)
                }
                DomainError::ProductUnavailable { product_id, reason } => {
                    format!("Product '{}' is unavailable: {}", product_id, reason)
                }
                DomainError::DuplicatePaymentReference { reference } => {
                    format!(
                        "A payment request with transaction reference '{}' already exists",
                        reference
                    )
                }
                DomainError::NotAllowed { reason } => reason.clone(),
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::Notification { .. } => {
                    "Notification delivery failed".to_string()
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => {
                    format!(
                        "{} request timed out after {} seconds. Please try again",
                        service, timeout_secs
                    )
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::InvalidPhoneNumber { phone } => {
                    format!("'{}' is not a valid Myanmar mobile number", phone)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::OutOfRange { field, min, max } => match (min, max) {
                    (Some(min), Some(max)) => {
                        format!("Field '{}' must be between {} and {}", field, min, max)
                    }
                    (Some(min), None) => {
                        format!("Field '{}' must be at least {}", field, min)
                    }
                    (None, Some(max)) => {
                        format!("Field '{}' must be at most {}", field, max)
                    }
                    (None, None) => {
                        format!("Field '{}' is out of acceptable range", field)
                    }
                },
            },
            AppErrorKind::Auth(err) => match err {
                AuthError::MissingToken => "Authentication required".to_string(),
                AuthError::InvalidToken { .. } => {
                    "Invalid or expired access token".to_string()
                }
                AuthError::Forbidden => "Administrator access required".to_string(),
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Cache { .. } => true,
                InfrastructureError::Storage { .. } => true,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Notification { is_retryable, .. } => *is_retryable,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
            AppErrorKind::Auth(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// Note: From<DatabaseError> lives in database/error.rs and
// From<CacheError> in cache/error.rs

impl From<crate::domain::UnknownVariant> for AppError {
    fn from(err: crate::domain::UnknownVariant) -> Self {
        AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: err.kind.to_string(),
            reason: format!("unsupported value '{}'", err.value),
        }))
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_balance_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::InsufficientBalance {
            available: 50,
            required: 100,
        }));

        assert_eq!(error.status_code(), 422);
        assert_eq!(error.error_code(), ErrorCode::InsufficientBalance);
        assert!(error.user_message().contains("Insufficient credit balance"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_already_processed_is_conflict() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::AlreadyProcessed {
            entity: "Order".to_string(),
            id: "abc".to_string(),
            status: "completed".to_string(),
        }));

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::AlreadyProcessed);
        assert_eq!(error.user_message(), "Order 'abc' has already been completed");
    }

    #[test]
    fn test_auth_errors() {
        let missing = AppError::new(AppErrorKind::Auth(AuthError::MissingToken));
        assert_eq!(missing.status_code(), 401);
        assert_eq!(missing.error_code(), ErrorCode::Unauthorized);

        let forbidden = AppError::new(AppErrorKind::Auth(AuthError::Forbidden));
        assert_eq!(forbidden.status_code(), 403);
        assert_eq!(forbidden.error_code(), ErrorCode::Forbidden);
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "Amount must be positive".to_string(),
        }));

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_unknown_variant_maps_to_validation() {
        let err: AppError = "telenor"
            .parse::<crate::domain::Operator>()
            .unwrap_err()
            .into();
        assert_eq!(err.status_code(), 400);
        assert!(err.user_message().contains("telenor"));
    }

    #[test]
    fn test_infrastructure_message_is_generic() {
        let error = AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: "connection refused".to_string(),
            is_retryable: true,
        }))
        .with_context("loading orders");

        assert_eq!(error.status_code(), 500);
        assert!(error.is_retryable());
        assert!(!error.user_message().contains("connection refused"));
        assert_eq!(error.context.as_deref(), Some("loading orders"));
    }
}

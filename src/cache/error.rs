//! Cache-specific error types

use crate::error::{AppError, AppErrorKind, InfrastructureError};

/// Cache operation errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Redis unavailable, network issues, pool exhausted
    #[error("Cache connection error: {0}")]
    ConnectionError(String),
    /// Serialization/deserialization errors
    #[error("Cache serialization error: {0}")]
    SerializationError(String),
    /// Operation-specific errors
    #[error("Cache operation error: {0}")]
    OperationError(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::ConnectionError(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::SerializationError(err.to_string())
    }
}

impl From<bb8::RunError<redis::RedisError>> for CacheError {
    fn from(err: bb8::RunError<redis::RedisError>) -> Self {
        CacheError::ConnectionError(format!("Pool error: {}", err))
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Cache {
            message: err.to_string(),
        }))
    }
}

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

//! Database error types and their mapping onto `AppError`

use crate::error::{AppError, AppErrorKind, InfrastructureError};
use std::fmt;

#[derive(Debug, Clone)]
pub enum DatabaseErrorKind {
    /// Connection could not be established or the pool timed out
    Connection { message: String },
    /// Row expected but not present
    NotFound { entity: String, id: String },
    /// Unique constraint violated
    UniqueViolation { constraint: Option<String> },
    /// Foreign key constraint violated
    ForeignKeyViolation { constraint: Option<String> },
    /// CHECK constraint violated
    CheckViolation { constraint: Option<String> },
    /// Serialization failure or deadlock, safe to retry
    Conflict { message: String },
    Unknown { message: String },
}

#[derive(Debug, Clone)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    /// Classifies a sqlx error by Postgres SQLSTATE
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: "unknown".to_string(),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseErrorKind::Connection {
                    message: err.to_string(),
                }
            }
            sqlx::Error::Database(db_err) => {
                let constraint = db_err.constraint().map(|c| c.to_string());
                match db_err.code().as_deref() {
                    Some("23505") => DatabaseErrorKind::UniqueViolation { constraint },
                    Some("23503") => DatabaseErrorKind::ForeignKeyViolation { constraint },
                    Some("23514") => DatabaseErrorKind::CheckViolation { constraint },
                    Some("40001") | Some("40P01") => DatabaseErrorKind::Conflict {
                        message: db_err.message().to_string(),
                    },
                    _ => DatabaseErrorKind::Unknown {
                        message: db_err.message().to_string(),
                    },
                }
            }
            _ => DatabaseErrorKind::Unknown {
                message: err.to_string(),
            },
        };

        Self { kind }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::Connection { .. } | DatabaseErrorKind::Conflict { .. }
        )
    }

    pub fn is_unique_violation(&self, name: &str) -> bool {
        matches!(
            &self.kind,
            DatabaseErrorKind::UniqueViolation { constraint: Some(c) } if c == name
        )
    }

    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::ForeignKeyViolation { .. })
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DatabaseErrorKind::Connection { message } => {
                write!(f, "database connection error: {}", message)
            }
            DatabaseErrorKind::NotFound { entity, id } => write!(f, "{} '{}' not found", entity, id),
            DatabaseErrorKind::UniqueViolation { constraint } => {
                write!(f, "unique violation on {}", constraint.as_deref().unwrap_or("?"))
            }
            DatabaseErrorKind::ForeignKeyViolation { constraint } => {
                write!(f, "foreign key violation on {}", constraint.as_deref().unwrap_or("?"))
            }
            DatabaseErrorKind::CheckViolation { constraint } => {
                write!(f, "check violation on {}", constraint.as_deref().unwrap_or("?"))
            }
            DatabaseErrorKind::Conflict { message } => write!(f, "transaction conflict: {}", message),
            DatabaseErrorKind::Unknown { message } => write!(f, "database error: {}", message),
        }
    }
}

impl std::error::Error for DatabaseError {}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        DatabaseError::from_sqlx(err)
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        match err.kind {
            DatabaseErrorKind::NotFound { entity, id } => AppError::not_found(&entity, id),
            _ => {
                let is_retryable = err.is_retryable();
                AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message: err.to_string(),
                    is_retryable,
                }))
            }
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        DatabaseError::from_sqlx(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err = DatabaseError::from_sqlx(sqlx::Error::RowNotFound);
        assert!(matches!(err.kind, DatabaseErrorKind::NotFound { .. }));
        let app: AppError = err.into();
        assert_eq!(app.status_code(), 404);
    }

    #[test]
    fn test_pool_timeout_is_retryable() {
        let err = DatabaseError::from_sqlx(sqlx::Error::PoolTimedOut);
        assert!(err.is_retryable());
        let app: AppError = err.into();
        assert_eq!(app.status_code(), 500);
        assert!(app.is_retryable());
    }

    #[test]
    fn test_unique_violation_matching() {
        let err = DatabaseError::new(DatabaseErrorKind::UniqueViolation {
            constraint: Some("uq_payment_requests_reference".to_string()),
        });
        assert!(err.is_unique_violation("uq_payment_requests_reference"));
        assert!(!err.is_unique_violation("other"));
    }
}

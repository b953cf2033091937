//! Credit ledger
//!
//! `apply_entry` is the only code path that changes
//! `user_profiles.credits_balance`. It runs on a connection that already
//! holds an open transaction; the caller commits. Inside that transaction
//! the profile row is locked, the new balance is checked, an immutable
//! ledger row is appended and the balance is written, so the ledger sum
//! always equals the stored balance.

use crate::database::credit_transaction_repository::{
    CreditTransaction, CreditTransactionRepository, NewCreditTransaction,
};
use crate::database::user_repository::UserRepository;
use crate::domain::{CreditTransactionType, ReferenceType};
use crate::error::{AppError, AppErrorKind, AppResult, DomainError, ValidationError};
use sqlx::PgConnection;
use tracing::info;
use uuid::Uuid;

/// A balance change to be recorded
#[derive(Debug, Clone)]
pub struct LedgerEntry<'a> {
    pub user_id: Uuid,
    /// Signed; negative for debits
    pub amount: i64,
    pub transaction_type: CreditTransactionType,
    pub reference_type: ReferenceType,
    pub reference_id: Option<Uuid>,
    pub description: Option<&'a str>,
    pub created_by: Option<Uuid>,
}

/// Computes the balance after `amount` is applied to `previous`.
///
/// The sign of `amount` must agree with the transaction type, and a
/// debit may not take the balance below zero.
pub fn next_balance(
    previous: i64,
    amount: i64,
    transaction_type: CreditTransactionType,
) -> AppResult<i64> {
    if amount == 0 {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidAmount {
                amount: amount.to_string(),
                reason: "amount must not be zero".to_string(),
            },
        )));
    }

    if transaction_type.is_debit() != (amount < 0) {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidAmount {
                amount: amount.to_string(),
                reason: format!("sign does not match transaction type '{}'", transaction_type),
            },
        )));
    }

    let new_balance = previous.checked_add(amount).ok_or_else(|| {
        AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
            amount: amount.to_string(),
            reason: "balance overflow".to_string(),
        }))
    })?;

    if new_balance < 0 {
        return Err(AppError::new(AppErrorKind::Domain(
            DomainError::InsufficientBalance {
                available: previous,
                required: amount.saturating_neg(),
            },
        )));
    }

    Ok(new_balance)
}

/// Locks the user's profile, appends the ledger row and writes the new
/// balance. Nothing is written when the entry is rejected.
pub async fn apply_entry(
    conn: &mut PgConnection,
    entry: &LedgerEntry<'_>,
) -> AppResult<CreditTransaction> {
    let profile = UserRepository::lock_for_update(conn, entry.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User", entry.user_id))?;

    let previous_balance = profile.credits_balance;
    let new_balance = next_balance(previous_balance, entry.amount, entry.transaction_type)?;

    let row = CreditTransactionRepository::insert(
        conn,
        &NewCreditTransaction {
            user_id: entry.user_id,
            amount: entry.amount,
            previous_balance,
            new_balance,
            transaction_type: entry.transaction_type.as_str(),
            reference_type: entry.reference_type.as_str(),
            reference_id: entry.reference_id,
            description: entry.description,
            created_by: entry.created_by,
        },
    )
    .await?;

    UserRepository::set_balance(conn, entry.user_id, new_balance).await?;

    info!(
        user_id = %entry.user_id,
        amount = entry.amount,
        previous_balance = previous_balance,
        new_balance = new_balance,
        transaction_type = %entry.transaction_type,
        reference_type = %entry.reference_type,
        reference_id = ?entry.reference_id,
        "Ledger entry applied"
    );

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_credit_increases_balance() {
        assert_eq!(next_balance(100, 50, CreditTransactionType::Purchase).unwrap(), 150);
        assert_eq!(next_balance(0, 7, CreditTransactionType::Refund).unwrap(), 7);
        assert_eq!(next_balance(10, 5, CreditTransactionType::AdminGrant).unwrap(), 15);
    }

    #[test]
    fn test_debit_down_to_zero_is_allowed() {
        assert_eq!(next_balance(100, -100, CreditTransactionType::Order).unwrap(), 0);
    }

    #[test]
    fn test_overdraft_is_rejected() {
        let err = next_balance(40, -100, CreditTransactionType::Order).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::InsufficientBalance);
        assert_eq!(err.status_code(), 422);
        assert!(err.user_message().contains("Available: 40, Required: 100"));
    }

    #[test]
    fn test_zero_amount_is_rejected() {
        let err = next_balance(40, 0, CreditTransactionType::AdminGrant).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_sign_must_match_type() {
        assert!(next_balance(40, 10, CreditTransactionType::Order).is_err());
        assert!(next_balance(40, -10, CreditTransactionType::Purchase).is_err());
        assert!(next_balance(40, -10, CreditTransactionType::AdminDeduct).is_ok());
    }

    #[test]
    fn test_overflow_is_rejected() {
        let err = next_balance(i64::MAX, 1, CreditTransactionType::Purchase).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}

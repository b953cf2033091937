use crate::database::error::DatabaseError;
use crate::database::repository::Page;
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

const LEDGER_COLUMNS: &str = "id, user_id, amount, previous_balance, new_balance, transaction_type, \
                              reference_type, reference_id, description, created_by, created_at";

/// Ledger row. Rows are never updated or deleted.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub previous_balance: i64,
    pub new_balance: i64,
    pub transaction_type: String,
    pub reference_type: String,
    pub reference_id: Option<Uuid>,
    pub description: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCreditTransaction<'a> {
    pub user_id: Uuid,
    pub amount: i64,
    pub previous_balance: i64,
    pub new_balance: i64,
    pub transaction_type: &'a str,
    pub reference_type: &'a str,
    pub reference_id: Option<Uuid>,
    pub description: Option<&'a str>,
    pub created_by: Option<Uuid>,
}

/// A user whose stored balance disagrees with the sum of their ledger
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BalanceMismatch {
    pub user_id: Uuid,
    pub credits_balance: i64,
    pub ledger_total: i64,
}

impl BalanceMismatch {
    pub fn drift(&self) -> i64 {
        self.credits_balance - self.ledger_total
    }
}

pub struct CreditTransactionRepository {
    pool: PgPool,
}

impl CreditTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        conn: &mut PgConnection,
        new: &NewCreditTransaction<'_>,
    ) -> Result<CreditTransaction, DatabaseError> {
        sqlx::query_as::<_, CreditTransaction>(&format!(
            "INSERT INTO credit_transactions
                (user_id, amount, previous_balance, new_balance, transaction_type,
                 reference_type, reference_id, description, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {}",
            LEDGER_COLUMNS
        ))
        .bind(new.user_id)
        .bind(new.amount)
        .bind(new.previous_balance)
        .bind(new.new_balance)
        .bind(new.transaction_type)
        .bind(new.reference_type)
        .bind(new.reference_id)
        .bind(new.description)
        .bind(new.created_by)
        .fetch_one(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        page: Page,
    ) -> Result<Vec<CreditTransaction>, DatabaseError> {
        sqlx::query_as::<_, CreditTransaction>(&format!(
            "SELECT {} FROM credit_transactions
             WHERE user_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2 OFFSET $3",
            LEDGER_COLUMNS
        ))
        .bind(user_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Users whose balance is not the sum of their ledger amounts
    pub async fn find_mismatches(&self, limit: i64) -> Result<Vec<BalanceMismatch>, DatabaseError> {
        sqlx::query_as::<_, BalanceMismatch>(
            "SELECT p.id AS user_id,
                    p.credits_balance,
                    COALESCE(SUM(t.amount), 0)::BIGINT AS ledger_total
             FROM user_profiles p
             LEFT JOIN credit_transactions t ON t.user_id = p.id
             GROUP BY p.id, p.credits_balance
             HAVING p.credits_balance <> COALESCE(SUM(t.amount), 0)
             ORDER BY p.id
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_drift() {
        let mismatch = BalanceMismatch {
            user_id: Uuid::nil(),
            credits_balance: 1_500,
            ledger_total: 1_000,
        };
        assert_eq!(mismatch.drift(), 500);
    }
}

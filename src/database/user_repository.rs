use crate::database::error::DatabaseError;
use crate::database::repository::Page;
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

const PROFILE_COLUMNS: &str =
    "id, email, display_name, phone_number, credits_balance, created_at, updated_at";

/// User profile entity
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub phone_number: Option<String>,
    pub credits_balance: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Profile row joined with the admin flag, for back-office listings
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub phone_number: Option<String>,
    pub credits_balance: i64,
    pub is_admin: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Counts of rows that reference a user
#[derive(Debug, Clone, Copy, FromRow)]
pub struct UserActivity {
    pub ledger_rows: i64,
    pub orders: i64,
    pub payment_requests: i64,
}

impl UserActivity {
    pub fn is_empty(&self) -> bool {
        self.ledger_rows == 0 && self.orders == 0 && self.payment_requests == 0
    }
}

/// Repository for user profiles and roles
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<UserProfile>, DatabaseError> {
        sqlx::query_as::<_, UserProfile>(&format!(
            "SELECT {} FROM user_profiles WHERE id = $1",
            PROFILE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Creates the profile on first sight; later calls only fill in
    /// the fields that were supplied
    pub async fn upsert_profile(
        &self,
        id: Uuid,
        email: Option<&str>,
        display_name: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<UserProfile, DatabaseError> {
        sqlx::query_as::<_, UserProfile>(&format!(
            "INSERT INTO user_profiles (id, email, display_name, phone_number)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE
             SET email = COALESCE(EXCLUDED.email, user_profiles.email),
                 display_name = COALESCE(EXCLUDED.display_name, user_profiles.display_name),
                 phone_number = COALESCE(EXCLUDED.phone_number, user_profiles.phone_number),
                 updated_at = NOW()
             RETURNING {}",
            PROFILE_COLUMNS
        ))
        .bind(id)
        .bind(email)
        .bind(display_name)
        .bind(phone_number)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Admin edit of profile fields; `None` leaves a field unchanged
    pub async fn update_profile(
        conn: &mut PgConnection,
        id: Uuid,
        display_name: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Option<UserProfile>, DatabaseError> {
        sqlx::query_as::<_, UserProfile>(&format!(
            "UPDATE user_profiles
             SET display_name = COALESCE($2, display_name),
                 phone_number = COALESCE($3, phone_number),
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            PROFILE_COLUMNS
        ))
        .bind(id)
        .bind(display_name)
        .bind(phone_number)
        .fetch_optional(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn list(
        &self,
        search: Option<&str>,
        page: Page,
    ) -> Result<Vec<UserSummary>, DatabaseError> {
        let pattern = search.map(|s| format!("%{}%", s.trim()));
        sqlx::query_as::<_, UserSummary>(
            "SELECT p.id, p.email, p.display_name, p.phone_number, p.credits_balance,
                    EXISTS (SELECT 1 FROM user_roles r WHERE r.user_id = p.id AND r.role = 'admin') AS is_admin,
                    p.created_at
             FROM user_profiles p
             WHERE $1::text IS NULL
                OR p.email ILIKE $1
                OR p.display_name ILIKE $1
                OR p.phone_number ILIKE $1
             ORDER BY p.created_at DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(pattern)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Locks the profile row for the rest of the transaction
    pub async fn lock_for_update(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<UserProfile>, DatabaseError> {
        sqlx::query_as::<_, UserProfile>(&format!(
            "SELECT {} FROM user_profiles WHERE id = $1 FOR UPDATE",
            PROFILE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn set_balance(
        conn: &mut PgConnection,
        id: Uuid,
        new_balance: i64,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE user_profiles SET credits_balance = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(new_balance)
        .execute(conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    pub async fn is_admin(&self, id: Uuid) -> Result<bool, DatabaseError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM user_roles WHERE user_id = $1 AND role = 'admin')",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Returns true when the role set actually changed
    pub async fn set_admin_role(
        conn: &mut PgConnection,
        id: Uuid,
        granted_by: Uuid,
        admin: bool,
    ) -> Result<bool, DatabaseError> {
        let result = if admin {
            sqlx::query(
                "INSERT INTO user_roles (user_id, role, granted_by) VALUES ($1, 'admin', $2)
                 ON CONFLICT (user_id, role) DO NOTHING",
            )
            .bind(id)
            .bind(granted_by)
            .execute(conn)
            .await
        } else {
            sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role = 'admin'")
                .bind(id)
                .execute(conn)
                .await
        }
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn activity(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<UserActivity, DatabaseError> {
        sqlx::query_as::<_, UserActivity>(
            "SELECT
                (SELECT COUNT(*) FROM credit_transactions WHERE user_id = $1) AS ledger_rows,
                (SELECT COUNT(*) FROM orders WHERE user_id = $1) AS orders,
                (SELECT COUNT(*) FROM payment_requests WHERE user_id = $1) AS payment_requests",
        )
        .bind(id)
        .fetch_one(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn delete(conn: &mut PgConnection, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM user_profiles WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_activity_is_empty() {
        let none = UserActivity {
            ledger_rows: 0,
            orders: 0,
            payment_requests: 0,
        };
        assert!(none.is_empty());

        let some = UserActivity { orders: 1, ..none };
        assert!(!some.is_empty());
    }
}

//! Profiles, admin user management and manual credit adjustments

use crate::database::credit_transaction_repository::{CreditTransaction, CreditTransactionRepository};
use crate::database::order_repository::{Order, OrderRepository};
use crate::database::payment_request_repository::{PaymentRequest, PaymentRequestRepository};
use crate::database::repository::Page;
use crate::database::user_repository::{UserProfile, UserRepository, UserSummary};
use crate::domain::{normalize_phone_number, AuditAction, CreditTransactionType, ReferenceType};
use crate::error::{AppError, AppErrorKind, AppResult, ValidationError};
use crate::services::audit;
use crate::services::ledger::{self, LedgerEntry};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

const RECENT_ACTIVITY: i64 = 20;
pub const MAX_DISPLAY_NAME_LEN: usize = 80;

#[derive(Debug, Clone, Serialize)]
pub struct ProfileView {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub is_admin: bool,
}

/// Back-office view of one user
#[derive(Debug, Clone, Serialize)]
pub struct UserDetail {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub is_admin: bool,
    pub recent_transactions: Vec<CreditTransaction>,
    pub recent_orders: Vec<Order>,
    pub recent_payment_requests: Vec<PaymentRequest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileInput {
    pub display_name: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdjustCreditsInput {
    /// Signed; positive grants, negative deducts
    pub amount: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreditAdjustment {
    pub user_id: Uuid,
    pub transaction: CreditTransaction,
}

pub struct UserService {
    pool: PgPool,
    users: UserRepository,
    ledger: CreditTransactionRepository,
    orders: OrderRepository,
    payment_requests: PaymentRequestRepository,
}

impl UserService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            ledger: CreditTransactionRepository::new(pool.clone()),
            orders: OrderRepository::new(pool.clone()),
            payment_requests: PaymentRequestRepository::new(pool.clone()),
            pool,
        }
    }

    /// Self-registration on first sign-in; later calls may fill in the
    /// display name and phone number
    pub async fn ensure_profile(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        input: ProfileInput,
    ) -> AppResult<ProfileView> {
        let (display_name, phone_number) = validate_profile_input(input)?;

        let profile = self
            .users
            .upsert_profile(
                user_id,
                email,
                display_name.as_deref(),
                phone_number.as_deref(),
            )
            .await?;

        let is_admin = self.users.is_admin(user_id).await?;
        Ok(ProfileView { profile, is_admin })
    }

    pub async fn get_profile(&self, user_id: Uuid) -> AppResult<ProfileView> {
        let profile = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("User", user_id))?;
        let is_admin = self.users.is_admin(user_id).await?;
        Ok(ProfileView { profile, is_admin })
    }

    pub async fn list_transactions(
        &self,
        user_id: Uuid,
        page: Page,
    ) -> AppResult<Vec<CreditTransaction>> {
        Ok(self.ledger.list_for_user(user_id, page).await?)
    }

    pub async fn is_admin(&self, user_id: Uuid) -> AppResult<bool> {
        Ok(self.users.is_admin(user_id).await?)
    }

    pub async fn list_users(&self, search: Option<&str>, page: Page) -> AppResult<Vec<UserSummary>> {
        let search = search.map(str::trim).filter(|s| !s.is_empty());
        Ok(self.users.list(search, page).await?)
    }

    pub async fn get_user(&self, user_id: Uuid) -> AppResult<UserDetail> {
        let ProfileView { profile, is_admin } = self.get_profile(user_id).await?;
        let recent = Page::new(Some(RECENT_ACTIVITY), None);

        Ok(UserDetail {
            profile,
            is_admin,
            recent_transactions: self.ledger.list_for_user(user_id, recent).await?,
            recent_orders: self.orders.list(Some(user_id), None, recent).await?,
            recent_payment_requests: self
                .payment_requests
                .list(Some(user_id), None, recent)
                .await?,
        })
    }

    pub async fn update_user(
        &self,
        admin_id: Uuid,
        user_id: Uuid,
        input: ProfileInput,
    ) -> AppResult<UserProfile> {
        let (display_name, phone_number) = validate_profile_input(input)?;

        let mut tx = self.pool.begin().await?;
        let profile = UserRepository::update_profile(
            &mut tx,
            user_id,
            display_name.as_deref(),
            phone_number.as_deref(),
        )
        .await?
        .ok_or_else(|| AppError::not_found("User", user_id))?;

        audit::record(
            &mut tx,
            admin_id,
            AuditAction::UpdateUser,
            "user",
            Some(user_id.to_string()),
            json!({ "display_name": display_name, "phone_number": phone_number }),
        )
        .await?;
        tx.commit().await?;

        Ok(profile)
    }

    /// Manual grant or deduction, recorded in the ledger and audit log
    pub async fn adjust_credits(
        &self,
        admin_id: Uuid,
        user_id: Uuid,
        input: AdjustCreditsInput,
    ) -> AppResult<CreditAdjustment> {
        let reason = input.reason.trim();
        if reason.is_empty() {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::MissingField {
                    field: "reason".to_string(),
                },
            )));
        }

        let transaction_type = if input.amount >= 0 {
            CreditTransactionType::AdminGrant
        } else {
            CreditTransactionType::AdminDeduct
        };

        let mut tx = self.pool.begin().await?;
        let transaction = ledger::apply_entry(
            &mut tx,
            &LedgerEntry {
                user_id,
                amount: input.amount,
                transaction_type,
                reference_type: ReferenceType::Admin,
                reference_id: None,
                description: Some(reason),
                created_by: Some(admin_id),
            },
        )
        .await?;

        audit::record(
            &mut tx,
            admin_id,
            AuditAction::AdjustCredits,
            "user",
            Some(user_id.to_string()),
            json!({
                "amount": input.amount,
                "reason": reason,
                "previous_balance": transaction.previous_balance,
                "new_balance": transaction.new_balance,
            }),
        )
        .await?;
        tx.commit().await?;

        info!(
            admin_id = %admin_id,
            user_id = %user_id,
            amount = input.amount,
            new_balance = transaction.new_balance,
            "Credits adjusted"
        );

        Ok(CreditAdjustment {
            user_id,
            transaction,
        })
    }

    /// Grants or revokes the admin role. Admins cannot demote themselves.
    pub async fn set_admin(&self, admin_id: Uuid, user_id: Uuid, admin: bool) -> AppResult<bool> {
        if !admin && admin_id == user_id {
            return Err(AppError::not_allowed("admins cannot revoke their own role"));
        }

        let mut tx = self.pool.begin().await?;
        if UserRepository::lock_for_update(&mut tx, user_id).await?.is_none() {
            return Err(AppError::not_found("User", user_id));
        }

        let changed = UserRepository::set_admin_role(&mut tx, user_id, admin_id, admin).await?;
        if changed {
            let action = if admin {
                AuditAction::GrantAdmin
            } else {
                AuditAction::RevokeAdmin
            };
            audit::record(
                &mut tx,
                admin_id,
                action,
                "user",
                Some(user_id.to_string()),
                json!({}),
            )
            .await?;
        }
        tx.commit().await?;

        info!(admin_id = %admin_id, user_id = %user_id, admin = admin, changed = changed, "Role updated");
        Ok(admin)
    }

    /// Removes a user that never touched the ledger, orders or payments.
    /// Anyone with history keeps their profile because ledger rows are
    /// append-only and must keep their owner.
    pub async fn delete_user(&self, admin_id: Uuid, user_id: Uuid) -> AppResult<()> {
        if admin_id == user_id {
            return Err(AppError::not_allowed("admins cannot delete themselves"));
        }

        let mut tx = self.pool.begin().await?;
        let profile = UserRepository::lock_for_update(&mut tx, user_id)
            .await?
            .ok_or_else(|| AppError::not_found("User", user_id))?;

        let activity = UserRepository::activity(&mut tx, user_id).await?;
        if !activity.is_empty() {
            return Err(AppError::not_allowed(format!(
                "user has {} ledger entries, {} orders and {} payment requests and cannot be deleted",
                activity.ledger_rows, activity.orders, activity.payment_requests
            )));
        }

        UserRepository::delete(&mut tx, user_id).await?;
        audit::record(
            &mut tx,
            admin_id,
            AuditAction::DeleteUser,
            "user",
            Some(user_id.to_string()),
            json!({ "email": profile.email }),
        )
        .await?;
        tx.commit().await?;

        info!(admin_id = %admin_id, user_id = %user_id, "User deleted");
        Ok(())
    }
}

/// Trims and validates optional profile fields; phone numbers are
/// normalised to the local `09...` form
pub fn validate_profile_input(input: ProfileInput) -> AppResult<(Option<String>, Option<String>)> {
    let display_name = match input.display_name.map(|n| n.trim().to_string()) {
        Some(name) if name.is_empty() => None,
        Some(name) if name.chars().count() > MAX_DISPLAY_NAME_LEN => {
            return Err(AppError::invalid_field(
                "display_name",
                format!("must be at most {} characters", MAX_DISPLAY_NAME_LEN),
            ))
        }
        other => other,
    };

    let phone_number = match input.phone_number {
        Some(raw) if raw.trim().is_empty() => None,
        Some(raw) => Some(normalize_phone_number(&raw).ok_or_else(|| {
            AppError::new(AppErrorKind::Validation(ValidationError::InvalidPhoneNumber {
                phone: raw.clone(),
            }))
        })?),
        None => None,
    };

    Ok((display_name, phone_number))
}

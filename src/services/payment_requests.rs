//! Credit purchases paid by mobile-wallet transfer

use crate::config::StorefrontConfig;
use crate::database::payment_request_repository::{
    NewPaymentRequest, PaymentRequest, PaymentRequestRepository, REFERENCE_CONSTRAINT,
};
use crate::database::repository::Page;
use crate::database::user_repository::UserRepository;
use crate::domain::{PaymentMethod, PaymentRequestStatus};
use crate::error::{
    AppError, AppErrorKind, AppResult, DomainError, InfrastructureError, ValidationError,
};
use crate::services::notification::{AdminNotifier, PaymentRequestNotice};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const MAX_TRANSACTION_REF_LEN: usize = 64;

/// Wallet shown on the purchase screen
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PaymentMethodInfo {
    pub method: PaymentMethod,
    pub display_name: &'static str,
    pub account: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct CreditQuote {
    pub credits: i64,
    pub amount_mmk: i64,
    pub mmk_per_credit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitPaymentRequest {
    pub credits: i64,
    pub payment_method: PaymentMethod,
    pub transaction_ref: String,
    /// Base64 image, optionally as a `data:` URL
    pub proof_image: String,
}

/// Image formats accepted as payment proof
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofFormat {
    Png,
    Jpeg,
    Webp,
}

impl ProofFormat {
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(ProofFormat::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ProofFormat::Jpeg)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(ProofFormat::Webp)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ProofFormat::Png => "png",
            ProofFormat::Jpeg => "jpg",
            ProofFormat::Webp => "webp",
        }
    }
}

/// Decodes and sniffs a proof image, enforcing the size limit
pub fn decode_proof(raw: &str, max_bytes: usize) -> AppResult<(Vec<u8>, ProofFormat)> {
    let payload = match raw.trim().split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => raw.trim(),
    };

    // base64 inflates by 4/3; reject oversize input before decoding
    if payload.len() / 4 * 3 > max_bytes + 3 {
        return Err(proof_too_large(max_bytes));
    }

    let bytes = STANDARD
        .decode(payload)
        .map_err(|_| AppError::invalid_field("proof_image", "not valid base64"))?;

    if bytes.is_empty() {
        return Err(AppError::invalid_field("proof_image", "image is empty"));
    }
    if bytes.len() > max_bytes {
        return Err(proof_too_large(max_bytes));
    }

    let format = ProofFormat::detect(&bytes)
        .ok_or_else(|| AppError::invalid_field("proof_image", "must be a PNG, JPEG or WEBP image"))?;

    Ok((bytes, format))
}

fn proof_too_large(max_bytes: usize) -> AppError {
    AppError::new(AppErrorKind::Validation(ValidationError::OutOfRange {
        field: "proof_image".to_string(),
        min: None,
        max: Some(format!("{} bytes", max_bytes)),
    }))
}

pub struct PaymentRequestService {
    repo: PaymentRequestRepository,
    users: UserRepository,
    config: StorefrontConfig,
    notifier: Arc<dyn AdminNotifier>,
}

impl PaymentRequestService {
    pub fn new(pool: PgPool, config: StorefrontConfig, notifier: Arc<dyn AdminNotifier>) -> Self {
        Self {
            repo: PaymentRequestRepository::new(pool.clone()),
            users: UserRepository::new(pool),
            config,
            notifier,
        }
    }

    pub fn list_payment_methods(&self) -> Vec<PaymentMethodInfo> {
        PaymentMethod::ALL
            .iter()
            .map(|method| PaymentMethodInfo {
                method: *method,
                display_name: method.display_name(),
                account: self.config.wallet_accounts.get(method).cloned(),
            })
            .collect()
    }

    pub fn quote(&self, credits: i64) -> AppResult<CreditQuote> {
        self.validate_credits(credits)?;
        let amount_mmk = credits.checked_mul(self.config.mmk_per_credit).ok_or_else(|| {
            AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
                amount: credits.to_string(),
                reason: "amount overflows".to_string(),
            }))
        })?;
        Ok(CreditQuote {
            credits,
            amount_mmk,
            mmk_per_credit: self.config.mmk_per_credit,
        })
    }

    fn validate_credits(&self, credits: i64) -> AppResult<()> {
        if credits < self.config.min_credit_purchase || credits > self.config.max_credit_purchase {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::OutOfRange {
                    field: "credits".to_string(),
                    min: Some(self.config.min_credit_purchase.to_string()),
                    max: Some(self.config.max_credit_purchase.to_string()),
                },
            )));
        }
        Ok(())
    }

    /// Records a pending purchase. The proof image is written to the
    /// upload directory before the row is inserted and removed again if
    /// the insert fails.
    pub async fn submit(&self, user_id: Uuid, input: SubmitPaymentRequest) -> AppResult<PaymentRequest> {
        let quote = self.quote(input.credits)?;

        let transaction_ref = input.transaction_ref.trim();
        if transaction_ref.is_empty() {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::MissingField {
                    field: "transaction_ref".to_string(),
                },
            )));
        }
        if transaction_ref.chars().count() > MAX_TRANSACTION_REF_LEN {
            return Err(AppError::invalid_field(
                "transaction_ref",
                format!("must be at most {} characters", MAX_TRANSACTION_REF_LEN),
            ));
        }

        let (bytes, format) = decode_proof(&input.proof_image, self.config.max_proof_bytes)?;

        if self.users.find_by_id(user_id).await?.is_none() {
            return Err(AppError::not_found("User", user_id));
        }

        if self
            .repo
            .reference_in_use(input.payment_method.as_str(), transaction_ref)
            .await?
        {
            return Err(duplicate_reference(transaction_ref));
        }

        let proof_path = self.store_proof(&bytes, format).await?;
        let proof_path_str = proof_path.to_string_lossy().to_string();

        let inserted = self
            .repo
            .insert(&NewPaymentRequest {
                user_id,
                amount_mmk: quote.amount_mmk,
                credits_requested: quote.credits,
                payment_method: input.payment_method.as_str(),
                transaction_ref,
                proof_path: Some(&proof_path_str),
            })
            .await;

        let request = match inserted {
            Ok(request) => request,
            Err(e) => {
                if let Err(io) = tokio::fs::remove_file(&proof_path).await {
                    warn!(error = %io, path = %proof_path_str, "Failed to remove orphaned proof");
                }
                if e.is_unique_violation(REFERENCE_CONSTRAINT) {
                    return Err(duplicate_reference(transaction_ref));
                }
                return Err(e.into());
            }
        };

        info!(
            request_id = %request.id,
            user_id = %user_id,
            credits = request.credits_requested,
            amount_mmk = request.amount_mmk,
            payment_method = %request.payment_method,
            "Payment request submitted"
        );

        let customer = match self.users.find_by_id(user_id).await {
            Ok(Some(profile)) => profile
                .display_name
                .or(profile.email)
                .unwrap_or_else(|| user_id.to_string()),
            _ => user_id.to_string(),
        };
        self.notifier
            .payment_request_submitted(&PaymentRequestNotice {
                request_id: request.id,
                customer,
                credits: request.credits_requested,
                amount_mmk: request.amount_mmk,
                payment_method: input.payment_method.display_name().to_string(),
                transaction_ref: request.transaction_ref.clone(),
            })
            .await;

        Ok(request)
    }

    async fn store_proof(&self, bytes: &[u8], format: ProofFormat) -> AppResult<PathBuf> {
        let storage_error = |e: std::io::Error| {
            AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Storage {
                message: e.to_string(),
            }))
        };

        tokio::fs::create_dir_all(&self.config.upload_dir)
            .await
            .map_err(storage_error)?;

        let path = self
            .config
            .upload_dir
            .join(format!("{}.{}", Uuid::new_v4(), format.extension()));
        tokio::fs::write(&path, bytes).await.map_err(storage_error)?;
        Ok(path)
    }

    pub async fn list_mine(
        &self,
        user_id: Uuid,
        status: Option<PaymentRequestStatus>,
        page: Page,
    ) -> AppResult<Vec<PaymentRequest>> {
        Ok(self
            .repo
            .list(Some(user_id), status.map(|s| s.as_str()), page)
            .await?)
    }

    pub async fn list(
        &self,
        status: Option<PaymentRequestStatus>,
        page: Page,
    ) -> AppResult<Vec<PaymentRequest>> {
        Ok(self.repo.list(None, status.map(|s| s.as_str()), page).await?)
    }
}

fn duplicate_reference(reference: &str) -> AppError {
    AppError::new(AppErrorKind::Domain(DomainError::DuplicatePaymentReference {
        reference: reference.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    const PNG_HEADER: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_detect_formats() {
        assert_eq!(ProofFormat::detect(&PNG_HEADER), Some(ProofFormat::Png));
        assert_eq!(ProofFormat::detect(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ProofFormat::Jpeg));
        assert_eq!(ProofFormat::detect(b"RIFF\x00\x00\x00\x00WEBPVP8 "), Some(ProofFormat::Webp));
        assert_eq!(ProofFormat::detect(b"GIF89a"), None);
    }

    #[test]
    fn test_decode_proof_accepts_data_url() {
        let encoded = STANDARD.encode(PNG_HEADER);
        let (bytes, format) =
            decode_proof(&format!("data:image/png;base64,{}", encoded), 1024).unwrap();
        assert_eq!(format, ProofFormat::Png);
        assert_eq!(bytes, PNG_HEADER.to_vec());
    }

    #[test]
    fn test_decode_proof_rejects_bad_input() {
        assert_eq!(decode_proof("%%%", 1024).unwrap_err().status_code(), 400);
        assert!(decode_proof(&STANDARD.encode(b"plain text"), 1024).is_err());

        let big = STANDARD.encode(vec![0xFFu8; 2048]);
        assert!(decode_proof(&big, 1024).is_err());
    }

    #[test]
    fn test_duplicate_reference_is_conflict() {
        let err = duplicate_reference("TX-1");
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.error_code(), ErrorCode::DuplicatePaymentReference);
    }

    #[tokio::test]
    async fn test_quote_and_limits() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let config = StorefrontConfig {
            mmk_per_credit: 2,
            ..StorefrontConfig::default()
        };
        let service = PaymentRequestService::new(
            pool,
            config,
            Arc::new(crate::services::notification::LogNotifier),
        );

        let quote = service.quote(5_000).unwrap();
        assert_eq!(quote.amount_mmk, 10_000);
        assert!(service.quote(10).is_err());
        assert!(service.quote(10_000_000).is_err());
        assert_eq!(service.list_payment_methods().len(), PaymentMethod::ALL.len());
    }
}

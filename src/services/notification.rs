//! Admin notifications over the Telegram Bot API
//!
//! New orders and payment requests are posted to the admin chat with an
//! inline `[Approve] [Reject]` keyboard. Button payloads are signed so a
//! forged `callback_query` cannot settle anything. Delivery is best
//! effort: failures are logged and never bubble up into the operation
//! that triggered them.

use crate::config::TelegramConfig;
use crate::domain::{mask_phone_number, ApprovalDecision, ApprovalTarget};
use crate::error::{AppError, AppErrorKind, ExternalError};
use crate::logging::mask_secret;
use crate::services::settlement::SettlementOutcome;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Bytes of the HMAC kept in callback data (hex doubles it)
const CALLBACK_SIG_BYTES: usize = 8;
/// Telegram's limit for `callback_data`
pub const CALLBACK_DATA_MAX_LEN: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("telegram request failed: {0}")]
    Network(String),
    #[error("telegram API error {status}: {description}")]
    Api {
        status: u16,
        description: String,
        retryable: bool,
    },
    #[error("telegram rate limit exceeded")]
    RateLimited { retry_after: Option<u64> },
    #[error("invalid callback data: {0}")]
    InvalidCallback(String),
    #[error("telegram bot is not configured")]
    NotConfigured,
}

impl NotificationError {
    pub fn is_retryable(&self) -> bool {
        match self {
            NotificationError::Network(_) | NotificationError::RateLimited { .. } => true,
            NotificationError::Api { retryable, .. } => *retryable,
            NotificationError::InvalidCallback(_) | NotificationError::NotConfigured => false,
        }
    }
}

impl From<NotificationError> for AppError {
    fn from(err: NotificationError) -> Self {
        let is_retryable = err.is_retryable();
        AppError::new(AppErrorKind::External(ExternalError::Notification {
            message: err.to_string(),
            is_retryable,
        }))
    }
}

// ---------------------------------------------------------------------------
// Callback data

/// Decision encoded in an inline button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackAction {
    pub decision: ApprovalDecision,
    pub target: ApprovalTarget,
    pub id: Uuid,
}

impl CallbackAction {
    fn prefix(&self) -> Result<String, NotificationError> {
        let decision = match self.decision {
            ApprovalDecision::Approved => 'a',
            ApprovalDecision::Rejected => 'r',
        };
        let target = match self.target {
            ApprovalTarget::Order => 'o',
            ApprovalTarget::PaymentRequest => 'p',
            ApprovalTarget::Product => {
                return Err(NotificationError::InvalidCallback(
                    "products are not settled from Telegram".to_string(),
                ))
            }
        };
        Ok(format!("{}:{}:{}", decision, target, self.id))
    }
}

/// Signs and verifies `<a|r>:<o|p>:<uuid>:<sig>` payloads
#[derive(Clone)]
pub struct CallbackSigner {
    secret: Vec<u8>,
}

impl CallbackSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, prefix: &str) -> Result<HmacSha256, NotificationError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| NotificationError::InvalidCallback(e.to_string()))?;
        mac.update(prefix.as_bytes());
        Ok(mac)
    }

    pub fn sign(&self, action: &CallbackAction) -> Result<String, NotificationError> {
        let prefix = action.prefix()?;
        let tag = self.mac(&prefix)?.finalize().into_bytes();
        Ok(format!("{}:{}", prefix, hex::encode(&tag[..CALLBACK_SIG_BYTES])))
    }

    pub fn verify(&self, data: &str) -> Result<CallbackAction, NotificationError> {
        let invalid = || NotificationError::InvalidCallback(data.to_string());

        let (prefix, sig) = data.rsplit_once(':').ok_or_else(invalid)?;
        let mut parts = prefix.splitn(3, ':');
        let decision = match parts.next() {
            Some("a") => ApprovalDecision::Approved,
            Some("r") => ApprovalDecision::Rejected,
            _ => return Err(invalid()),
        };
        let target = match parts.next() {
            Some("o") => ApprovalTarget::Order,
            Some("p") => ApprovalTarget::PaymentRequest,
            _ => return Err(invalid()),
        };
        let id = parts
            .next()
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(invalid)?;

        let sig = hex::decode(sig).map_err(|_| invalid())?;
        if sig.len() != CALLBACK_SIG_BYTES {
            return Err(invalid());
        }
        self.mac(prefix)?
            .verify_truncated_left(&sig)
            .map_err(|_| invalid())?;

        Ok(CallbackAction {
            decision,
            target,
            id,
        })
    }
}

// ---------------------------------------------------------------------------
// Bot API client

#[derive(Debug, Deserialize)]
struct BotResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    parameters: Option<BotResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct BotResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SentMessage {
    pub message_id: i64,
}

/// Minimal Telegram Bot API client with retry on 429 and 5xx
pub struct TelegramClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
}

impl TelegramClient {
    pub fn new(
        api_base_url: &str,
        bot_token: &str,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::Network(format!("failed to initialize HTTP client: {}", e)))?;

        info!(
            api_base_url = %api_base_url,
            bot_token = %mask_secret(bot_token),
            "Telegram client initialized"
        );

        Ok(Self {
            client,
            base_url: format!("{}/bot{}", api_base_url.trim_end_matches('/'), bot_token),
            timeout,
            max_retries,
        })
    }

    pub fn from_config(config: &TelegramConfig) -> Result<Self, NotificationError> {
        let token = config
            .bot_token
            .as_deref()
            .ok_or(NotificationError::NotConfigured)?;
        Self::new(
            &config.api_base_url,
            token,
            Duration::from_secs(config.request_timeout),
            config.max_retries,
        )
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T, NotificationError> {
        let url = format!("{}/{}", self.base_url, method);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            let response = self
                .client
                .post(&url)
                .timeout(self.timeout)
                .json(body)
                .send()
                .await;

            let resp = match response {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(NotificationError::Network(e.without_url().to_string()));
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                    break;
                }
            };

            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            let parsed: Option<BotResponse<T>> = serde_json::from_str(&text).ok();

            if status.is_success() {
                return match parsed {
                    Some(BotResponse {
                        ok: true,
                        result: Some(result),
                        ..
                    }) => Ok(result),
                    Some(other) => Err(NotificationError::Api {
                        status: status.as_u16(),
                        description: other.description.unwrap_or_default(),
                        retryable: false,
                    }),
                    None => Err(NotificationError::Api {
                        status: status.as_u16(),
                        description: "invalid Bot API JSON response".to_string(),
                        retryable: false,
                    }),
                };
            }

            if status.as_u16() == 429 {
                let retry_after = parsed
                    .as_ref()
                    .and_then(|p| p.parameters.as_ref())
                    .and_then(|p| p.retry_after);
                if attempt < self.max_retries {
                    let wait = retry_after.unwrap_or(1 << attempt).min(30);
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    continue;
                }
                return Err(NotificationError::RateLimited { retry_after });
            }

            if status.is_server_error() && attempt < self.max_retries {
                warn!(
                    method = %method,
                    status = %status,
                    attempt = attempt + 1,
                    "Telegram server error, retrying"
                );
                tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                continue;
            }

            return Err(NotificationError::Api {
                status: status.as_u16(),
                description: parsed
                    .and_then(|p| p.description)
                    .unwrap_or_else(|| status.to_string()),
                retryable: status.is_server_error(),
            });
        }

        Err(last_error.unwrap_or_else(|| NotificationError::Network("request failed".to_string())))
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<Value>,
    ) -> Result<SentMessage, NotificationError> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        if let Some(markup) = reply_markup {
            body["reply_markup"] = markup;
        }
        self.call("sendMessage", &body).await
    }

    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: &str,
    ) -> Result<(), NotificationError> {
        let _: bool = self
            .call(
                "answerCallbackQuery",
                &json!({ "callback_query_id": callback_query_id, "text": text }),
            )
            .await?;
        Ok(())
    }

    /// Replaces the message text; the inline keyboard is dropped with it
    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), NotificationError> {
        let _: Value = self
            .call(
                "editMessageText",
                &json!({
                    "chat_id": chat_id,
                    "message_id": message_id,
                    "text": text,
                    "parse_mode": "HTML",
                }),
            )
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Notifier

#[derive(Debug, Clone, Serialize)]
pub struct OrderNotice {
    pub order_id: Uuid,
    pub customer: String,
    pub product_name: String,
    pub operator: String,
    pub phone_number: String,
    pub credits: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentRequestNotice {
    pub request_id: Uuid,
    pub customer: String,
    pub credits: i64,
    pub amount_mmk: i64,
    pub payment_method: String,
    pub transaction_ref: String,
}

#[async_trait]
pub trait AdminNotifier: Send + Sync {
    async fn order_placed(&self, notice: &OrderNotice);
    async fn payment_request_submitted(&self, notice: &PaymentRequestNotice);
    async fn settlement_completed(&self, outcome: &SettlementOutcome);
}

/// Used when no bot is configured
pub struct LogNotifier;

#[async_trait]
impl AdminNotifier for LogNotifier {
    async fn order_placed(&self, notice: &OrderNotice) {
        info!(
            order_id = %notice.order_id,
            product = %notice.product_name,
            phone = %mask_phone_number(&notice.phone_number),
            credits = notice.credits,
            "New order awaiting approval"
        );
    }

    async fn payment_request_submitted(&self, notice: &PaymentRequestNotice) {
        info!(
            request_id = %notice.request_id,
            credits = notice.credits,
            amount_mmk = notice.amount_mmk,
            payment_method = %notice.payment_method,
            "New payment request awaiting approval"
        );
    }

    async fn settlement_completed(&self, outcome: &SettlementOutcome) {
        info!(
            target = %outcome.target,
            target_id = %outcome.target_id,
            status = %outcome.status,
            balance_change = outcome.balance_change,
            "Settlement completed"
        );
    }
}

pub struct TelegramNotifier {
    client: Arc<TelegramClient>,
    chat_id: i64,
    signer: CallbackSigner,
}

impl TelegramNotifier {
    pub fn new(client: Arc<TelegramClient>, chat_id: i64, signer: CallbackSigner) -> Self {
        Self {
            client,
            chat_id,
            signer,
        }
    }

    fn decision_keyboard(&self, target: ApprovalTarget, id: Uuid) -> Result<Value, NotificationError> {
        let approve = self.signer.sign(&CallbackAction {
            decision: ApprovalDecision::Approved,
            target,
            id,
        })?;
        let reject = self.signer.sign(&CallbackAction {
            decision: ApprovalDecision::Rejected,
            target,
            id,
        })?;
        Ok(json!({
            "inline_keyboard": [[
                { "text": "✅ Approve", "callback_data": approve },
                { "text": "❌ Reject", "callback_data": reject },
            ]]
        }))
    }

    async fn post(&self, text: String, keyboard: Option<(ApprovalTarget, Uuid)>) {
        let markup = match keyboard {
            Some((target, id)) => match self.decision_keyboard(target, id) {
                Ok(markup) => Some(markup),
                Err(e) => {
                    error!(error = %e, "Failed to sign inline keyboard");
                    None
                }
            },
            None => None,
        };

        if let Err(e) = self.client.send_message(self.chat_id, &text, markup).await {
            error!(error = %e, retryable = e.is_retryable(), "Telegram notification failed");
        }
    }
}

#[async_trait]
impl AdminNotifier for TelegramNotifier {
    async fn order_placed(&self, notice: &OrderNotice) {
        self.post(
            format_order_message(notice),
            Some((ApprovalTarget::Order, notice.order_id)),
        )
        .await;
    }

    async fn payment_request_submitted(&self, notice: &PaymentRequestNotice) {
        self.post(
            format_payment_request_message(notice),
            Some((ApprovalTarget::PaymentRequest, notice.request_id)),
        )
        .await;
    }

    async fn settlement_completed(&self, outcome: &SettlementOutcome) {
        self.post(format_settlement_message(outcome), None).await;
    }
}

/// Picks the Telegram notifier when the bot is configured
pub fn notifier_from_config(
    config: &TelegramConfig,
    client: Option<Arc<TelegramClient>>,
) -> Arc<dyn AdminNotifier> {
    match (client, config.admin_chat_id) {
        (Some(client), Some(chat_id)) => Arc::new(TelegramNotifier::new(
            client,
            chat_id,
            CallbackSigner::new(&config.callback_secret),
        )),
        _ => {
            info!("Telegram bot not configured, admin notifications go to the log");
            Arc::new(LogNotifier)
        }
    }
}

pub fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn format_order_message(notice: &OrderNotice) -> String {
    format!(
        "🛒 <b>New order</b>\n\
         Customer: {}\n\
         Product: {} ({})\n\
         Phone: <code>{}</code>\n\
         Credits: {}\n\
         ID: <code>{}</code>",
        escape_html(&notice.customer),
        escape_html(&notice.product_name),
        escape_html(&notice.operator.to_uppercase()),
        escape_html(&notice.phone_number),
        notice.credits,
        notice.order_id
    )
}

pub fn format_payment_request_message(notice: &PaymentRequestNotice) -> String {
    format!(
        "💰 <b>New credit purchase</b>\n\
         Customer: {}\n\
         Credits: {}\n\
         Amount: {} MMK via {}\n\
         Reference: <code>{}</code>\n\
         ID: <code>{}</code>",
        escape_html(&notice.customer),
        notice.credits,
        notice.amount_mmk,
        escape_html(&notice.payment_method),
        escape_html(&notice.transaction_ref),
        notice.request_id
    )
}

pub fn format_settlement_message(outcome: &SettlementOutcome) -> String {
    let label = match outcome.target {
        ApprovalTarget::Order => "Order",
        ApprovalTarget::PaymentRequest => "Payment request",
        ApprovalTarget::Product => "Product",
    };
    let mut text = format!(
        "{} <code>{}</code> {}",
        label, outcome.target_id, outcome.status
    );
    if outcome.balance_change != 0 {
        text.push_str(&format!("\nBalance change: {:+} credits", outcome.balance_change));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> CallbackSigner {
        CallbackSigner::new("0123456789abcdef0123456789abcdef")
    }

    fn action() -> CallbackAction {
        CallbackAction {
            decision: ApprovalDecision::Approved,
            target: ApprovalTarget::PaymentRequest,
            id: Uuid::parse_str("6f1c2a8e-3b0d-4c5e-9f7a-1b2c3d4e5f60").unwrap(),
        }
    }

    #[test]
    fn test_callback_data_fits_telegram_limit() {
        let data = signer().sign(&action()).unwrap();
        assert!(data.starts_with("a:p:6f1c2a8e-3b0d-4c5e-9f7a-1b2c3d4e5f60:"));
        assert!(data.len() <= CALLBACK_DATA_MAX_LEN);
    }

    #[test]
    fn test_signed_callback_verifies() {
        let data = signer().sign(&action()).unwrap();
        assert_eq!(signer().verify(&data).unwrap(), action());
    }

    #[test]
    fn test_tampered_callback_is_rejected() {
        let data = signer().sign(&action()).unwrap();
        let flipped = data.replacen("a:", "r:", 1);
        assert!(signer().verify(&flipped).is_err());

        let other = CallbackSigner::new("another-secret-another-secret");
        assert!(other.verify(&data).is_err());

        assert!(signer().verify("a:p:not-a-uuid:00").is_err());
        assert!(signer().verify("garbage").is_err());
    }

    #[test]
    fn test_products_have_no_callback() {
        let mut action = action();
        action.target = ApprovalTarget::Product;
        assert!(signer().sign(&action).is_err());
    }

    #[test]
    fn test_order_message_escapes_html() {
        let text = format_order_message(&OrderNotice {
            order_id: Uuid::nil(),
            customer: "<script>".to_string(),
            product_name: "Data 1GB & more".to_string(),
            operator: "mpt".to_string(),
            phone_number: "09420123456".to_string(),
            credits: 1500,
        });
        assert!(text.contains("&lt;script&gt;"));
        assert!(text.contains("Data 1GB &amp; more (MPT)"));
        assert!(text.contains("<code>09420123456</code>"));
    }

    #[test]
    fn test_notification_error_mapping() {
        let app: AppError = NotificationError::RateLimited { retry_after: Some(3) }.into();
        assert_eq!(app.status_code(), 502);
        assert!(app.is_retryable());
    }
}

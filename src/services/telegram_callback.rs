//! Inline-button decisions relayed from Telegram
//!
//! The webhook hands every update here. Only `callback_query` updates
//! are acted on: the presser must be mapped to an admin account that
//! still holds the admin role, and the button payload must carry a valid
//! signature. The settlement itself is the same code path the HTTP API
//! uses, so double taps and races with the web back office end in
//! `AlreadyProcessed`.

use crate::database::user_repository::UserRepository;
use crate::domain::ApprovalDecision;
use crate::error::AppResult;
use crate::services::notification::{escape_html, CallbackAction, CallbackSigner, TelegramClient};
use crate::services::settlement::{SettlementOutcome, SettlementService};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    pub data: Option<String>,
    pub message: Option<CallbackMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

impl TelegramUser {
    fn label(&self) -> String {
        self.username
            .as_ref()
            .map(|u| format!("@{}", u))
            .or_else(|| self.first_name.clone())
            .unwrap_or_else(|| self.id.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackMessage {
    pub message_id: i64,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// What happened to one update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Not a callback query
    Ignored,
    /// Presser is not a mapped, current admin
    Unauthorized { telegram_user: i64 },
    /// Payload missing or signature invalid
    InvalidPayload,
    Settled(SettlementOutcome),
    /// Settlement refused, e.g. already processed
    Refused { message: String },
}

pub struct TelegramCallbackService {
    settlement: Arc<SettlementService>,
    users: UserRepository,
    client: Option<Arc<TelegramClient>>,
    signer: CallbackSigner,
    admins: HashMap<i64, Uuid>,
}

impl TelegramCallbackService {
    pub fn new(
        settlement: Arc<SettlementService>,
        users: UserRepository,
        client: Option<Arc<TelegramClient>>,
        signer: CallbackSigner,
        admins: HashMap<i64, Uuid>,
    ) -> Self {
        Self {
            settlement,
            users,
            client,
            signer,
            admins,
        }
    }

    /// Maps the presser to an admin account still holding the role
    async fn authorize(&self, telegram_user: i64) -> AppResult<Option<Uuid>> {
        let admin_id = match self.admins.get(&telegram_user) {
            Some(id) => *id,
            None => return Ok(None),
        };
        if self.users.is_admin(admin_id).await? {
            Ok(Some(admin_id))
        } else {
            Ok(None)
        }
    }

    pub fn verify_payload(&self, data: Option<&str>) -> Option<CallbackAction> {
        data.and_then(|d| self.signer.verify(d).ok())
    }

    pub async fn handle_update(&self, update: Update) -> AppResult<CallbackOutcome> {
        let query = match update.callback_query {
            Some(query) => query,
            None => return Ok(CallbackOutcome::Ignored),
        };

        let admin_id = match self.authorize(query.from.id).await? {
            Some(admin_id) => admin_id,
            None => {
                warn!(
                    telegram_user = query.from.id,
                    update_id = update.update_id,
                    "Callback from unmapped or non-admin Telegram user"
                );
                self.answer(&query.id, "You are not allowed to do this").await;
                return Ok(CallbackOutcome::Unauthorized {
                    telegram_user: query.from.id,
                });
            }
        };

        let action = match self.verify_payload(query.data.as_deref()) {
            Some(action) => action,
            None => {
                warn!(
                    telegram_user = query.from.id,
                    update_id = update.update_id,
                    "Callback payload failed verification"
                );
                self.answer(&query.id, "Invalid action").await;
                return Ok(CallbackOutcome::InvalidPayload);
            }
        };

        let note = format!("via Telegram by {}", query.from.label());
        match self
            .settlement
            .settle(admin_id, action.target, action.decision, action.id, Some(&note))
            .await
        {
            Ok(outcome) => {
                let verdict = match action.decision {
                    ApprovalDecision::Approved => "✅ Approved",
                    ApprovalDecision::Rejected => "❌ Rejected",
                };
                self.answer(&query.id, verdict).await;

                if let Some(message) = &query.message {
                    let original = message.text.as_deref().unwrap_or_default();
                    let text = format!(
                        "{}\n\n<b>{}</b> by {}",
                        escape_html(original),
                        verdict,
                        escape_html(&query.from.label())
                    );
                    self.edit(message.chat.id, message.message_id, &text).await;
                }

                info!(
                    admin_id = %admin_id,
                    target = %action.target,
                    target_id = %action.id,
                    decision = %action.decision,
                    "Telegram decision applied"
                );
                Ok(CallbackOutcome::Settled(outcome))
            }
            Err(e) if e.status_code() < 500 => {
                let message = e.user_message();
                self.answer(&query.id, &message).await;
                Ok(CallbackOutcome::Refused { message })
            }
            Err(e) => {
                self.answer(&query.id, "Something went wrong, try the web console")
                    .await;
                Err(e)
            }
        }
    }

    async fn answer(&self, callback_query_id: &str, text: &str) {
        if let Some(client) = &self.client {
            if let Err(e) = client.answer_callback_query(callback_query_id, text).await {
                warn!(error = %e, "Failed to answer callback query");
            }
        }
    }

    async fn edit(&self, chat_id: i64, message_id: i64, text: &str) {
        if let Some(client) = &self.client {
            if let Err(e) = client.edit_message_text(chat_id, message_id, text).await {
                warn!(error = %e, "Failed to edit decision message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ApprovalTarget;
    use crate::services::notification::LogNotifier;

    fn service(admins: HashMap<i64, Uuid>) -> TelegramCallbackService {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        TelegramCallbackService::new(
            Arc::new(SettlementService::new(pool.clone(), Arc::new(LogNotifier))),
            UserRepository::new(pool),
            None,
            CallbackSigner::new("0123456789abcdef0123456789abcdef"),
            admins,
        )
    }

    #[test]
    fn test_update_deserialization() {
        let update: Update = serde_json::from_value(serde_json::json!({
            "update_id": 10,
            "callback_query": {
                "id": "cbq-1",
                "from": { "id": 42, "is_bot": false, "first_name": "Min", "username": "min_admin" },
                "data": "a:o:00000000-0000-0000-0000-000000000000:00",
                "message": {
                    "message_id": 7,
                    "chat": { "id": -100123, "type": "supergroup" },
                    "text": "New order"
                }
            }
        }))
        .unwrap();

        let query = update.callback_query.unwrap();
        assert_eq!(query.from.label(), "@min_admin");
        assert_eq!(query.message.unwrap().chat.id, -100123);
    }

    #[tokio::test]
    async fn test_non_callback_updates_are_ignored() {
        let svc = service(HashMap::new());
        let outcome = svc
            .handle_update(Update {
                update_id: 1,
                callback_query: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome, CallbackOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_unmapped_user_is_unauthorized() {
        let svc = service(HashMap::new());
        let outcome = svc
            .handle_update(Update {
                update_id: 2,
                callback_query: Some(CallbackQuery {
                    id: "cbq".to_string(),
                    from: TelegramUser {
                        id: 99,
                        username: None,
                        first_name: None,
                    },
                    data: Some("a:o:x:00".to_string()),
                    message: None,
                }),
            })
            .await
            .unwrap();
        assert_eq!(outcome, CallbackOutcome::Unauthorized { telegram_user: 99 });
    }

    #[tokio::test]
    async fn test_payload_verification() {
        let svc = service(HashMap::new());
        let action = CallbackAction {
            decision: ApprovalDecision::Rejected,
            target: ApprovalTarget::Order,
            id: Uuid::new_v4(),
        };
        let data = svc.signer.sign(&action).unwrap();
        assert_eq!(svc.verify_payload(Some(&data)), Some(action));
        assert_eq!(svc.verify_payload(None), None);
        assert_eq!(svc.verify_payload(Some("r:o:bogus:ff")), None);
    }
}

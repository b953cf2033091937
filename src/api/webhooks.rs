use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::services::telegram_callback::{CallbackOutcome, TelegramCallbackService, Update};

pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

pub struct WebhookState {
    pub callbacks: Arc<TelegramCallbackService>,
    pub secret: String,
}

pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhooks/telegram", post(handle_telegram_webhook))
        .with_state(state)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn ok() -> axum::response::Response {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
}

/// POST /webhooks/telegram
///
/// Once the secret header checks out Telegram always gets a 200, otherwise
/// it keeps redelivering the same update.
pub async fn handle_telegram_webhook(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let presented = headers
        .get(SECRET_TOKEN_HEADER)
        .map(|v| v.as_bytes())
        .unwrap_or_default();

    if state.secret.is_empty() || !constant_time_eq(presented, state.secret.as_bytes()) {
        warn!("Telegram webhook rejected: bad secret token");
        return (StatusCode::UNAUTHORIZED, "Invalid secret token").into_response();
    }

    let update: Update = match serde_json::from_str(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!(error = %e, "Unparseable Telegram update");
            return ok();
        }
    };
    let update_id = update.update_id;

    match state.callbacks.handle_update(update).await {
        Ok(CallbackOutcome::Settled(outcome)) => {
            info!(
                update_id,
                target = %outcome.target,
                target_id = %outcome.target_id,
                status = %outcome.status,
                "Telegram callback settled"
            );
        }
        Ok(CallbackOutcome::Refused { message }) => {
            info!(update_id, reason = %message, "Telegram callback refused");
        }
        Ok(other) => {
            info!(update_id, outcome = ?other, "Telegram update handled");
        }
        Err(e) => {
            error!(update_id, error = %e, "Telegram callback processing failed");
        }
    }

    ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret2"));
        assert!(!constant_time_eq(b"", b"x"));
    }
}

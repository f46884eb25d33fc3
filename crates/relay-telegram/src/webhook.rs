//! Inbound HTTP surface: `GET /` health check and `POST /webhook/<secret>`.
//!
//! Telegram only needs a 200 to consider an update delivered, so the webhook
//! handler acknowledges every delivery, whatever happened inside.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tracing::{debug, warn};

use relay_core::{
    dispatcher::Dispatcher,
    domain::{ChatId, ChatKind, MessageId, UserId},
    messaging::types::InboundMessage,
};

pub const HEALTH_TEXT: &str = "Telegram assistant relay is running.";

/// Shared state for webhook handlers.
pub struct WebhookState {
    pub dispatcher: Arc<Dispatcher>,
}

/// Telegram Update object (only the fields the relay reads).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: Option<i64>,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i32,
    pub chat: TelegramChat,
    pub from: Option<TelegramUser>,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub username: Option<String>,
}

impl From<TelegramMessage> for InboundMessage {
    fn from(m: TelegramMessage) -> Self {
        InboundMessage {
            chat_id: ChatId(m.chat.id),
            chat_kind: ChatKind::parse(&m.chat.chat_type),
            message_id: MessageId(m.message_id),
            user_id: m.from.as_ref().map(|u| UserId(u.id)),
            username: m.from.and_then(|u| u.username),
            text: m.text,
        }
    }
}

/// Build the router. `webhook_path` carries the shared secret, so any other
/// path (including a wrong secret) falls through to 404.
pub fn router(state: Arc<WebhookState>, webhook_path: &str) -> Router {
    Router::new()
        .route("/", get(health))
        .route(webhook_path, post(telegram_webhook))
        .with_state(state)
}

async fn health() -> &'static str {
    HEALTH_TEXT
}

async fn telegram_webhook(State(state): State<Arc<WebhookState>>, body: Bytes) -> StatusCode {
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(e) => {
            warn!(error = %e, "unparseable webhook body; acknowledging");
            return StatusCode::OK;
        }
    };

    let Some(message) = update.message else {
        debug!(update_id = ?update.update_id, "update without message; acknowledging");
        return StatusCode::OK;
    };

    let outcome = state.dispatcher.handle(message.into()).await;
    debug!(update_id = ?update.update_id, ?outcome, "update handled");
    StatusCode::OK
}

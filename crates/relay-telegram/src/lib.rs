//! Telegram adapter.
//!
//! Outbound: `TelegramMessenger` implements the `relay-core` MessagingPort over
//! the Bot API (teloxide). Inbound: `webhook` serves the secret webhook path
//! and a health check (axum).

use async_trait::async_trait;

use teloxide::prelude::*;

use tokio::time::sleep;
use tracing::info;

pub mod webhook;

use relay_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{ChatAction, MessagingCapabilities},
    },
    Result,
};

/// Telegram's hard cap on message text length.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    /// Point Telegram's update delivery at `url`.
    pub async fn register_webhook(&self, url: &str) -> Result<()> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| Error::Config(format!("invalid webhook url: {e}")))?;
        self.with_retry(|| self.bot.set_webhook(parsed.clone()))
            .await?;
        info!(host = parsed.host_str().unwrap_or(""), "telegram webhook registered");
        Ok(())
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_chat_actions: true,
            max_message_len: TELEGRAM_MESSAGE_LIMIT,
        }
    }

    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                let mut req = self.bot.send_message(Self::tg_chat(chat_id), text.to_string());
                if let Some(id) = reply_to {
                    // Still deliver if the original message was deleted meanwhile.
                    req = req
                        .reply_to_message_id(Self::tg_msg_id(id))
                        .allow_sending_without_reply(true);
                }
                req
            })
            .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()> {
        let tg_action = match action {
            ChatAction::Typing => teloxide::types::ChatAction::Typing,
        };
        self.with_retry(|| self.bot.send_chat_action(Self::tg_chat(chat_id), tg_action))
            .await?;
        Ok(())
    }
}

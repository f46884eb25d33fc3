//! Inbound message → assistant → reply.
//!
//! The dispatcher is the boundary where every per-request failure stops: it
//! never returns an error, it logs and answers the chat with a fixed fallback.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::{
    assistant::AssistantPort,
    domain::{ChatKind, MessageId, ThreadKey},
    messaging::{
        port::MessagingPort,
        types::{ChatAction, InboundMessage},
    },
    thread_store::ThreadStore,
    utils::{split_text, truncate_text},
    Result,
};

/// Reply sent to the chat when resolving the thread or asking the assistant fails.
pub const ERROR_FALLBACK: &str = "Error processing your request.";

/// Why an inbound message was not answered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    NoText,
    NoSender,
    NotMentioned,
    EmptyAfterMention,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Ignored(IgnoreReason),
    /// The assistant answered and the answer was handed to the transport.
    Replied,
    /// Something failed; the fallback text was handed to the transport.
    Failed,
}

/// Decide whether a message should be answered and what text to forward.
///
/// Private chats forward the text verbatim. Everywhere else the mention tag
/// must appear; its first occurrence is removed and the rest trimmed.
pub fn prepare_prompt(
    kind: ChatKind,
    text: &str,
    mention: &str,
) -> std::result::Result<String, IgnoreReason> {
    if text.is_empty() {
        return Err(IgnoreReason::NoText);
    }
    if kind.is_private() {
        return Ok(text.to_string());
    }
    if mention.is_empty() || !text.contains(mention) {
        return Err(IgnoreReason::NotMentioned);
    }
    let cleaned = text.replacen(mention, "", 1).trim().to_string();
    if cleaned.is_empty() {
        return Err(IgnoreReason::EmptyAfterMention);
    }
    Ok(cleaned)
}

pub struct Dispatcher {
    store: Arc<dyn ThreadStore>,
    assistant: Arc<dyn AssistantPort>,
    messenger: Arc<dyn MessagingPort>,
    mention: String,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ThreadStore>,
        assistant: Arc<dyn AssistantPort>,
        messenger: Arc<dyn MessagingPort>,
        mention: impl Into<String>,
    ) -> Self {
        Self {
            store,
            assistant,
            messenger,
            mention: mention.into(),
        }
    }

    pub fn mention(&self) -> &str {
        &self.mention
    }

    pub async fn handle(&self, msg: InboundMessage) -> DispatchOutcome {
        let Some(text) = msg.text.as_deref() else {
            return ignored(&msg, IgnoreReason::NoText);
        };
        let Some(user_id) = msg.user_id else {
            return ignored(&msg, IgnoreReason::NoSender);
        };
        let prompt = match prepare_prompt(msg.chat_kind, text, &self.mention) {
            Ok(p) => p,
            Err(reason) => return ignored(&msg, reason),
        };

        let key = ThreadKey::new(msg.chat_id, user_id);
        info!(
            key = %key,
            user = msg.username.as_deref().unwrap_or("unknown"),
            prompt = %truncate_text(&prompt, 80),
            "handling message"
        );

        if self.messenger.capabilities().supports_chat_actions {
            if let Err(e) = self
                .messenger
                .send_chat_action(msg.chat_id, ChatAction::Typing)
                .await
            {
                debug!(key = %key, error = %e, "typing indicator failed");
            }
        }

        match self.answer(&key, &prompt).await {
            Ok(reply) => {
                self.reply(&msg, &reply).await;
                DispatchOutcome::Replied
            }
            Err(e) => {
                error!(key = %key, error = %e, "failed to process message");
                self.reply(&msg, ERROR_FALLBACK).await;
                DispatchOutcome::Failed
            }
        }
    }

    async fn answer(&self, key: &ThreadKey, prompt: &str) -> Result<String> {
        let thread = self
            .store
            .get_or_create(key, self.assistant.as_ref())
            .await?;
        self.assistant.ask(&thread, prompt).await
    }

    async fn reply(&self, msg: &InboundMessage, text: &str) {
        let max = self.messenger.capabilities().max_message_len;
        let reply_to: Option<MessageId> = Some(msg.message_id);
        for chunk in split_text(text, max) {
            if let Err(e) = self
                .messenger
                .send_text(msg.chat_id, &chunk, reply_to)
                .await
            {
                error!(chat = msg.chat_id.0, error = %e, "failed to send reply");
                return;
            }
        }
    }
}

fn ignored(msg: &InboundMessage, reason: IgnoreReason) -> DispatchOutcome {
    match reason {
        // No sender means no thread key.
        IgnoreReason::NoSender => warn!(chat = msg.chat_id.0, "message without sender"),
        _ => debug!(chat = msg.chat_id.0, ?reason, "ignoring message"),
    }
    DispatchOutcome::Ignored(reason)
}

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, MessageRef},
    messaging::types::{ChatAction, MessagingCapabilities},
    Result,
};

/// Outbound chat transport port.
///
/// The dispatcher only ever talks to the chat platform through this trait, so
/// tests can count sends with a fake.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    /// Send plain text, optionally as a threaded reply to `reply_to`.
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageRef>;

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()>;
}

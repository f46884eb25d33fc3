use crate::domain::{ChatId, ChatKind, MessageId, UserId};

/// Inbound chat message, already lifted out of the transport's wire format.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    pub chat_kind: ChatKind,
    pub message_id: MessageId,
    /// Missing for channel posts and anonymous admins.
    pub user_id: Option<UserId>,
    pub username: Option<String>,
    pub text: Option<String>,
}

/// Outgoing "chat action" (typing indicator, etc).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatAction {
    Typing,
}

/// Capabilities / limits of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_chat_actions: bool,
    pub max_message_len: usize,
}

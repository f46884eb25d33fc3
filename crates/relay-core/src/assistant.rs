use async_trait::async_trait;

use crate::{domain::ThreadId, Result};

/// Reply used when a completed run left no assistant-authored text behind.
pub const NO_RESPONSE_FALLBACK: &str = "No response generated.";

/// Author of a message inside an assistant thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
    Other,
}

impl MessageRole {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "user" => MessageRole::User,
            "assistant" => MessageRole::Assistant,
            _ => MessageRole::Other,
        }
    }
}

/// A message from the recent-history window of a thread, newest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadMessage {
    pub role: MessageRole,
    /// Primary text payload, if the message has one.
    pub text: Option<String>,
}

/// Pick the reply text out of a newest-first message window.
///
/// The first assistant-authored message wins; if it has no text payload (or
/// there is no such message) the fixed fallback is returned instead of an error.
pub fn latest_assistant_reply(newest_first: &[ThreadMessage]) -> String {
    newest_first
        .iter()
        .find(|m| m.role == MessageRole::Assistant)
        .and_then(|m| m.text.as_deref())
        .filter(|t| !t.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| NO_RESPONSE_FALLBACK.to_string())
}

/// Hexagonal port for the hosted assistant backend.
///
/// `ask` hides the whole append / run / poll / fetch sequence so callers (and
/// tests) only see one suspending call.
#[async_trait]
pub trait AssistantPort: Send + Sync {
    /// Create a fresh, empty conversation thread.
    async fn create_thread(&self) -> Result<ThreadId>;

    /// Post `text` as a user message on `thread`, run the assistant to a
    /// terminal state and return its reply.
    async fn ask(&self, thread: &ThreadId, text: &str) -> Result<String>;
}

//! Send pacing for the outbound chat transport.
//!
//! A long answer goes out as several messages to one chat. Telegram rejects
//! more than about one message per second per chat and a few dozen per second
//! overall, so every send first claims a time slot.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MessageId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{ChatAction, MessagingCapabilities},
    },
    Result,
};

/// Minimum gaps between consecutive sends.
#[derive(Clone, Copy, Debug)]
pub struct Pacing {
    pub any_chat: Duration,
    pub same_chat: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            any_chat: Duration::from_millis(40),
            same_chat: Duration::from_millis(1050),
        }
    }
}

/// Earliest instants at which the next send may start.
#[derive(Debug)]
struct Slots {
    any: Instant,
    // Only chats whose slot is still in the future; anything else is free.
    per_chat: HashMap<ChatId, Instant>,
}

impl Slots {
    fn new(now: Instant) -> Self {
        Self {
            any: now,
            per_chat: HashMap::new(),
        }
    }

    /// Claim the earliest start allowed for `chat` and return the wait until it.
    fn claim(&mut self, chat: ChatId, pacing: Pacing, now: Instant) -> Duration {
        self.per_chat.retain(|_, free_at| *free_at > now);

        let chat_free = self.per_chat.get(&chat).copied().unwrap_or(now);
        let start = now.max(self.any).max(chat_free);

        self.any = start + pacing.any_chat;
        self.per_chat.insert(chat, start + pacing.same_chat);
        start - now
    }
}

/// [`MessagingPort`] decorator that delays each call until its slot.
pub struct PacedMessenger {
    inner: Arc<dyn MessagingPort>,
    pacing: Pacing,
    slots: Mutex<Slots>,
}

impl PacedMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, pacing: Pacing) -> Self {
        Self {
            inner,
            pacing,
            slots: Mutex::new(Slots::new(Instant::now())),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn wait_turn(&self, chat: ChatId) {
        let wait = self.slots().claim(chat, self.pacing, Instant::now());
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait]
impl MessagingPort for PacedMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageRef> {
        self.wait_turn(chat_id).await;
        self.inner.send_text(chat_id, text, reply_to).await
    }

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()> {
        self.wait_turn(chat_id).await;
        self.inner.send_chat_action(chat_id, action).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACING: Pacing = Pacing {
        any_chat: Duration::from_millis(40),
        same_chat: Duration::from_millis(500),
    };

    #[derive(Default)]
    struct RecordingMessenger {
        sent: Mutex<Vec<(ChatId, Instant)>>,
    }

    #[async_trait]
    impl MessagingPort for RecordingMessenger {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                supports_chat_actions: true,
                max_message_len: 4096,
            }
        }

        async fn send_text(
            &self,
            chat_id: ChatId,
            _text: &str,
            _reply_to: Option<MessageId>,
        ) -> Result<MessageRef> {
            self.sent.lock().unwrap().push((chat_id, Instant::now()));
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(1),
            })
        }

        async fn send_chat_action(&self, chat_id: ChatId, _action: ChatAction) -> Result<()> {
            self.sent.lock().unwrap().push((chat_id, Instant::now()));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn same_chat_waits_full_gap_other_chat_only_global_gap() {
        let now = Instant::now();
        let mut slots = Slots::new(now);

        assert!(slots.claim(ChatId(1), PACING, now).is_zero());
        assert_eq!(slots.claim(ChatId(2), PACING, now), PACING.any_chat);
        assert_eq!(slots.claim(ChatId(1), PACING, now), PACING.same_chat);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_chats_are_forgotten() {
        let start = Instant::now();
        let mut slots = Slots::new(start);
        for id in 0..50 {
            slots.claim(ChatId(id), Pacing::default(), start);
        }
        assert_eq!(slots.per_chat.len(), 50);

        let later = start + Duration::from_secs(10);
        assert!(slots.claim(ChatId(7), Pacing::default(), later).is_zero());
        assert_eq!(slots.per_chat.len(), 1);
        assert!(slots.per_chat.contains_key(&ChatId(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn sends_to_same_chat_are_spaced() {
        let inner = Arc::new(RecordingMessenger::default());
        let paced = PacedMessenger::new(inner.clone(), PACING);

        paced
            .send_chat_action(ChatId(1), ChatAction::Typing)
            .await
            .unwrap();
        paced.send_text(ChatId(1), "a", None).await.unwrap();
        paced.send_text(ChatId(1), "b", None).await.unwrap();

        let sent = inner.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 3);
        assert!(sent[1].1 - sent[0].1 >= PACING.same_chat);
        assert!(sent[2].1 - sent[1].1 >= PACING.same_chat);
    }

    #[tokio::test(start_paused = true)]
    async fn map_shrinks_once_chats_go_quiet() {
        let inner = Arc::new(RecordingMessenger::default());
        let paced = PacedMessenger::new(inner, PACING);

        for id in 0..5 {
            paced.send_text(ChatId(id), "hi", None).await.unwrap();
        }
        assert!(paced.slots().per_chat.len() > 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        paced.send_text(ChatId(99), "hi", None).await.unwrap();
        assert_eq!(paced.slots().per_chat.len(), 1);
    }
}

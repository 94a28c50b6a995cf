//! Builds the turns a batch of chat lines adds to a conversation.

use crate::context::compactor::truncate_chars;
use chatterclaw_config::ChaosConfig;
use chatterclaw_core::chat::{ChannelId, ChatMessage};
use chatterclaw_core::history::MessageHistory;
use chatterclaw_core::message::Message;
use chatterclaw_core::sanitize::{ControlCharSanitizer, TextSanitizer};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Longest user line passed to the model, in characters.
pub const MAX_USER_CHARS: usize = 1500;

/// Longest chaos-mode snippet, in characters.
pub const MAX_SNIPPET_CHARS: usize = 120;

pub struct TurnBuilder {
    sanitizer: Arc<dyn TextSanitizer>,
    history: Option<Arc<dyn MessageHistory>>,
    chaos: ChaosConfig,
}

impl TurnBuilder {
    pub fn new(chaos: ChaosConfig) -> Self {
        Self {
            sanitizer: Arc::new(ControlCharSanitizer),
            history: None,
            chaos,
        }
    }

    pub fn with_sanitizer(mut self, sanitizer: Arc<dyn TextSanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn with_history(mut self, history: Arc<dyn MessageHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// The per-request `system` turn: current time and channel, plus a few
    /// random lines from the channel's past when chaos mode fires.
    pub async fn context_turn(&self, channel: &ChannelId, now: DateTime<Utc>) -> Message {
        let mut content = format!(
            "Current date/time: {} UTC\nChannel: {channel}",
            now.format("%Y-%m-%d %H:%M")
        );

        let snippets = self.chaos_snippets(channel).await;
        if !snippets.is_empty() {
            content.push_str("\nSome things said earlier in this channel:");
            for line in snippets {
                content.push_str(&format!(
                    "\n- [{}] {}",
                    line.nick,
                    truncate_chars(&self.sanitizer.sanitize(&line.message), MAX_SNIPPET_CHARS)
                ));
            }
        }

        Message::system(content)
    }

    async fn chaos_snippets(&self, channel: &ChannelId) -> Vec<ChatMessage> {
        let Some(history) = &self.history else {
            return Vec::new();
        };
        if !self.chaos.enabled || rand::random::<f64>() >= self.chaos.probability {
            return Vec::new();
        }

        match history.random_messages(channel, self.chaos.snippets).await {
            Ok(lines) => {
                debug!(channel = %channel, count = lines.len(), "Chaos mode injected snippets");
                lines
            }
            Err(e) => {
                warn!(channel = %channel, error = %e, "Chaos mode could not read history");
                Vec::new()
            }
        }
    }

    /// One `user` turn per distinct line: `"[nick] text"`.
    ///
    /// Repeats of the same text within a batch are dropped (first one wins),
    /// text is sanitized and capped, and lines left blank are skipped.
    pub fn user_turns(&self, batch: &[ChatMessage]) -> Vec<Message> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut turns = Vec::with_capacity(batch.len());
        for line in batch {
            if !seen.insert(line.message.as_str()) {
                continue;
            }
            let sanitized = self.sanitizer.sanitize(&line.message);
            let text = truncate_chars(sanitized.trim(), MAX_USER_CHARS);
            if text.is_empty() {
                continue;
            }
            let nick = self.sanitizer.sanitize(&line.nick);
            turns.push(Message::user(format!("[{nick}] {text}")));
        }
        turns
    }
}

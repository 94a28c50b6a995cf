//! In-memory chat history used for chaos-mode context injection.
//!
//! Every line seen on a channel is recorded. `random_messages` samples
//! without replacement, so a snippet never repeats within one draw.

use async_trait::async_trait;
use chatterclaw_core::chat::{ChannelId, ChatMessage};
use chatterclaw_core::error::HistoryError;
use chatterclaw_core::history::MessageHistory;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default cap on lines kept per channel.
pub const DEFAULT_MAX_PER_CHANNEL: usize = 5_000;

/// Bounded per-channel log of chat lines.
pub struct InMemoryHistory {
    lines: Arc<RwLock<HashMap<ChannelId, Vec<ChatMessage>>>>,
    max_per_channel: usize,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_PER_CHANNEL)
    }

    /// Keep at most `max_per_channel` lines; the oldest are dropped first.
    pub fn with_capacity(max_per_channel: usize) -> Self {
        Self {
            lines: Arc::new(RwLock::new(HashMap::new())),
            max_per_channel: max_per_channel.max(1),
        }
    }

    /// Number of lines recorded for a channel.
    pub async fn len(&self, channel: &ChannelId) -> usize {
        self.lines
            .read()
            .await
            .get(channel)
            .map_or(0, |lines| lines.len())
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageHistory for InMemoryHistory {
    async fn record(&self, channel: &ChannelId, message: ChatMessage) -> Result<(), HistoryError> {
        let mut lines = self.lines.write().await;
        let log = lines.entry(channel.clone()).or_default();
        log.push(message);
        if log.len() > self.max_per_channel {
            let excess = log.len() - self.max_per_channel;
            log.drain(..excess);
        }
        Ok(())
    }

    async fn random_messages(
        &self,
        channel: &ChannelId,
        n: usize,
    ) -> Result<Vec<ChatMessage>, HistoryError> {
        let lines = self.lines.read().await;
        let Some(log) = lines.get(channel) else {
            return Ok(Vec::new());
        };
        let mut rng = rand::thread_rng();
        Ok(log.choose_multiple(&mut rng, n).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_channel_is_empty() {
        let history = InMemoryHistory::new();
        let picked = history
            .random_messages(&ChannelId::from("#nowhere"), 3)
            .await
            .unwrap();
        assert!(picked.is_empty());
    }

    #[tokio::test]
    async fn samples_without_repeats() {
        let history = InMemoryHistory::new();
        let channel = ChannelId::from("#rust");
        for i in 0..10 {
            history
                .record(&channel, ChatMessage::now("bob", format!("line {i}")))
                .await
                .unwrap();
        }

        let picked = history.random_messages(&channel, 3).await.unwrap();
        assert_eq!(picked.len(), 3);
        let mut texts: Vec<_> = picked.iter().map(|m| m.message.clone()).collect();
        texts.sort();
        texts.dedup();
        assert_eq!(texts.len(), 3);
    }

    #[tokio::test]
    async fn asking_for_more_than_recorded_returns_all() {
        let history = InMemoryHistory::new();
        let channel = ChannelId::from("#rust");
        history
            .record(&channel, ChatMessage::now("bob", "only one"))
            .await
            .unwrap();
        let picked = history.random_messages(&channel, 5).await.unwrap();
        assert_eq!(picked.len(), 1);
    }

    #[tokio::test]
    async fn oldest_lines_are_evicted() {
        let history = InMemoryHistory::with_capacity(2);
        let channel = ChannelId::from("#rust");
        for text in ["a", "b", "c"] {
            history
                .record(&channel, ChatMessage::now("bob", text))
                .await
                .unwrap();
        }
        assert_eq!(history.len(&channel).await, 2);
        let mut texts: Vec<_> = history
            .random_messages(&channel, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.message)
            .collect();
        texts.sort();
        assert_eq!(texts, vec!["b", "c"]);
    }
}

//! Message history trait — the channel's long-term chat log.
//!
//! The engine only uses it for chaos-mode flavouring: a few random past
//! lines are mixed into the context turn to vary the model's replies.

use crate::chat::{ChannelId, ChatMessage};
use crate::error::HistoryError;
use async_trait::async_trait;

#[async_trait]
pub trait MessageHistory: Send + Sync {
    /// Append a line to the channel's log.
    async fn record(
        &self,
        channel: &ChannelId,
        message: ChatMessage,
    ) -> std::result::Result<(), HistoryError>;

    /// Up to `n` random lines from the channel's log.
    async fn random_messages(
        &self,
        channel: &ChannelId,
        n: usize,
    ) -> std::result::Result<Vec<ChatMessage>, HistoryError>;
}

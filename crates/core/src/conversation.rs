//! Conversation store trait — per-channel turn sequences.
//!
//! The store is a plain keyed container. It does not serialize writers:
//! the engine guarantees at most one history-mutating call per channel at a
//! time, and the store only guards its own map.

use crate::chat::ChannelId;
use crate::error::StoreError;
use crate::message::Message;
use async_trait::async_trait;

/// The core ConversationStore trait.
///
/// Implementations: in-memory (process lifetime), file-backed (one JSON
/// document per channel).
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The backend name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Load a channel's turns, creating `[system(system_prompt)]` on first use.
    async fn get_or_create(
        &self,
        channel: &ChannelId,
        system_prompt: &str,
    ) -> std::result::Result<Vec<Message>, StoreError>;

    /// Replace a channel's turns.
    async fn save(
        &self,
        channel: &ChannelId,
        messages: Vec<Message>,
    ) -> std::result::Result<(), StoreError>;

    /// Forget one channel's conversation, or every channel's when `None`.
    async fn clear(&self, channel: Option<&ChannelId>) -> std::result::Result<(), StoreError>;

    /// Channels that currently have a conversation.
    async fn channels(&self) -> std::result::Result<Vec<ChannelId>, StoreError>;
}

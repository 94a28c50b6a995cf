//! In-memory conversation store — conversations live for the process lifetime.

use async_trait::async_trait;
use chatterclaw_core::chat::ChannelId;
use chatterclaw_core::conversation::ConversationStore;
use chatterclaw_core::error::StoreError;
use chatterclaw_core::message::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Keeps every channel's turns in a map. Nothing survives a restart.
pub struct InMemoryConversationStore {
    conversations: Arc<RwLock<HashMap<ChannelId, Vec<Message>>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_or_create(
        &self,
        channel: &ChannelId,
        system_prompt: &str,
    ) -> Result<Vec<Message>, StoreError> {
        let mut conversations = self.conversations.write().await;
        let turns = conversations
            .entry(channel.clone())
            .or_insert_with(|| vec![Message::system(system_prompt)]);
        Ok(turns.clone())
    }

    async fn save(&self, channel: &ChannelId, messages: Vec<Message>) -> Result<(), StoreError> {
        self.conversations
            .write()
            .await
            .insert(channel.clone(), messages);
        Ok(())
    }

    async fn clear(&self, channel: Option<&ChannelId>) -> Result<(), StoreError> {
        let mut conversations = self.conversations.write().await;
        match channel {
            Some(id) => {
                conversations.remove(id);
            }
            None => conversations.clear(),
        }
        Ok(())
    }

    async fn channels(&self) -> Result<Vec<ChannelId>, StoreError> {
        let mut ids: Vec<ChannelId> = self.conversations.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatterclaw_core::message::Role;

    #[tokio::test]
    async fn creates_system_turn_on_first_use() {
        let store = InMemoryConversationStore::new();
        let channel = ChannelId::from("#rust");

        let turns = store.get_or_create(&channel, "You are a bot").await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, Role::System);
        assert_eq!(turns[0].content, "You are a bot");
    }

    #[tokio::test]
    async fn existing_conversation_ignores_new_prompt() {
        let store = InMemoryConversationStore::new();
        let channel = ChannelId::from("#rust");

        let mut turns = store.get_or_create(&channel, "first").await.unwrap();
        turns.push(Message::user("[alice] hi"));
        store.save(&channel, turns).await.unwrap();

        let turns = store.get_or_create(&channel, "second").await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "first");
    }

    #[tokio::test]
    async fn clear_one_channel() {
        let store = InMemoryConversationStore::new();
        let a = ChannelId::from("#a");
        let b = ChannelId::from("#b");
        store.get_or_create(&a, "p").await.unwrap();
        store.get_or_create(&b, "p").await.unwrap();

        store.clear(Some(&a)).await.unwrap();
        assert_eq!(store.channels().await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn clear_all_channels() {
        let store = InMemoryConversationStore::new();
        store.get_or_create(&ChannelId::from("#a"), "p").await.unwrap();
        store.get_or_create(&ChannelId::from("#b"), "p").await.unwrap();

        store.clear(None).await.unwrap();
        assert!(store.channels().await.unwrap().is_empty());
    }
}

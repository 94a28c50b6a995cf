//! File-based conversation store — one JSON document per channel.
//!
//! Storage location: `~/.chatterclaw/conversations/<channel>.json`
//!
//! Documents are loaded into memory on creation and a channel's file is
//! rewritten on every save. Persisted conversations never contain tool
//! turns, so the files stay small and human-inspectable.

use async_trait::async_trait;
use chatterclaw_core::chat::ChannelId;
use chatterclaw_core::conversation::ConversationStore;
use chatterclaw_core::error::StoreError;
use chatterclaw_core::message::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// On-disk shape of one channel's conversation.
#[derive(Debug, Serialize, Deserialize)]
struct ConversationFile {
    channel: ChannelId,
    messages: Vec<Message>,
}

/// A file-backed conversation store.
pub struct FileConversationStore {
    dir: PathBuf,
    conversations: Arc<RwLock<HashMap<ChannelId, Vec<Message>>>>,
}

impl FileConversationStore {
    /// Open a store rooted at `dir`, loading any conversations already there.
    ///
    /// The directory is created on first write.
    pub fn new(dir: PathBuf) -> Self {
        let conversations = Self::load_from_disk(&dir);
        debug!(dir = %dir.display(), count = conversations.len(), "File conversation store loaded");
        Self {
            dir,
            conversations: Arc::new(RwLock::new(conversations)),
        }
    }

    fn load_from_disk(dir: &Path) -> HashMap<ChannelId, Vec<Message>> {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return HashMap::new(); // Directory doesn't exist yet — start empty
        };

        entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| {
                let content = std::fs::read_to_string(&path).ok()?;
                match serde_json::from_str::<ConversationFile>(&content) {
                    Ok(file) => Some((file.channel, file.messages)),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping corrupted conversation file");
                        None
                    }
                }
            })
            .collect()
    }

    /// File name for a channel. Anything outside `[A-Za-z0-9._-]` is
    /// hex-escaped so `#rust` and `_rust` never collide.
    fn file_name(channel: &ChannelId) -> String {
        let mut name = String::with_capacity(channel.as_str().len() + 5);
        for b in channel.as_str().bytes() {
            if b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'_' {
                name.push(b as char);
            } else {
                name.push_str(&format!("%{b:02X}"));
            }
        }
        name.push_str(".json");
        name
    }

    fn path_for(&self, channel: &ChannelId) -> PathBuf {
        self.dir.join(Self::file_name(channel))
    }

    async fn write_file(&self, channel: &ChannelId, messages: &[Message]) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to create conversation directory: {e}")))?;

        let file = ConversationFile {
            channel: channel.clone(),
            messages: messages.to_vec(),
        };
        let content = serde_json::to_string_pretty(&file).map_err(|e| StoreError::Corrupted {
            channel: channel.to_string(),
            reason: e.to_string(),
        })?;

        tokio::fs::write(self.path_for(channel), content)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to write conversation file: {e}")))
    }

    async fn remove_file(&self, channel: &ChannelId) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(channel)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Storage(format!(
                "Failed to remove conversation file: {e}"
            ))),
        }
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    fn name(&self) -> &str {
        "file"
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
        self.write_file(channel, &messages).await?;
        self.conversations
            .write()
            .await
            .insert(channel.clone(), messages);
        Ok(())
    }

    async fn clear(&self, channel: Option<&ChannelId>) -> Result<(), StoreError> {
        let targets: Vec<ChannelId> = {
            let mut conversations = self.conversations.write().await;
            match channel {
                Some(id) => {
                    conversations.remove(id);
                    vec![id.clone()]
                }
                None => conversations.drain().map(|(id, _)| id).collect(),
            }
        };
        for id in &targets {
            self.remove_file(id).await?;
        }
        Ok(())
    }

    async fn channels(&self) -> Result<Vec<ChannelId>, StoreError> {
        let mut ids: Vec<ChannelId> = self.conversations.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

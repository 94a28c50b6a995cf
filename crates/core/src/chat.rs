//! Channel identifiers and incoming chat lines.
//!
//! A channel is any place the agent talks in (an IRC channel, a Discord
//! room, a terminal session). Conversation state is keyed by [`ChannelId`].

use serde::{Deserialize, Serialize};

/// Unique identifier for a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One line of chat: who said it, what they said, and when.
///
/// Used both for batches handed to the engine and for lines returned by a
/// [`MessageHistory`](crate::history::MessageHistory).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender nickname
    pub nick: String,

    /// The text content
    pub message: String,

    /// Unix timestamp in milliseconds
    pub timestamp_ms: i64,
}

impl ChatMessage {
    /// Create a message stamped with the current time.
    pub fn now(nick: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            message: message.into(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_id_display() {
        let id = ChannelId::from("#rust");
        assert_eq!(id.to_string(), "#rust");
        assert_eq!(id.as_str(), "#rust");
    }

    #[test]
    fn chat_message_now_is_stamped() {
        let msg = ChatMessage::now("alice", "hi");
        assert_eq!(msg.nick, "alice");
        assert!(msg.timestamp_ms > 0);
    }
}

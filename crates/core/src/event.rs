//! Domain event system — decoupled observation of the engine.
//!
//! Events are published when something interesting happens in the system.
//! Other components can subscribe to react without tight coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A batch of user messages was accepted for a channel
    MessagesReceived {
        channel: String,
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// The model produced a reply
    ResponseGenerated {
        channel: String,
        label: String,
        model: String,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Older turns were folded into a summary
    ContextCompacted {
        channel: String,
        tokens_before: usize,
        tokens_after: usize,
        summarized_turns: usize,
        timestamp: DateTime<Utc>,
    },

    /// The tool loop hit a bound and a tools-disabled answer was forced
    ToolLoopForced {
        channel: String,
        reason: String,
        rounds: u32,
        timestamp: DateTime<Utc>,
    },

    /// A channel's conversation was wiped
    ConversationReset {
        channel: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

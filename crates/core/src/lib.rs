//! # chatterclaw core
//!
//! Domain types, traits, and error definitions for the chatterclaw channel
//! agent. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the conversation engine is a trait here:
//! the model backend ([`Provider`]), the tool executor ([`ToolExecutor`]),
//! the conversation store ([`ConversationStore`]), the message history
//! ([`MessageHistory`]) and the text sanitizer ([`TextSanitizer`]).
//! Implementations live in their respective crates, so tests can swap in
//! scripted stand-ins.

pub mod chat;
pub mod conversation;
pub mod error;
pub mod event;
pub mod history;
pub mod message;
pub mod provider;
pub mod sanitize;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use chat::{ChannelId, ChatMessage};
pub use conversation::ConversationStore;
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use history::MessageHistory;
pub use message::{Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition};
pub use sanitize::{ControlCharSanitizer, TextSanitizer};
pub use tool::{Tool, ToolArguments, ToolCall, ToolExecutor, ToolRegistry};

//! Context budgeting: token estimates and summarization-based compaction.

pub mod compactor;
pub mod token;

pub use compactor::{ContextCompactor, SUMMARY_PREFIX, hard_trim};
pub use token::{effective_max, estimate_message_tokens, estimate_messages_tokens, estimate_tokens};

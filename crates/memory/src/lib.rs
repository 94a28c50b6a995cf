//! Conversation stores and chat history for chatterclaw.

pub mod file_backend;
pub mod history;
pub mod in_memory;

pub use file_backend::FileConversationStore;
pub use history::InMemoryHistory;
pub use in_memory::InMemoryConversationStore;

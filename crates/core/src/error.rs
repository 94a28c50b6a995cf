//! Error types for the chatterclaw domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all chatterclaw operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Conversation store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Message history errors ---
    #[error("History error: {0}")]
    History(#[from] HistoryError),

    // --- Engine input ---
    #[error("Message batch for {channel} is empty")]
    EmptyBatch { channel: String },

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Fragments providers use when a tool result does not line up with the
/// assistant tool call it answers (OpenAI, Anthropic, and compatible proxies).
const TOOL_SEQUENCE_MARKERS: &[&str] = &[
    "tool_call_id",
    "tool_use_id",
    "tool_use ids were found without",
    "must be followed by tool messages",
    "tool call result does not follow tool call",
    "tool_result block",
    "tool call mismatch",
];

impl ProviderError {
    /// Whether the provider rejected the request because tool calls and tool
    /// results in the history are out of sync.
    ///
    /// A history in this state is poisoned: every further request carrying
    /// it fails the same way, so the caller resets the conversation.
    pub fn is_tool_sequence_mismatch(&self) -> bool {
        let ProviderError::ApiError { message, .. } = self else {
            return false;
        };
        let lower = message.to_lowercase();
        TOOL_SEQUENCE_MARKERS.iter().any(|marker| lower.contains(marker))
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupted conversation for {channel}: {reason}")]
    Corrupted { channel: String, reason: String },
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Message history unavailable: {0}")]
    Unavailable(String),
}

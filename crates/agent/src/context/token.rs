//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 bytes per token, rounded up, plus a
//! fixed per-turn framing overhead. Cheap, deterministic, and close enough
//! for BPE tokenizers on English chat text.

use chatterclaw_core::message::Message;

/// Fixed framing overhead charged for every turn (role name, delimiters).
pub const TURN_OVERHEAD: usize = 4;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 bytes. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for a single turn including per-turn overhead.
pub fn estimate_message_tokens(message: &Message) -> usize {
    TURN_OVERHEAD + estimate_tokens(&message.content)
}

/// Estimate tokens for a slice of turns.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// The budget a compacted conversation must fit in: 90% of the configured
/// context window, leaving headroom for the reply.
pub fn effective_max(max_context_tokens: usize) -> usize {
    max_context_tokens * 9 / 10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(estimate_tokens("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn hundred_chars() {
        let text = "a".repeat(100);
        assert_eq!(estimate_tokens(&text), 25);
    }

    #[test]
    fn message_includes_overhead() {
        let msg = Message::user("test"); // 1 token + 4 overhead
        assert_eq!(estimate_message_tokens(&msg), 5);
    }

    #[test]
    fn empty_turn_costs_overhead_only() {
        assert_eq!(estimate_message_tokens(&Message::assistant("")), TURN_OVERHEAD);
    }

    #[test]
    fn multiple_messages() {
        let msgs = vec![
            Message::user("hello"),      // 2 tokens + 4 overhead
            Message::assistant("world"), // 2 tokens + 4 overhead
        ];
        assert_eq!(estimate_messages_tokens(&msgs), 12);
    }

    #[test]
    fn effective_max_floors() {
        assert_eq!(effective_max(1024), 921);
        assert_eq!(effective_max(8192), 7372);
    }
}

//! Summarization-based context compaction.
//!
//! When a conversation outgrows its token budget, older turns are folded
//! into a short synthetic memory (a `system` turn) and the most recent
//! turns are kept verbatim. The model writes the memory; when it cannot,
//! a deterministic truncation of the transcript is used instead, so
//! compaction itself never fails.
//!
//! Guarantees:
//! - turn 0 (the persona prompt) is always kept
//! - the result costs at most [`effective_max`] tokens
//! - a tool round is never split between its assistant turn and its results

use super::token::{effective_max, estimate_message_tokens, estimate_messages_tokens, TURN_OVERHEAD};
use crate::finalizer::strip_reasoning;
use crate::resilience::ModelClient;
use chatterclaw_core::chat::ChannelId;
use chatterclaw_core::event::{DomainEvent, EventBus};
use chatterclaw_core::message::{Message, Role};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The newest turns are kept verbatim regardless of their size.
pub const MIN_RECENT_TURNS: usize = 6;

/// Content prefix of the synthetic memory turn.
pub const SUMMARY_PREFIX: &str = "Conversation summary so far: ";

const TRANSCRIPT_TURN_CHARS: usize = 600;
const SUMMARY_FALLBACK_CHARS: usize = 600;
const SHRUNK_SUMMARY_CHARS: usize = 220;

const SUMMARIZER_PERSONA: &str =
    "You compress chat transcripts into short memories for a chat assistant.";
const SUMMARIZE_INSTRUCTION: &str = "Summarize the following conversation in 1-2 sentences. \
     Preserve facts, names, numbers and decisions. Reply with the summary only.";
const SHRINK_INSTRUCTION: &str = "Shorten this conversation memory to about 220 characters. \
     Keep facts, names, numbers and decisions. Reply with the shortened memory only.";

/// Keeps conversations within their token budget.
#[derive(Clone)]
pub struct ContextCompactor {
    client: ModelClient,
    event_bus: Arc<EventBus>,
}

impl ContextCompactor {
    pub fn new(client: ModelClient, event_bus: Arc<EventBus>) -> Self {
        Self { client, event_bus }
    }

    /// Bring `turns` within `effective_max(max_context_tokens)`.
    ///
    /// Turns already within budget are returned unchanged.
    pub async fn compact(
        &self,
        channel: &ChannelId,
        turns: Vec<Message>,
        max_context_tokens: usize,
    ) -> Vec<Message> {
        let budget = effective_max(max_context_tokens);
        let before = estimate_messages_tokens(&turns);
        if before <= budget || turns.len() <= 1 {
            return turns;
        }

        let split = split_recent(&turns[1..], budget) + 1;
        if split == 1 {
            debug!(channel = %channel, "Nothing old enough to summarize, trimming");
            let trimmed = hard_trim(&turns, 1, budget);
            self.report(channel, before, &trimmed, 0);
            return trimmed;
        }

        let (head, recent) = turns.split_at(split);
        let system = &head[0];
        let older = &head[1..];

        let transcript = render_transcript(older);
        let memory = match self.ask(SUMMARIZE_INSTRUCTION, &transcript).await {
            Some(memory) => memory,
            None => truncate_with_ellipsis(&transcript, SUMMARY_FALLBACK_CHARS),
        };

        let mut composed = compose(system, &memory, recent);
        if estimate_messages_tokens(&composed) > budget {
            debug!(channel = %channel, "Summary still over budget, shrinking");
            // The model may ignore the requested length.
            let shrunk = match self.ask(SHRINK_INSTRUCTION, &memory).await {
                Some(shrunk) => truncate_with_ellipsis(&shrunk, SHRUNK_SUMMARY_CHARS),
                None => truncate_with_ellipsis(&memory, SHRUNK_SUMMARY_CHARS),
            };
            composed = compose(system, &shrunk, recent);

            if estimate_messages_tokens(&composed) > budget {
                composed = trim_with_summary(&composed, budget);
            }
        }

        self.report(channel, before, &composed, older.len());
        composed
    }

    /// One tools-disabled request to the model. `None` on failure or a
    /// blank reply.
    async fn ask(&self, instruction: &str, text: &str) -> Option<String> {
        let messages = vec![
            Message::system(SUMMARIZER_PERSONA),
            Message::user(format!("{instruction}\n\n{text}")),
        ];
        match self.client.complete(messages, Vec::new()).await {
            Ok(response) => {
                let reply = strip_reasoning(&response.message.content);
                if reply.is_empty() {
                    warn!("Summarizer returned an empty reply, using truncation");
                    None
                } else {
                    Some(reply)
                }
            }
            Err(e) => {
                warn!(error = %e, "Summarizer call failed, using truncation");
                None
            }
        }
    }

    fn report(&self, channel: &ChannelId, before: usize, after: &[Message], summarized: usize) {
        let tokens_after = estimate_messages_tokens(after);
        info!(
            channel = %channel,
            tokens_before = before,
            tokens_after,
            summarized_turns = summarized,
            "Context compacted"
        );
        self.event_bus.publish(DomainEvent::ContextCompacted {
            channel: channel.to_string(),
            tokens_before: before,
            tokens_after,
            summarized_turns: summarized,
            timestamp: chrono::Utc::now(),
        });
    }
}

/// Index into `rest` where the verbatim tail starts.
///
/// Walks newest to oldest while the tail stays within 60% of the budget,
/// always taking at least [`MIN_RECENT_TURNS`]. The boundary never lands on
/// a tool result: it moves back to include the assistant turn that
/// requested it.
fn split_recent(rest: &[Message], budget: usize) -> usize {
    let mut start = rest.len();
    let mut cost = 0;
    for (i, turn) in rest.iter().enumerate().rev() {
        let turn_cost = estimate_message_tokens(turn);
        let kept = rest.len() - start;
        if kept >= MIN_RECENT_TURNS && (cost + turn_cost) * 10 > budget * 6 {
            break;
        }
        cost += turn_cost;
        start = i;
    }

    while start > 0 && start < rest.len() && rest[start].role == Role::Tool {
        start -= 1;
    }
    start
}

fn compose(system: &Message, memory: &str, recent: &[Message]) -> Vec<Message> {
    let mut composed = Vec::with_capacity(recent.len() + 2);
    composed.push(system.clone());
    composed.push(Message::system(format!("{SUMMARY_PREFIX}{memory}")));
    composed.extend_from_slice(recent);
    composed
}

/// Render turns as a plain `role: content` transcript.
fn render_transcript(turns: &[Message]) -> String {
    turns
        .iter()
        .map(|turn| {
            let content = if turn.content.trim().is_empty() && !turn.tool_calls.is_empty() {
                let names: Vec<&str> = turn.tool_calls.iter().map(|c| c.name.as_str()).collect();
                format!("[called {}]", names.join(", "))
            } else {
                truncate_chars(&turn.content, TRANSCRIPT_TURN_CHARS).to_string()
            };
            format!("{}: {}", turn.role.as_str(), content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Last resort for `[system, summary, recent..]`: hard trim with the summary
/// pinned, or without it when keeping it would cost the newest turn or the
/// bound.
fn trim_with_summary(composed: &[Message], budget: usize) -> Vec<Message> {
    let trimmed = hard_trim(composed, 2, budget);
    let newest_kept = match (trimmed.last(), composed.last()) {
        (Some(kept), Some(newest)) => kept.id == newest.id,
        _ => false,
    };
    if newest_kept && estimate_messages_tokens(&trimmed) <= budget {
        return trimmed;
    }

    debug!("Summary leaves no room for recent turns, dropping it");
    let mut without_summary = composed.to_vec();
    without_summary.remove(1);
    hard_trim(&without_summary, 1, budget)
}

/// Keep the first `pinned` turns, then the newest turns that fit `budget`.
///
/// If fewer than [`MIN_RECENT_TURNS`] fit verbatim, the newest ones are
/// kept anyway with their content clipped to an equal share of what is
/// left, so the latest input always survives and the bound still holds.
/// Tool results whose assistant turn was cut are dropped.
pub fn hard_trim(turns: &[Message], pinned: usize, budget: usize) -> Vec<Message> {
    let pinned = pinned.min(turns.len());
    let (head, tail) = turns.split_at(pinned);
    let remaining = budget.saturating_sub(estimate_messages_tokens(head));

    let mut used = 0;
    let mut fitting = 0;
    for turn in tail.iter().rev() {
        let cost = estimate_message_tokens(turn);
        if used + cost > remaining {
            break;
        }
        used += cost;
        fitting += 1;
    }

    let floor = MIN_RECENT_TURNS.min(tail.len());
    let mut kept: Vec<Message> = if fitting >= floor {
        tail[tail.len() - fitting..].to_vec()
    } else {
        // Every clipped turn costs at most `remaining / n` tokens.
        let n = floor.min(remaining / (TURN_OVERHEAD + 1));
        if n == 0 {
            Vec::new()
        } else {
            let max_bytes = (remaining / n - TURN_OVERHEAD) * 4;
            tail[tail.len() - n..]
                .iter()
                .map(|turn| clip_turn(turn, max_bytes))
                .collect()
        }
    };

    let orphans = kept.iter().take_while(|t| t.role == Role::Tool).count();
    kept.drain(..orphans);

    let mut trimmed = head.to_vec();
    trimmed.extend(kept);
    trimmed
}

fn clip_turn(turn: &Message, max_bytes: usize) -> Message {
    let mut clipped = turn.clone();
    if clipped.content.len() > max_bytes {
        let mut end = max_bytes;
        while !clipped.content.is_char_boundary(end) {
            end -= 1;
        }
        clipped.content.truncate(end);
    }
    clipped
}

/// The first `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Cut `text` to `max_chars` characters, marking the cut with `…`.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    let cut = truncate_chars(text, max_chars);
    if cut.len() == text.len() {
        text.to_string()
    } else {
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::ModelSettings;
    use crate::test_helpers::{ScriptedProvider, text_response};
    use chatterclaw_core::error::ProviderError;
    use chatterclaw_core::message::MessageToolCall;
    use std::time::Duration;

    fn compactor(provider: Arc<ScriptedProvider>) -> ContextCompactor {
        let bus = Arc::new(EventBus::default());
        let client = ModelClient::new(
            provider,
            ModelSettings {
                model: "mock-model".into(),
                temperature: 0.7,
                max_tokens: None,
                max_context_tokens: 1024,
                timeout: Duration::from_secs(5),
            },
            bus.clone(),
        );
        ContextCompactor::new(client, bus)
    }

    fn long_conversation(turns: usize, chars: usize) -> Vec<Message> {
        let mut history = vec![Message::system("You are a bot")];
        for i in 0..turns {
            let text = format!("{i:03} {}", "x".repeat(chars - 4));
            if i % 2 == 0 {
                history.push(Message::user(text));
            } else {
                history.push(Message::assistant(text));
            }
        }
        history
    }

    fn summary_turns(turns: &[Message]) -> usize {
        turns
            .iter()
            .filter(|t| t.role == Role::System && t.content.starts_with(SUMMARY_PREFIX))
            .count()
    }

    #[tokio::test]
    async fn within_budget_is_unchanged() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let history = long_conversation(4, 40);
        let ids: Vec<String> = history.iter().map(|t| t.id.clone()).collect();

        let out = compactor(provider.clone())
            .compact(&ChannelId::from("#t"), history, 1024)
            .await;

        assert_eq!(out.iter().map(|t| t.id.clone()).collect::<Vec<_>>(), ids);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn fifty_long_turns_fold_into_one_summary() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(text_response("Alice and Bob traded long messages about x.")),
            Ok(text_response("Alice and Bob talked.")),
        ]));
        let history = long_conversation(50, 2000);
        let newest: Vec<String> = history[history.len() - 6..]
            .iter()
            .map(|t| t.id.clone())
            .collect();

        let out = compactor(provider.clone())
            .compact(&ChannelId::from("#t"), history, 1024)
            .await;

        assert_eq!(out[0].content, "You are a bot");
        assert_eq!(summary_turns(&out), 1);
        assert_eq!(out[1].content, format!("{SUMMARY_PREFIX}Alice and Bob talked."));
        let kept: Vec<String> = out[2..].iter().map(|t| t.id.clone()).collect();
        assert_eq!(kept, newest);
        assert!(estimate_messages_tokens(&out) <= 921);
        assert_eq!(provider.call_count(), 2);
        assert!(provider.requests().iter().all(|r| !r.tools_enabled()));
    }

    #[tokio::test]
    async fn verbose_summarizer_still_fits_budget() {
        let rambling = "s".repeat(8000);
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(text_response(&rambling)),
            Ok(text_response(&rambling)),
        ]));
        let history = long_conversation(50, 2000);
        let newest: Vec<String> = history[history.len() - 6..]
            .iter()
            .map(|t| t.id.clone())
            .collect();

        let out = compactor(provider.clone())
            .compact(&ChannelId::from("#t"), history, 1024)
            .await;

        assert!(estimate_messages_tokens(&out) <= 921);
        assert_eq!(summary_turns(&out), 1);
        assert!(
            out[1].content.chars().count()
                <= SUMMARY_PREFIX.chars().count() + SHRUNK_SUMMARY_CHARS + 1
        );
        let kept: Vec<String> = out[2..].iter().map(|t| t.id.clone()).collect();
        assert_eq!(kept, newest);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn oversized_system_prompt_drops_summary_first() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(text_response("They chatted.")),
            Ok(text_response("They chatted.")),
        ]));
        let mut history = long_conversation(20, 200);
        history[0].content = "p".repeat(860);
        let newest = history.last().map(|t| t.id.clone());

        let out = compactor(provider)
            .compact(&ChannelId::from("#t"), history, 256)
            .await;

        assert!(estimate_messages_tokens(&out) <= 230);
        assert_eq!(out[0].content, "p".repeat(860));
        assert_eq!(summary_turns(&out), 0);
        assert_eq!(out.last().map(|t| t.id.clone()), newest);
    }

    #[tokio::test]
    async fn failed_summary_falls_back_to_truncated_transcript() {
        let build = |tail: char| {
            let mut history = vec![Message::system("You are a bot")];
            for i in 0..40 {
                let fill = if i < 10 { 'a' } else { tail };
                history.push(Message::user(format!("turn {i:02} {}", fill.to_string().repeat(90))));
            }
            history
        };

        let mut memories = Vec::new();
        for tail in ['b', 'c'] {
            let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::Network(
                "down".into(),
            ))]));
            let history = build(tail);
            let out = compactor(provider.clone())
                .compact(&ChannelId::from("#t"), history.clone(), 1024)
                .await;

            assert_eq!(summary_turns(&out), 1);
            let memory = out[1].content.strip_prefix(SUMMARY_PREFIX).unwrap().to_string();
            let older = &history[1..history.len() - (out.len() - 2)];
            let transcript = render_transcript(older);
            assert_eq!(memory, format!("{}…", truncate_chars(&transcript, 600)));
            assert_eq!(memory.chars().count(), 601);
            assert!(estimate_messages_tokens(&out) <= 921);
            memories.push(memory);
        }
        assert_eq!(memories[0], memories[1]);
    }

    #[tokio::test]
    async fn recent_tail_never_starts_with_a_tool_result() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(text_response(
            "Alice asked for the weather.",
        ))]));
        let big = "y".repeat(2000);
        let call = MessageToolCall {
            id: "call_0".into(),
            name: "get_weather".into(),
            arguments: r#"{"query":"London"}"#.into(),
        };
        let history = vec![
            Message::system("You are a bot"),
            Message::user(big.clone()),
            Message::user(big.clone()),
            Message::assistant_with_tool_calls("", vec![call.clone(), call]),
            Message::tool_result("call_0", big),
            Message::tool_result("call_0", "z".repeat(100)),
            Message::user("ok"),
            Message::assistant("ok"),
            Message::user("ok"),
            Message::assistant("ok"),
        ];

        let out = compactor(provider)
            .compact(&ChannelId::from("#t"), history, 1000)
            .await;

        assert_eq!(summary_turns(&out), 1);
        assert_eq!(out[2].role, Role::Assistant);
        assert_eq!(out[2].tool_calls.len(), 2);
        assert_eq!(out[3].role, Role::Tool);
        assert!(estimate_messages_tokens(&out) <= 900);
    }

    #[tokio::test]
    async fn empty_summary_counts_as_failure() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(text_response("  "))]));
        let history = long_conversation(40, 100);
        let out = compactor(provider)
            .compact(&ChannelId::from("#t"), history, 1024)
            .await;
        assert!(out[1].content.ends_with('…'));
    }

    #[tokio::test]
    async fn compaction_publishes_event() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(text_response("memory"))]));
        let compactor = compactor(provider);
        let mut rx = compactor.event_bus.subscribe();

        compactor
            .compact(&ChannelId::from("#t"), long_conversation(40, 100), 1024)
            .await;

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ContextCompacted {
                channel,
                tokens_before,
                tokens_after,
                summarized_turns,
                ..
            } => {
                assert_eq!(channel, "#t");
                assert!(tokens_after < tokens_before);
                assert!(*summarized_turns > 0);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn hard_trim_keeps_newest_that_fit() {
        let mut turns = vec![Message::system("sys")];
        for i in 0..10 {
            turns.push(Message::user(format!("message {i}")));
        }
        let trimmed = hard_trim(&turns, 1, 60);
        assert_eq!(trimmed[0].content, "sys");
        assert_eq!(trimmed.last().unwrap().content, "message 9");
        assert!(estimate_messages_tokens(&trimmed) <= 60);
        assert!(trimmed.len() > MIN_RECENT_TURNS);
    }

    #[test]
    fn hard_trim_clips_when_too_few_turns_fit() {
        let mut turns = vec![Message::system("sys")];
        for _ in 0..8 {
            turns.push(Message::user("q".repeat(4000)));
        }
        let trimmed = hard_trim(&turns, 1, 500);
        assert_eq!(trimmed.len(), 1 + MIN_RECENT_TURNS);
        assert!(estimate_messages_tokens(&trimmed) <= 500);
        assert_eq!(trimmed[1].id, turns[3].id);
    }

    #[test]
    fn hard_trim_drops_orphaned_tool_results() {
        let call = MessageToolCall {
            id: "call_0".into(),
            name: "get_weather".into(),
            arguments: "{}".into(),
        };
        let mut turns = vec![
            Message::system("sys"),
            Message::user("w".repeat(400)),
            Message::assistant_with_tool_calls("a".repeat(400), vec![call]),
            Message::tool_result("call_0", "sunny"),
        ];
        for _ in 0..5 {
            turns.push(Message::user("ok"));
        }
        turns.push(Message::assistant("It is sunny."));

        let trimmed = hard_trim(&turns, 1, 60);
        assert_eq!(trimmed.len(), 7);
        assert!(trimmed.iter().all(|t| t.role != Role::Tool));
        assert_eq!(trimmed.last().unwrap().content, "It is sunny.");
    }

    #[test]
    fn hard_trim_with_no_room_keeps_head() {
        let turns = vec![Message::system("s".repeat(400)), Message::user("hi")];
        assert_eq!(hard_trim(&turns, 1, 10).len(), 1);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_with_ellipsis("héllo", 2), "hé…");
        assert_eq!(truncate_with_ellipsis("hi", 10), "hi");
    }

    #[test]
    fn transcript_renders_roles_and_tool_calls() {
        let call = MessageToolCall {
            id: "call_0".into(),
            name: "get_weather".into(),
            arguments: "{}".into(),
        };
        let transcript = render_transcript(&[
            Message::user("[alice] hi"),
            Message::assistant_with_tool_calls("", vec![call]),
            Message::tool_result("call_0", "Sunny"),
        ]);
        assert_eq!(
            transcript,
            "user: [alice] hi\nassistant: [called get_weather]\ntool: Sunny"
        );
    }
}

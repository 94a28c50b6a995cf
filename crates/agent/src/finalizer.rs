//! Output finalization.
//!
//! Turns the reply of a finished tool loop into user-facing text and
//! rewrites the conversation into the shape that gets persisted: no tool
//! rounds, the final answer appended, compacted, and capped in length.

use crate::context::ContextCompactor;
use chatterclaw_core::chat::ChannelId;
use chatterclaw_core::message::Message;
use regex_lite::Regex;
use std::sync::LazyLock;

const REASONING_TAGS: [&str; 3] = ["think", "thinking", "reasoning"];

/// Complete `<tag>...</tag>` blocks.
static REASONING_BLOCKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    REASONING_TAGS
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}>.*?</{tag}>")).expect("Invalid reasoning block regex")
        })
        .collect()
});

/// A closing tag whose opening tag was lost: everything up to it is reasoning.
static DANGLING_CLOSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^.*</(?:think|thinking|reasoning)>").expect("Invalid dangling close regex")
});

/// An opening tag that never closes (reply cut off mid-thought).
static UNCLOSED_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:think|thinking|reasoning)>.*$").expect("Invalid unclosed open regex")
});

/// Remove model reasoning markup from a reply and trim it.
pub fn strip_reasoning(text: &str) -> String {
    let mut out = text.to_string();
    for re in REASONING_BLOCKS.iter() {
        out = re.replace_all(&out, "").into_owned();
    }
    out = DANGLING_CLOSE.replace(&out, "").into_owned();
    out = UNCLOSED_OPEN.replace(&out, "").into_owned();
    out.trim().to_string()
}

/// Drop assistant turns carrying tool calls and all tool results.
pub fn prune_ephemeral(turns: Vec<Message>) -> Vec<Message> {
    turns.into_iter().filter(|t| !t.is_ephemeral()).collect()
}

/// Keep turn 0 plus the newest turns, `max_turns` in total.
pub fn truncate_history(mut turns: Vec<Message>, max_turns: usize) -> Vec<Message> {
    let max_turns = max_turns.max(1);
    if turns.len() > max_turns {
        let excess = turns.len() - max_turns;
        turns.drain(1..=excess);
    }
    turns
}

/// Rewrites a finished conversation for persistence.
#[derive(Clone)]
pub struct OutputFinalizer {
    compactor: ContextCompactor,
    max_context_tokens: usize,
    max_history_turns: usize,
}

impl OutputFinalizer {
    pub fn new(compactor: ContextCompactor, max_context_tokens: usize, max_history_turns: usize) -> Self {
        Self {
            compactor,
            max_context_tokens,
            max_history_turns,
        }
    }

    /// The history to persist after a turn that produced `final_text`.
    ///
    /// An empty reply is not recorded.
    pub async fn finalize(
        &self,
        channel: &ChannelId,
        history: Vec<Message>,
        final_text: &str,
    ) -> Vec<Message> {
        let mut turns = prune_ephemeral(history);
        if !final_text.trim().is_empty() {
            turns.push(Message::assistant(final_text));
        }
        let turns = self
            .compactor
            .compact(channel, turns, self.max_context_tokens)
            .await;
        truncate_history(turns, self.max_history_turns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::token::estimate_messages_tokens;
    use crate::resilience::{ModelClient, ModelSettings};
    use crate::test_helpers::{ScriptedProvider, text_response};
    use chatterclaw_core::event::EventBus;
    use chatterclaw_core::message::{MessageToolCall, Role};
    use std::sync::Arc;
    use std::time::Duration;

    fn finalizer(provider: Arc<ScriptedProvider>, max_context: usize, max_turns: usize) -> OutputFinalizer {
        let bus = Arc::new(EventBus::default());
        let client = ModelClient::new(
            provider,
            ModelSettings {
                model: "mock-model".into(),
                temperature: 0.7,
                max_tokens: None,
                max_context_tokens: max_context,
                timeout: Duration::from_secs(5),
            },
            bus.clone(),
        );
        OutputFinalizer::new(ContextCompactor::new(client, bus), max_context, max_turns)
    }

    #[test]
    fn reasoning_patterns_compile() {
        assert_eq!(REASONING_BLOCKS.len(), REASONING_TAGS.len());
        assert!(DANGLING_CLOSE.is_match("plan</think>"));
        assert!(UNCLOSED_OPEN.is_match("<reasoning>half"));
    }

    #[test]
    fn strips_think_blocks() {
        assert_eq!(
            strip_reasoning("<think>the user wants weather</think>It's sunny."),
            "It's sunny."
        );
    }

    #[test]
    fn strips_multiline_mixed_case_blocks() {
        let text = "<Thinking>\nstep 1\nstep 2\n</THINKING>\nAnswer <reasoning>hidden</reasoning>here";
        assert_eq!(strip_reasoning(text), "Answer here");
    }

    #[test]
    fn strips_dangling_close_with_preceding_text() {
        assert_eq!(
            strip_reasoning("I should check the tool output first.</think>\n\nDone!"),
            "Done!"
        );
    }

    #[test]
    fn strips_unclosed_reasoning() {
        assert_eq!(strip_reasoning("Hello! <think>now let me consider"), "Hello!");
    }

    #[test]
    fn plain_text_is_trimmed_only() {
        assert_eq!(strip_reasoning("  hi there \n"), "hi there");
        assert_eq!(strip_reasoning("a < b and c > d"), "a < b and c > d");
    }

    #[test]
    fn prune_removes_tool_rounds_only() {
        let call = MessageToolCall {
            id: "call_0".into(),
            name: "get_weather".into(),
            arguments: "{}".into(),
        };
        let turns = vec![
            Message::system("sys"),
            Message::user("[alice] weather?"),
            Message::assistant_with_tool_calls("", vec![call]),
            Message::tool_result("call_0", "Sunny"),
            Message::assistant("Sunny."),
        ];
        let pruned = prune_ephemeral(turns);
        let roles: Vec<Role> = pruned.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    }

    #[test]
    fn truncate_keeps_system_and_newest() {
        let mut turns = vec![Message::system("sys")];
        for i in 0..10 {
            turns.push(Message::user(format!("m{i}")));
        }
        let out = truncate_history(turns, 4);
        let contents: Vec<&str> = out.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["sys", "m7", "m8", "m9"]);
    }

    #[test]
    fn truncate_is_noop_under_limit() {
        let turns = vec![Message::system("sys"), Message::user("hi")];
        assert_eq!(truncate_history(turns, 60).len(), 2);
    }

    #[tokio::test]
    async fn finalize_appends_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let out = finalizer(provider, 8192, 60)
            .finalize(
                &ChannelId::from("#t"),
                vec![Message::system("sys"), Message::user("[alice] hi")],
                "hello alice",
            )
            .await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[2].role, Role::Assistant);
        assert_eq!(out[2].content, "hello alice");
    }

    #[tokio::test]
    async fn finalize_skips_empty_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let out = finalizer(provider, 8192, 60)
            .finalize(
                &ChannelId::from("#t"),
                vec![Message::system("sys"), Message::user("[alice] hi")],
                "",
            )
            .await;
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn finalize_compacts_and_caps_turns() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(text_response("they chatted"))]));
        let mut history = vec![Message::system("sys")];
        for i in 0..80 {
            history.push(Message::user(format!("{i} {}", "z".repeat(200))));
        }

        let out = finalizer(provider, 1024, 10)
            .finalize(&ChannelId::from("#t"), history, "bye")
            .await;

        assert!(out.len() <= 10);
        assert_eq!(out[0].content, "sys");
        assert_eq!(out.last().unwrap().content, "bye");
        assert!(estimate_messages_tokens(&out) <= 921);
        assert!(out.iter().all(|t| !t.is_ephemeral()));
    }
}

//! The multi-round tool-calling loop.
//!
//! ```text
//! AwaitingResponse ──text only──▶ Done
//!   │        ▲
//!   │ calls  │ results appended
//!   ▼        │
//! ExecutingTools ──bound hit──▶ ForcedFinal ──▶ Done
//! ```
//!
//! Each round appends the assistant turn that asked for tools followed by
//! one `tool` turn per call, in order. Tool failures become error strings
//! fed back to the model; they never abort the loop. The loop stops when
//! the model answers without tools, when `max_rounds` is exceeded, or when
//! the same set of tools is requested three rounds in a row. The last two
//! end with one extra tools-disabled call.

use crate::context::ContextCompactor;
use crate::finalizer::strip_reasoning;
use crate::inline_calls::{extract_inline_calls, strip_inline_markup};
use crate::resilience::ModelClient;
use chatterclaw_core::chat::ChannelId;
use chatterclaw_core::error::{ProviderError, ToolError};
use chatterclaw_core::event::{DomainEvent, EventBus};
use chatterclaw_core::message::{Message, MessageToolCall};
use chatterclaw_core::tool::{ToolCall, ToolExecutor};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest tool output passed back to the model, in characters.
pub const MAX_TOOL_OUTPUT_CHARS: usize = 3000;

/// Identical consecutive round signatures that count as a loop.
const REPEAT_LIMIT: usize = 3;

/// Result text for calls skipped because a bound was hit.
pub const NOT_EXECUTED: &str = "Not executed: tool-call limit reached.";

/// Appended before the forced tools-disabled call.
pub const FORCE_FINAL_INSTRUCTION: &str = "You have used enough tools. Answer the user now, \
     in plain text, using only the information already gathered above. Do not call any tools.";

/// Why a tools-disabled answer was forced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedReason {
    /// More rounds requested than allowed
    RoundLimit,
    /// Same tool set requested three rounds in a row
    RepeatedRound,
}

impl ForcedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForcedReason::RoundLimit => "round_limit",
            ForcedReason::RepeatedRound => "repeated_round",
        }
    }
}

/// What a finished loop produced.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// Final reply text, reasoning and pseudo-call markup removed
    pub text: String,

    /// Tool rounds actually executed
    pub rounds: u32,

    /// Set when the answer came from a forced tools-disabled call
    pub forced: Option<ForcedReason>,
}

/// Drives one request through as many tool rounds as the model needs.
pub struct ToolLoop {
    client: ModelClient,
    compactor: ContextCompactor,
    tools: Arc<dyn ToolExecutor>,
    event_bus: Arc<EventBus>,
    max_rounds: u32,
    max_context_tokens: usize,
    tool_timeout: Duration,
}

impl ToolLoop {
    pub fn new(
        client: ModelClient,
        compactor: ContextCompactor,
        tools: Arc<dyn ToolExecutor>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let max_context_tokens = client.settings().max_context_tokens;
        Self {
            client,
            compactor,
            tools,
            event_bus,
            max_rounds: 6,
            max_context_tokens,
            tool_timeout: Duration::from_secs(30),
        }
    }

    /// Set the maximum number of executed tool rounds.
    pub fn with_max_rounds(mut self, max: u32) -> Self {
        self.max_rounds = max;
        self
    }

    /// Set the deadline for a single tool execution.
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Run the loop over `history`, which already ends with the new user
    /// turns. Tool rounds are appended to `history` as they happen.
    pub async fn run(
        &self,
        channel: &ChannelId,
        history: &mut Vec<Message>,
    ) -> Result<LoopOutcome, ProviderError> {
        let tools = self.tools.definitions();

        self.compact(channel, history).await;
        let mut reply = self.client.send(channel, "initial", history, &tools).await?;

        let mut signatures: Vec<String> = Vec::new();
        let mut round: u32 = 0;
        let mut executed: u32 = 0;
        let mut forced = None;

        loop {
            prepare_calls(&mut reply);
            if reply.tool_calls.is_empty() {
                break;
            }

            round += 1;
            if round > self.max_rounds {
                forced = Some(ForcedReason::RoundLimit);
                break;
            }

            let signature = round_signature(&reply.tool_calls);
            if is_repeat(&signatures, &signature) {
                forced = Some(ForcedReason::RepeatedRound);
                break;
            }
            signatures.push(signature);

            debug!(
                channel = %channel,
                round,
                calls = reply.tool_calls.len(),
                "Executing tool round"
            );

            let calls = reply.tool_calls.clone();
            history.push(reply);
            for call in calls.iter().map(ToolCall::from) {
                let output = self.execute(&call).await;
                history.push(Message::tool_result(&call.id, output));
            }
            executed += 1;

            self.compact(channel, history).await;
            let label = format!("tool_round_{round}");
            reply = self.client.send(channel, &label, history, &tools).await?;
        }

        if let Some(reason) = forced {
            warn!(
                channel = %channel,
                reason = reason.as_str(),
                rounds = executed,
                "Tool loop bound hit, forcing a final answer"
            );
            self.event_bus.publish(DomainEvent::ToolLoopForced {
                channel: channel.to_string(),
                reason: reason.as_str().to_string(),
                rounds: executed,
                timestamp: chrono::Utc::now(),
            });

            let skipped = reply.tool_calls.clone();
            history.push(reply);
            for call in &skipped {
                history.push(Message::tool_result(&call.id, NOT_EXECUTED));
            }
            history.push(Message::user(FORCE_FINAL_INSTRUCTION));

            self.compact(channel, history).await;
            reply = self.client.send(channel, "forced_final", history, &[]).await?;
        }

        let text = strip_reasoning(&strip_inline_markup(&reply.content));
        info!(channel = %channel, rounds = executed, forced = forced.is_some(), "Tool loop finished");

        Ok(LoopOutcome {
            text,
            rounds: executed,
            forced,
        })
    }

    async fn compact(&self, channel: &ChannelId, history: &mut Vec<Message>) {
        let turns = std::mem::take(history);
        *history = self
            .compactor
            .compact(channel, turns, self.max_context_tokens)
            .await;
    }

    /// Execute one call. Every failure is folded into the returned text.
    async fn execute(&self, call: &ToolCall) -> String {
        if call.arguments.raw().is_some() {
            debug!(tool = %call.name, "Arguments are not a JSON object, passing them raw");
        }

        let start = Instant::now();
        let result = match tokio::time::timeout(
            self.tool_timeout,
            self.tools.execute(&call.name, &call.arguments),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool_name: call.name.clone(),
                timeout_secs: self.tool_timeout.as_secs(),
            }),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        self.event_bus.publish(DomainEvent::ToolExecuted {
            tool_name: call.name.clone(),
            success: result.is_ok(),
            duration_ms,
            timestamp: chrono::Utc::now(),
        });

        match result {
            Ok(output) => cap_tool_output(output),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                format!("Error: {e}")
            }
        }
    }
}

/// Pull inline pseudo-calls out of the text when there are no structured
/// calls, then make sure every call has an id.
fn prepare_calls(reply: &mut Message) {
    if reply.tool_calls.is_empty() {
        if let Some((cleaned, calls)) = extract_inline_calls(&reply.content) {
            reply.content = cleaned;
            reply.tool_calls = calls;
        }
    }
    for (index, call) in reply.tool_calls.iter_mut().enumerate() {
        if call.id.trim().is_empty() {
            call.id = format!("call_{index}");
        }
    }
}

/// Sorted, comma-joined tool names of one round.
pub fn round_signature(calls: &[MessageToolCall]) -> String {
    let mut names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
    names.sort_unstable();
    names.join(",")
}

/// Whether `signature` would be the third identical one in a row.
fn is_repeat(history: &[String], signature: &str) -> bool {
    history.len() >= REPEAT_LIMIT - 1
        && history[history.len() - (REPEAT_LIMIT - 1)..]
            .iter()
            .all(|s| s == signature)
}

fn cap_tool_output(output: String) -> String {
    match output.char_indices().nth(MAX_TOOL_OUTPUT_CHARS) {
        Some((cut, _)) => {
            let rest = output[cut..].chars().count();
            format!(
                "{}\n... [truncated, {rest} more characters]",
                &output[..cut]
            )
        }
        None => output,
    }
}

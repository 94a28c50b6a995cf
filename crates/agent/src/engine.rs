//! The conversation engine: per-channel state around the tool loop.
//!
//! One call to [`ConversationEngine::process_messages`]:
//!
//! 1. loads (or creates) the channel's conversation
//! 2. appends a context turn and one user turn per new line
//! 3. runs the [`ToolLoop`] (compaction happens inside)
//! 4. drops the context turn and tool rounds, appends the answer,
//!    compacts and persists
//!
//! Calls for the same channel are serialized by a per-channel lock;
//! different channels run concurrently.

use crate::context::ContextCompactor;
use crate::finalizer::{OutputFinalizer, prune_ephemeral, strip_reasoning, truncate_history};
use crate::resilience::{ModelClient, ModelSettings};
use crate::tool_loop::ToolLoop;
use crate::turn_builder::TurnBuilder;
use chatterclaw_config::AppConfig;
use chatterclaw_core::chat::{ChannelId, ChatMessage};
use chatterclaw_core::conversation::ConversationStore;
use chatterclaw_core::error::{Error, ProviderError, Result};
use chatterclaw_core::event::{DomainEvent, EventBus};
use chatterclaw_core::history::MessageHistory;
use chatterclaw_core::message::Message;
use chatterclaw_core::provider::Provider;
use chatterclaw_core::sanitize::TextSanitizer;
use chatterclaw_core::tool::ToolExecutor;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

/// Owns every channel's conversation and answers batches of chat lines.
pub struct ConversationEngine {
    tool_loop: ToolLoop,
    finalizer: OutputFinalizer,
    turn_builder: TurnBuilder,
    store: Arc<dyn ConversationStore>,
    event_bus: Arc<EventBus>,
    system_prompt: String,
    max_history_turns: usize,
    locks: Mutex<HashMap<ChannelId, Arc<Mutex<()>>>>,
}

impl ConversationEngine {
    /// Create an engine from configuration.
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolExecutor>,
        store: Arc<dyn ConversationStore>,
        config: &AppConfig,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let engine = &config.engine;
        let client = ModelClient::new(
            provider,
            ModelSettings {
                model: config.default_model.clone(),
                temperature: config.default_temperature,
                max_tokens: Some(config.default_max_tokens),
                max_context_tokens: engine.max_context_tokens,
                timeout: Duration::from_secs(engine.model_timeout_secs),
            },
            event_bus.clone(),
        );
        let compactor = ContextCompactor::new(client.clone(), event_bus.clone());
        let finalizer = OutputFinalizer::new(
            compactor.clone(),
            engine.max_context_tokens,
            engine.max_history_turns,
        );
        let tool_loop = ToolLoop::new(client, compactor, tools, event_bus.clone())
            .with_max_rounds(engine.max_tool_call_rounds)
            .with_tool_timeout(Duration::from_secs(engine.tool_timeout_secs));

        Self {
            tool_loop,
            finalizer,
            turn_builder: TurnBuilder::new(config.chaos.clone()),
            store,
            event_bus,
            system_prompt: engine.system_prompt.clone(),
            max_history_turns: engine.max_history_turns,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a message history for chaos-mode snippets.
    pub fn with_history(mut self, history: Arc<dyn MessageHistory>) -> Self {
        self.turn_builder = self.turn_builder.with_history(history);
        self
    }

    /// Replace the default control-character sanitizer.
    pub fn with_sanitizer(mut self, sanitizer: Arc<dyn TextSanitizer>) -> Self {
        self.turn_builder = self.turn_builder.with_sanitizer(sanitizer);
        self
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Answer a batch of chat lines for one channel.
    ///
    /// Returns the reply text, which may be empty when the model had
    /// nothing to say. On error nothing is returned to the channel; the
    /// caller is expected to show a generic apology.
    pub async fn process_messages(
        &self,
        channel: &ChannelId,
        batch: &[ChatMessage],
    ) -> Result<String> {
        let user_turns = self.turn_builder.user_turns(batch);
        if user_turns.is_empty() {
            return Err(Error::EmptyBatch {
                channel: channel.to_string(),
            });
        }

        let _guard = self.lock_channel(channel).await;

        info!(channel = %channel, lines = user_turns.len(), "Processing messages");
        self.event_bus.publish(DomainEvent::MessagesReceived {
            channel: channel.to_string(),
            count: user_turns.len(),
            timestamp: Utc::now(),
        });

        let mut history = self.store.get_or_create(channel, &self.system_prompt).await?;
        let context = self.turn_builder.context_turn(channel, Utc::now()).await;
        let context_id = context.id.clone();
        history.push(context);
        history.extend(user_turns);

        let result = self.tool_loop.run(channel, &mut history).await;
        // The context turn only applies to this request.
        history.retain(|turn| turn.id != context_id);

        match result {
            Ok(outcome) => {
                let persisted = self.finalizer.finalize(channel, history, &outcome.text).await;
                self.store.save(channel, persisted).await?;
                info!(
                    channel = %channel,
                    rounds = outcome.rounds,
                    forced = outcome.forced.is_some(),
                    chars = outcome.text.len(),
                    "Reply ready"
                );
                Ok(outcome.text)
            }
            Err(e) => Err(self.fail_turn(channel, history, e).await),
        }
    }

    /// Record assistant text produced outside the engine (a scheduled
    /// announcement, say) so the next turn sees it.
    pub async fn record_assistant_output(&self, channel: &ChannelId, text: &str) -> Result<()> {
        let text = strip_reasoning(text);
        if text.is_empty() {
            return Ok(());
        }

        let _guard = self.lock_channel(channel).await;
        let history = self.store.get_or_create(channel, &self.system_prompt).await?;
        let persisted = self.finalizer.finalize(channel, history, &text).await;
        self.store.save(channel, persisted).await?;
        Ok(())
    }

    /// Forget one channel's conversation, or every channel's.
    pub async fn clear_history(&self, channel: Option<&ChannelId>) -> Result<()> {
        match channel {
            Some(id) => {
                let _guard = self.lock_channel(id).await;
                self.store.clear(Some(id)).await?;
                self.publish_reset(id, "cleared");
            }
            None => {
                let channels = self.store.channels().await?;
                self.store.clear(None).await?;
                for id in &channels {
                    self.publish_reset(id, "cleared");
                }
            }
        }
        Ok(())
    }

    /// Snapshot of a channel's persisted conversation.
    pub async fn history(&self, channel: &ChannelId) -> Result<Vec<Message>> {
        let _guard = self.lock_channel(channel).await;
        Ok(self.store.get_or_create(channel, &self.system_prompt).await?)
    }

    /// Wrap up a failed turn and produce the error to return.
    ///
    /// A tool-call/tool-result desync wipes the channel so the next turn
    /// starts clean. Any other failure keeps the new user turns so the
    /// model still sees them next time.
    async fn fail_turn(&self, channel: &ChannelId, history: Vec<Message>, e: ProviderError) -> Error {
        self.event_bus.publish(DomainEvent::ErrorOccurred {
            context: format!("process_messages:{channel}"),
            error_message: e.to_string(),
            timestamp: Utc::now(),
        });

        if e.is_tool_sequence_mismatch() {
            warn!(channel = %channel, error = %e, "Tool call history out of sync, resetting conversation");
            if let Err(store_err) = self.store.clear(Some(channel)).await {
                error!(channel = %channel, error = %store_err, "Failed to reset conversation");
            }
            self.publish_reset(channel, "tool_sequence_mismatch");
        } else {
            error!(channel = %channel, error = %e, "Turn failed");
            let kept = truncate_history(prune_ephemeral(history), self.max_history_turns);
            if let Err(store_err) = self.store.save(channel, kept).await {
                error!(channel = %channel, error = %store_err, "Failed to persist conversation after error");
            }
        }

        Error::Provider(e)
    }

    fn publish_reset(&self, channel: &ChannelId, reason: &str) {
        self.event_bus.publish(DomainEvent::ConversationReset {
            channel: channel.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }

    async fn lock_channel(&self, channel: &ChannelId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(channel.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

//! Resilient model calls.
//!
//! [`ModelClient`] wraps a [`Provider`] with a deadline and one recovery
//! attempt. When a reply comes back blank, or the send fails for a reason
//! other than a tool-call/tool-result desync, the request is retried once
//! with tools disabled, a trimmed history, and an instruction demanding a
//! plain-text answer. Whatever the retry yields is final.

use crate::context::compactor::hard_trim;
use chatterclaw_core::chat::ChannelId;
use chatterclaw_core::error::ProviderError;
use chatterclaw_core::event::{DomainEvent, EventBus};
use chatterclaw_core::message::Message;
use chatterclaw_core::provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Appended to the retry request after a blank reply or a failed send.
pub const FORCE_ANSWER_INSTRUCTION: &str =
    "IMPORTANT: Do not call any tools. Reply directly to the user in plain text.";

/// Share of the context window the retry request is trimmed to.
const RETRY_BUDGET_RATIO: f64 = 0.7;

/// Model call settings.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub max_context_tokens: usize,
    pub timeout: Duration,
}

/// A provider handle with deadlines and a single tools-disabled retry.
#[derive(Clone)]
pub struct ModelClient {
    provider: Arc<dyn Provider>,
    settings: ModelSettings,
    event_bus: Arc<EventBus>,
}

impl ModelClient {
    pub fn new(provider: Arc<dyn Provider>, settings: ModelSettings, event_bus: Arc<EventBus>) -> Self {
        Self {
            provider,
            settings,
            event_bus,
        }
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    /// Send one request under the model deadline. No retry.
    pub async fn complete(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
    ) -> Result<ProviderResponse, ProviderError> {
        let request = ProviderRequest {
            model: self.settings.model.clone(),
            messages,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            tools,
        };

        match tokio::time::timeout(self.settings.timeout, self.provider.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(format!(
                "{} gave no reply within {}s",
                self.provider.name(),
                self.settings.timeout.as_secs()
            ))),
        }
    }

    /// Send a conversation and return the assistant turn, retrying once on a
    /// blank reply or a failed send.
    ///
    /// A tool-call/tool-result mismatch is returned untouched: retrying a
    /// desynced history only fails again.
    pub async fn send(
        &self,
        channel: &ChannelId,
        label: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<Message, ProviderError> {
        debug!(
            channel = %channel,
            label,
            turns = messages.len(),
            tools = tools.len(),
            "Calling model"
        );

        match self.complete(messages.to_vec(), tools.to_vec()).await {
            Ok(response) if !response.is_empty() => {
                self.publish_response(channel, label, &response);
                Ok(response.message)
            }
            Ok(_) => {
                warn!(channel = %channel, label, "Model returned an empty reply, retrying without tools");
                self.retry(channel, label, messages).await
            }
            Err(e) if e.is_tool_sequence_mismatch() => Err(e),
            Err(e) => {
                warn!(channel = %channel, label, error = %e, "Model call failed, retrying without tools");
                self.retry(channel, label, messages).await
            }
        }
    }

    async fn retry(
        &self,
        channel: &ChannelId,
        label: &str,
        messages: &[Message],
    ) -> Result<Message, ProviderError> {
        let budget = (self.settings.max_context_tokens as f64 * RETRY_BUDGET_RATIO) as usize;
        let mut trimmed = hard_trim(messages, 1, budget);
        trimmed.push(Message::system(FORCE_ANSWER_INSTRUCTION));

        let label = format!("{label}:retry");
        let response = self.complete(trimmed, Vec::new()).await?;
        self.publish_response(channel, &label, &response);
        Ok(response.message)
    }

    fn publish_response(&self, channel: &ChannelId, label: &str, response: &ProviderResponse) {
        self.event_bus.publish(DomainEvent::ResponseGenerated {
            channel: channel.to_string(),
            label: label.to_string(),
            model: response.model.clone(),
            tokens_used: response.usage.as_ref().map_or(0, |u| u.total_tokens),
            timestamp: chrono::Utc::now(),
        });
    }
}

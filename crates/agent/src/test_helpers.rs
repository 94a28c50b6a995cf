//! Shared test helpers for engine tests.

use chatterclaw_core::error::{ProviderError, ToolError};
use chatterclaw_core::message::{Message, MessageToolCall};
use chatterclaw_core::provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
use chatterclaw_core::tool::{ToolArguments, ToolExecutor};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// A mock provider that returns a sequence of scripted results and records
/// every request it receives.
///
/// Panics if more calls are made than results provided.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    first_call_delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            first_call_delay: None,
        }
    }

    /// Stall the first call for `delay` before answering.
    pub fn with_delay_on_first(mut self, delay: Duration) -> Self {
        self.first_call_delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let call_index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len() - 1
        };
        let next = self.script.lock().unwrap().pop_front();
        let Some(result) = next else {
            panic!("ScriptedProvider: no more responses (call #{call_index})");
        };
        if call_index == 0 {
            if let Some(delay) = self.first_call_delay {
                tokio::time::sleep(delay).await;
            }
        }
        result
    }
}

/// Create a plain text response (no tool calls).
pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// Create a response requesting tools. Ids are left blank so the engine
/// has to assign them.
pub fn tool_response(calls: &[(&str, &str)], content: &str) -> ProviderResponse {
    let calls = calls
        .iter()
        .map(|(name, arguments)| MessageToolCall {
            id: String::new(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        })
        .collect();
    ProviderResponse {
        message: Message::assistant_with_tool_calls(content, calls),
        usage: None,
        model: "mock-model".into(),
    }
}

pub fn api_error(message: &str) -> ProviderError {
    ProviderError::ApiError {
        status_code: 400,
        message: message.into(),
    }
}

/// A tool executor with canned outputs per tool name. Records every call.
pub struct MockTools {
    outputs: Vec<(String, String)>,
    pub calls: Mutex<Vec<(String, ToolArguments)>>,
    delay: Option<Duration>,
}

impl MockTools {
    pub fn new(outputs: &[(&str, &str)]) -> Self {
        Self {
            outputs: outputs
                .iter()
                .map(|(n, o)| (n.to_string(), o.to_string()))
                .collect(),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl ToolExecutor for MockTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.outputs
            .iter()
            .map(|(name, _)| ToolDefinition {
                name: name.clone(),
                description: format!("mock {name}"),
                parameters: serde_json::json!({"type": "object"}),
            })
            .collect()
    }

    async fn execute(&self, name: &str, arguments: &ToolArguments) -> Result<String, ToolError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outputs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, output)| output.clone())
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }
}

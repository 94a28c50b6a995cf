//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world. The
//! engine only sees them through [`ToolExecutor`]; [`ToolRegistry`] is the
//! stock executor backed by [`Tool`] implementations.

use crate::error::ToolError;
use crate::message::MessageToolCall;
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Arguments of a tool call, as far as they could be understood.
///
/// Models sometimes produce arguments that are not a JSON object (truncated
/// JSON, a bare string, ...). Those are passed through as `Raw` rather than
/// failing the round, and each tool decides what to make of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolArguments {
    Parsed(serde_json::Map<String, serde_json::Value>),
    Raw(String),
}

impl ToolArguments {
    /// Interpret a raw argument payload from the model.
    ///
    /// An empty payload means "no arguments" and becomes an empty object.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return ToolArguments::Parsed(serde_json::Map::new());
        }
        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(serde_json::Value::Object(map)) => ToolArguments::Parsed(map),
            _ => ToolArguments::Raw(raw.to_string()),
        }
    }

    /// Look up a string field of a parsed argument object.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self {
            ToolArguments::Parsed(map) => map.get(key).and_then(|v| v.as_str()),
            ToolArguments::Raw(_) => None,
        }
    }

    /// The raw payload, if parsing failed.
    pub fn raw(&self) -> Option<&str> {
        match self {
            ToolArguments::Raw(s) => Some(s),
            ToolArguments::Parsed(_) => None,
        }
    }
}

/// A tool call ready to execute: the model's call with its arguments parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the assistant turn's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Parsed arguments
    pub arguments: ToolArguments,
}

impl From<&MessageToolCall> for ToolCall {
    fn from(call: &MessageToolCall) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: ToolArguments::parse(&call.arguments),
        }
    }
}

/// The core Tool trait.
///
/// Each tool implements this trait and is registered in the [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "get_weather").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool and return its textual output.
    async fn execute(&self, arguments: &ToolArguments) -> std::result::Result<String, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// What the conversation engine needs from a tool backend.
///
/// Unknown tool names surface as [`ToolError::NotFound`]; the engine turns
/// every error into a tool result so one bad call never aborts a turn.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// The current tool catalog, sent to the model with each request.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Execute a tool by name.
    async fn execute(
        &self,
        name: &str,
        arguments: &ToolArguments,
    ) -> std::result::Result<String, ToolError>;
}

/// A registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    async fn execute(
        &self,
        name: &str,
        arguments: &ToolArguments,
    ) -> std::result::Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(arguments).await
    }
}

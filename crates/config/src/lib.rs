//! Configuration loading, validation, and management for chatterclaw.
//!
//! Loads configuration from `~/.chatterclaw/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.chatterclaw/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Conversation engine limits and persona
    #[serde(default)]
    pub engine: EngineConfig,

    /// Chaos-mode context flavouring
    #[serde(default)]
    pub chaos: ChaosConfig,

    /// Where conversations are kept
    #[serde(default)]
    pub storage: StorageConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("engine", &self.engine)
            .field("chaos", &self.chaos)
            .field("storage", &self.storage)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// Limits and persona of the conversation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Persona prompt stored as turn 0 of every channel
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Context window the engine compacts against (90% is usable)
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Tool rounds allowed before a tools-disabled answer is forced
    #[serde(default = "default_max_tool_call_rounds")]
    pub max_tool_call_rounds: u32,

    /// Upper bound on persisted turns per channel, system turn included
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,

    /// Deadline for a single model call
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,

    /// Deadline for a single tool execution
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_system_prompt() -> String {
    "You are chatterclaw, a friendly assistant hanging out in a group chat. \
     Keep replies short and conversational. Use tools when they help."
        .into()
}
fn default_max_context_tokens() -> usize {
    8192
}
fn default_max_tool_call_rounds() -> u32 {
    6
}
fn default_max_history_turns() -> usize {
    60
}
fn default_model_timeout_secs() -> u64 {
    120
}
fn default_tool_timeout_secs() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_context_tokens: default_max_context_tokens(),
            max_tool_call_rounds: default_max_tool_call_rounds(),
            max_history_turns: default_max_history_turns(),
            model_timeout_secs: default_model_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaosConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Chance per request of mixing random past lines into the context
    #[serde(default = "default_chaos_probability")]
    pub probability: f64,

    /// How many past lines to mix in
    #[serde(default = "default_chaos_snippets")]
    pub snippets: usize,
}

fn default_chaos_probability() -> f64 {
    0.1
}
fn default_chaos_snippets() -> usize {
    3
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            probability: default_chaos_probability(),
            snippets: default_chaos_snippets(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "memory" or "file"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Directory for the file backend (default: ~/.chatterclaw/conversations)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_storage_backend() -> String {
    "memory".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.chatterclaw/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `CHATTERCLAW_API_KEY` (highest priority)
    /// - `OPENROUTER_API_KEY`
    /// - `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("CHATTERCLAW_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("CHATTERCLAW_PROVIDER") {
            config.default_provider = provider;
        }

        if let Ok(model) = std::env::var("CHATTERCLAW_MODEL") {
            config.default_model = model;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chatterclaw")
    }

    /// Directory used by the file conversation store.
    pub fn conversations_dir(&self) -> PathBuf {
        self.storage
            .path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::config_dir().join("conversations"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        // Room for the system prompt, a summary and a few turns.
        if self.engine.max_context_tokens < 256 {
            return Err(ConfigError::ValidationError(
                "engine.max_context_tokens must be at least 256".into(),
            ));
        }

        if self.engine.max_tool_call_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_tool_call_rounds must be > 0".into(),
            ));
        }

        if self.engine.max_history_turns < 2 {
            return Err(ConfigError::ValidationError(
                "engine.max_history_turns must be at least 2".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.chaos.probability) {
            return Err(ConfigError::ValidationError(
                "chaos.probability must be between 0.0 and 1.0".into(),
            ));
        }

        if !matches!(self.storage.backend.as_str(), "memory" | "file") {
            return Err(ConfigError::ValidationError(format!(
                "storage.backend must be \"memory\" or \"file\", got \"{}\"",
                self.storage.backend
            )));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            engine: EngineConfig::default(),
            chaos: ChaosConfig::default(),
            storage: StorageConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

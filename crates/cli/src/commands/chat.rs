//! `chatterclaw chat` — Talk to the agent in one channel.
//!
//! Every line typed is a chat line from `--nick` in `--channel`. Lines
//! starting with `/` are commands:
//!
//! - `/clear` forgets the channel's conversation
//! - `/history` prints the stored conversation
//! - `/announce <text>` records text as if the agent had said it
//! - `/quit` exits

use chatterclaw_agent::ConversationEngine;
use chatterclaw_agent::context::compactor::truncate_with_ellipsis;
use chatterclaw_config::AppConfig;
use chatterclaw_core::chat::{ChannelId, ChatMessage};
use chatterclaw_core::conversation::ConversationStore;
use chatterclaw_core::event::EventBus;
use chatterclaw_core::history::MessageHistory;
use chatterclaw_memory::{FileConversationStore, InMemoryConversationStore, InMemoryHistory};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

/// Shown instead of a reply when a turn fails or the model says nothing.
pub const APOLOGY: &str = "Sorry, I couldn't come up with a reply just now.";

/// Nick used when recording the agent's own lines.
const AGENT_NICK: &str = "chatterclaw";

/// Providers that run without an API key.
const KEYLESS_PROVIDERS: [&str; 4] = ["ollama", "vllm", "llamacpp", "llama.cpp"];

#[derive(clap::Args)]
pub struct ChatArgs {
    /// Send a single message instead of entering interactive mode
    #[arg(short, long)]
    message: Option<String>,

    /// Channel the conversation belongs to
    #[arg(short, long, default_value = "#cli", env = "CHATTERCLAW_CHANNEL")]
    channel: String,

    /// Nickname to speak as
    #[arg(short, long, default_value = "you")]
    nick: String,

    /// Model to use instead of the configured one
    #[arg(long)]
    model: Option<String>,
}

pub async fn run(args: ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    resolve_model(&mut config, args.model);

    if !config.has_api_key() && !KEYLESS_PROVIDERS.contains(&config.default_provider.as_str()) {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    CHATTERCLAW_API_KEY, OPENROUTER_API_KEY or OPENAI_API_KEY");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let router = chatterclaw_providers::build_from_config(&config);
    let provider = router.default().ok_or_else(|| {
        format!(
            "Provider '{}' is not a known backend; set api_url under [providers.{}]",
            config.default_provider, config.default_provider
        )
    })?;
    let tools = Arc::new(chatterclaw_tools::default_registry());
    let history = Arc::new(InMemoryHistory::new());
    let event_bus = Arc::new(EventBus::default());
    let engine = ConversationEngine::new(provider, tools, build_store(&config), &config, event_bus)
        .with_history(history.clone());

    let session = Session {
        engine,
        history,
        channel: ChannelId::new(args.channel),
        nick: args.nick,
    };

    if let Some(msg) = args.message {
        println!("{}", session.say(&msg).await);
        return Ok(());
    }

    println!();
    println!("  chatterclaw — {} as {}", session.channel, session.nick);
    println!("  Provider: {}  Model: {}", config.default_provider, config.default_model);
    println!("  Commands: /clear  /history  /announce <text>  /quit");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt(&session.nick)?;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            prompt(&session.nick)?;
            continue;
        }
        if matches!(line, "/quit" | "/exit") {
            break;
        }

        if let Some(command) = line.strip_prefix('/') {
            session.command(command).await;
        } else {
            for reply_line in session.say(line).await.lines() {
                println!("  {AGENT_NICK} > {reply_line}");
            }
            println!();
        }
        prompt(&session.nick)?;
    }

    println!();
    Ok(())
}

/// `--model` wins, then the `CHATTERCLAW_MODEL` env var (already applied by
/// `AppConfig::load`), then the default provider's own `default_model`.
fn resolve_model(config: &mut AppConfig, flag: Option<String>) {
    if let Some(model) = flag {
        config.default_model = model;
        return;
    }
    if std::env::var("CHATTERCLAW_MODEL").is_ok() {
        return;
    }
    if let Some(model) = config
        .providers
        .get(&config.default_provider)
        .and_then(|p| p.default_model.clone())
    {
        config.default_model = model;
    }
}

/// The conversation store selected by `storage.backend`.
pub fn build_store(config: &AppConfig) -> Arc<dyn ConversationStore> {
    match config.storage.backend.as_str() {
        "file" => Arc::new(FileConversationStore::new(config.conversations_dir())),
        _ => Arc::new(InMemoryConversationStore::new()),
    }
}

fn prompt(nick: &str) -> std::io::Result<()> {
    print!("  {nick} > ");
    std::io::stdout().flush()
}

struct Session {
    engine: ConversationEngine,
    history: Arc<InMemoryHistory>,
    channel: ChannelId,
    nick: String,
}

impl Session {
    /// Send one chat line and return what to show for it.
    async fn say(&self, text: &str) -> String {
        let line = ChatMessage::now(&self.nick, text);
        self.remember(line.clone()).await;

        let reply = match self
            .engine
            .process_messages(&self.channel, std::slice::from_ref(&line))
            .await
        {
            Ok(reply) if !reply.is_empty() => reply,
            Ok(_) => return APOLOGY.to_string(),
            Err(e) => {
                warn!(channel = %self.channel, error = %e, "Turn failed");
                return APOLOGY.to_string();
            }
        };

        self.remember(ChatMessage::now(AGENT_NICK, &reply)).await;
        reply
    }

    async fn command(&self, command: &str) {
        let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
        match name {
            "clear" => match self.engine.clear_history(Some(&self.channel)).await {
                Ok(()) => println!("  Conversation cleared."),
                Err(e) => eprintln!("  [Error] {e}"),
            },
            "history" => match self.engine.history(&self.channel).await {
                Ok(turns) => {
                    for turn in turns {
                        println!(
                            "  {:<9} {}",
                            turn.role.as_str(),
                            truncate_with_ellipsis(&turn.content, 200)
                        );
                    }
                }
                Err(e) => eprintln!("  [Error] {e}"),
            },
            "announce" if !rest.trim().is_empty() => {
                match self.engine.record_assistant_output(&self.channel, rest).await {
                    Ok(()) => {
                        self.remember(ChatMessage::now(AGENT_NICK, rest.trim())).await;
                        println!("  {AGENT_NICK} > {}", rest.trim());
                    }
                    Err(e) => eprintln!("  [Error] {e}"),
                }
            }
            "announce" => println!("  Usage: /announce <text>"),
            other => println!("  Unknown command: /{other}"),
        }
        println!();
    }

    async fn remember(&self, line: ChatMessage) {
        if let Err(e) = self.history.record(&self.channel, line).await {
            warn!(channel = %self.channel, error = %e, "Could not record chat line");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatterclaw_config::ProviderConfig;

    #[test]
    fn model_flag_overrides_config() {
        let mut config = AppConfig::default();
        resolve_model(&mut config, Some("local/llama".into()));
        assert_eq!(config.default_model, "local/llama");
    }

    #[test]
    fn provider_default_model_is_used() {
        if std::env::var("CHATTERCLAW_MODEL").is_ok() {
            return;
        }
        let mut config = AppConfig::default();
        config.providers.insert(
            config.default_provider.clone(),
            ProviderConfig {
                api_key: None,
                api_url: None,
                default_model: Some("openai/gpt-4o-mini".into()),
            },
        );
        resolve_model(&mut config, None);
        assert_eq!(config.default_model, "openai/gpt-4o-mini");
    }

    #[tokio::test]
    async fn store_follows_backend_setting() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        assert_eq!(build_store(&config).name(), "memory");

        config.storage.backend = "file".into();
        config.storage.path = Some(dir.path().display().to_string());
        assert_eq!(build_store(&config).name(), "file");
    }
}

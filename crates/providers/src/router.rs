//! Picks the model backend a conversation engine talks to.
//!
//! Every backend speaks the OpenAI chat-completions dialect, so a backend is
//! just a name, a base URL and an optional key. Well-known names get their
//! public URL; anything else needs `api_url` in its `[providers.<name>]`
//! table.

use crate::openai_compat::OpenAiCompatProvider;
use chatterclaw_config::AppConfig;
use chatterclaw_core::provider::Provider;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Named model backends plus the one used when none is asked for.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// The backend named by `default_provider`, if it could be built.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }
}

/// One backend per `[providers.*]` table, plus the default provider even
/// when it has no table of its own.
///
/// A provider's own `api_key` wins over the global one. Backends with an
/// unknown name and no `api_url` are skipped.
pub fn build_from_config(config: &AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider);

    for (name, provider_config) in &config.providers {
        let api_key = provider_config
            .api_key
            .as_deref()
            .or(config.api_key.as_deref())
            .unwrap_or_default();
        let base_url = provider_config
            .api_url
            .as_deref()
            .or_else(|| well_known_base_url(name));

        match base_url {
            Some(base_url) => router.register(name.clone(), backend(name, base_url, api_key)),
            None => warn!(provider = %name, "Unknown provider has no api_url, skipping"),
        }
    }

    let name = &config.default_provider;
    if router.get(name).is_none() {
        match well_known_base_url(name) {
            Some(base_url) => {
                let api_key = config.api_key.as_deref().unwrap_or_default();
                router.register(name.clone(), backend(name, base_url, api_key));
            }
            None => warn!(provider = %name, "Default provider is not configured"),
        }
    }

    router
}

fn backend(name: &str, base_url: &str, api_key: &str) -> Arc<dyn Provider> {
    debug!(provider = %name, base_url, "Registering backend");
    Arc::new(OpenAiCompatProvider::new(name, base_url, api_key))
}

fn well_known_base_url(name: &str) -> Option<&'static str> {
    let url = match name {
        "openrouter" => "https://openrouter.ai/api/v1",
        "openai" => "https://api.openai.com/v1",
        "ollama" => "http://localhost:11434/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "together" => "https://api.together.xyz/v1",
        "vllm" => "http://localhost:8000/v1",
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1",
        _ => return None,
    };
    Some(url)
}

//! Built-in tool implementations for chatterclaw.

pub mod weather;

use chatterclaw_core::tool::ToolRegistry;

pub use weather::WeatherTool;

/// Create a tool registry holding every built-in tool.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(weather::WeatherTool));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatterclaw_core::tool::{ToolArguments, ToolExecutor};

    #[tokio::test]
    async fn default_registry_serves_weather() {
        let registry = default_registry();
        assert_eq!(registry.names(), vec!["get_weather"]);
        let output = registry
            .execute("get_weather", &ToolArguments::parse(r#"{"query": "London"}"#))
            .await
            .unwrap();
        assert!(output.contains("London"));
    }
}

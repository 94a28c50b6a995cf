//! Weather tool — returns mock weather data.
//!
//! The conditions are derived from a hash of the location name, so the
//! same query always produces the same report. Good enough to exercise the
//! tool-calling loop end to end without network access.

use async_trait::async_trait;
use chatterclaw_core::error::ToolError;
use chatterclaw_core::tool::{Tool, ToolArguments};
use tracing::debug;

pub struct WeatherTool;

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get the current weather for a location. Returns temperature, conditions, humidity and wind."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "City name or location, e.g. \"London\""
                },
                "units": {
                    "type": "string",
                    "enum": ["metric", "imperial"],
                    "description": "Temperature units (default: metric)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: &ToolArguments) -> Result<String, ToolError> {
        // Models occasionally send the bare location instead of an object.
        let query = arguments
            .get_str("query")
            .or_else(|| arguments.get_str("location"))
            .or_else(|| arguments.raw())
            .map(|q| q.trim().trim_matches('"').trim())
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let imperial = arguments.get_str("units") == Some("imperial");
        debug!(location = query, imperial, "Weather lookup");
        Ok(mock_report(query, imperial))
    }
}

fn mock_report(location: &str, imperial: bool) -> String {
    let hash: u32 = location
        .to_lowercase()
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));

    const CONDITIONS: [&str; 8] = [
        "Clear skies",
        "Partly cloudy",
        "Overcast",
        "Light rain",
        "Heavy rain",
        "Thunderstorms",
        "Snow",
        "Foggy",
    ];
    const WIND_DIRS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];

    let celsius = (hash % 40) as i32 - 5; // -5 to 34
    let (temperature, unit) = if imperial {
        (celsius * 9 / 5 + 32, "F")
    } else {
        (celsius, "C")
    };

    format!(
        "Weather for {location}: {}, {temperature}{unit}, humidity {}%, wind {} km/h {}",
        CONDITIONS[(hash as usize / 7) % CONDITIONS.len()],
        30 + hash % 60,
        5 + hash % 30,
        WIND_DIRS[(hash as usize / 3) % WIND_DIRS.len()],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn report_mentions_location() {
        let output = WeatherTool
            .execute(&ToolArguments::parse(r#"{"query": "Tokyo"}"#))
            .await
            .unwrap();
        assert!(output.starts_with("Weather for Tokyo:"));
        assert!(output.contains("humidity"));
    }

    #[tokio::test]
    async fn imperial_units() {
        let output = WeatherTool
            .execute(&ToolArguments::parse(
                r#"{"query": "New York", "units": "imperial"}"#,
            ))
            .await
            .unwrap();
        assert!(output.contains('F'));
    }

    #[tokio::test]
    async fn deterministic_results() {
        let args = ToolArguments::parse(r#"{"query": "London"}"#);
        let first = WeatherTool.execute(&args).await.unwrap();
        let second = WeatherTool.execute(&args).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn raw_payload_is_used_as_location() {
        let output = WeatherTool
            .execute(&ToolArguments::parse("\"Paris\""))
            .await
            .unwrap();
        assert!(output.starts_with("Weather for Paris:"));
    }

    #[tokio::test]
    async fn missing_query_is_an_error() {
        let err = WeatherTool
            .execute(&ToolArguments::parse("{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn tool_definition() {
        assert_eq!(WeatherTool.to_definition().name, "get_weather");
    }
}

//! Tool calls written into reply text.
//!
//! Some models, especially local ones served without native tool support,
//! answer with pseudo tool-call markup instead of structured calls:
//!
//! ```text
//! <tool_call>{"name": "get_weather", "arguments": {"query": "London"}}</tool_call>
//! <function=get_weather>{"query": "London"}</function>
//! ```
//!
//! [`extract_inline_calls`] turns that markup into [`MessageToolCall`]s and
//! removes it from the text.

use chatterclaw_core::message::MessageToolCall;
use regex_lite::Regex;
use std::sync::LazyLock;
use tracing::debug;

static TOOL_CALL_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<tool_call>\s*(.*?)\s*</tool_call>").expect("Invalid tool_call tag regex")
});

static FUNCTION_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<function=([A-Za-z0-9_.\-]+)>\s*(.*?)\s*</function>")
        .expect("Invalid function tag regex")
});

/// Calls found in `content`, and the content with the markup removed.
///
/// Returns `None` when the text holds no recognizable call. Ids are left
/// blank; the tool loop assigns them.
pub fn extract_inline_calls(content: &str) -> Option<(String, Vec<MessageToolCall>)> {
    let mut calls = Vec::new();

    for caps in TOOL_CALL_TAG.captures_iter(content) {
        if let Some(call) = caps.get(1).and_then(|m| parse_tool_call_body(m.as_str())) {
            calls.push(call);
        }
    }
    let remaining = TOOL_CALL_TAG.replace_all(content, "").into_owned();

    for caps in FUNCTION_TAG.captures_iter(&remaining) {
        let (Some(name), Some(body)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        calls.push(MessageToolCall {
            id: String::new(),
            name: name.as_str().to_string(),
            arguments: body.as_str().to_string(),
        });
    }
    let remaining = FUNCTION_TAG.replace_all(&remaining, "").into_owned();

    if calls.is_empty() {
        return None;
    }
    debug!(count = calls.len(), "Parsed inline tool calls from reply text");
    Some((remaining.trim().to_string(), calls))
}

/// Remove any pseudo tool-call markup without interpreting it.
pub fn strip_inline_markup(content: &str) -> String {
    match extract_inline_calls(content) {
        Some((cleaned, _)) => cleaned,
        None => content.to_string(),
    }
}

/// `{"name": ..., "arguments": ...}`; `parameters` is accepted as an alias.
fn parse_tool_call_body(body: &str) -> Option<MessageToolCall> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let name = value.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let arguments = match value.get("arguments").or_else(|| value.get("parameters")) {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(raw)) => raw.clone(),
        Some(other) => other.to_string(),
    };
    Some(MessageToolCall {
        id: String::new(),
        name: name.to_string(),
        arguments,
    })
}

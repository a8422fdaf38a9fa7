// ABOUTME: Model provider adapter — chat-completion requests with tool definitions.
// ABOUTME: Speaks the OpenAI-compatible /chat/completions wire shape via reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value, json};
use thiserror::Error;

use super::context::ToolCall;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Transport or shape failures from the model backend. The executor does not
/// retry; the turn ends with the error text as its reply.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {0}: {1}")]
    UnexpectedStatus(StatusCode, String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Parsed first choice of a chat completion.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Map<String, Value>,
}

/// The single operation the executor needs from a model backend.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(
        &self,
        messages: Vec<Value>,
        tools: Option<Vec<Value>>,
    ) -> Result<ChatResponse, ProviderError>;
}

/// Adapter for any endpoint speaking the OpenAI chat-completion schema.
pub struct OpenAiCompatProvider {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self::with_timeout(base_url, api_key, model, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, api_key: &str, model: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client construction cannot fail with these options");
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    async fn chat(
        &self,
        messages: Vec<Value>,
        tools: Option<Vec<Value>>,
    ) -> Result<ChatResponse, ProviderError> {
        let mut payload = json!({ "messages": messages });
        if !self.model.is_empty() {
            payload["model"] = json!(self.model);
        }
        if let Some(tools) = tools {
            if !tools.is_empty() {
                payload["tools"] = Value::Array(tools);
            }
        }

        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.client.post(&url).json(&payload);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::UnexpectedStatus(status, body));
        }

        let data: Value = resp.json().await?;
        parse_chat_response(&data)
    }
}

/// Parse the first choice of a chat-completion body into a [`ChatResponse`].
///
/// Null content is normalised to the empty string. Tool-call arguments may
/// arrive as an object or as JSON text; text that fails to decode is wrapped
/// as `{"_raw": …}` so handlers always receive a map.
pub fn parse_chat_response(data: &Value) -> Result<ChatResponse, ProviderError> {
    let message = data
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| ProviderError::Malformed("no choices[0].message".to_string()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for tc in calls {
            let function = tc.get("function").cloned().unwrap_or_else(|| json!({}));
            tool_calls.push(ToolCall {
                id: tc
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                name: function
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                arguments: decode_arguments(function.get("arguments")),
            });
        }
    }

    let usage = data
        .get("usage")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    Ok(ChatResponse {
        content,
        tool_calls,
        usage,
    })
}

/// Decode a tool-call `arguments` field into a map, whatever shape the
/// backend produced.
fn decode_arguments(raw: Option<&Value>) -> Map<String, Value> {
    match raw {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(text)) => {
            if text.trim().is_empty() {
                return Map::new();
            }
            match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => map,
                _ => {
                    let mut wrapped = Map::new();
                    wrapped.insert("_raw".to_string(), json!(text));
                    wrapped
                }
            }
        }
        Some(other) => {
            let mut wrapped = Map::new();
            wrapped.insert("_raw".to_string(), json!(other.to_string()));
            wrapped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_reply() {
        let body = json!({
            "choices": [{"message": {"content": "hi", "tool_calls": null}}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1}
        });
        let resp = parse_chat_response(&body).unwrap();
        assert_eq!(resp.content, "hi");
        assert!(resp.tool_calls.is_empty());
        assert_eq!(resp.usage["prompt_tokens"], 3);
    }

    #[test]
    fn null_content_becomes_empty_string() {
        let body = json!({"choices": [{"message": {"content": null}}]});
        let resp = parse_chat_response(&body).unwrap();
        assert_eq!(resp.content, "");
    }

    #[test]
    fn decodes_object_arguments() {
        let body = json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{"id": "c1", "function": {"name": "fs.read", "arguments": {"path": "a.txt"}}}]
            }}]
        });
        let resp = parse_chat_response(&body).unwrap();
        assert_eq!(resp.tool_calls[0].name, "fs.read");
        assert_eq!(resp.tool_calls[0].arguments["path"], "a.txt");
    }

    #[test]
    fn decodes_string_arguments() {
        let body = json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{"id": "c1", "function": {"name": "exec.run", "arguments": "{\"command\":\"ls\"}"}}]
            }}]
        });
        let resp = parse_chat_response(&body).unwrap();
        assert_eq!(resp.tool_calls[0].arguments["command"], "ls");
    }

    #[test]
    fn undecodable_string_arguments_wrap_as_raw() {
        let body = json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{"id": "c1", "function": {"name": "exec.run", "arguments": "not json"}}]
            }}]
        });
        let resp = parse_chat_response(&body).unwrap();
        assert_eq!(resp.tool_calls[0].arguments["_raw"], "not json");
    }

    #[test]
    fn empty_string_arguments_decode_to_empty_map() {
        let body = json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{"id": "c1", "function": {"name": "fs.list_dir", "arguments": "  "}}]
            }}]
        });
        let resp = parse_chat_response(&body).unwrap();
        assert!(resp.tool_calls[0].arguments.is_empty());
    }

    #[test]
    fn missing_choices_is_malformed() {
        let body = json!({"error": "nope"});
        assert!(matches!(
            parse_chat_response(&body),
            Err(ProviderError::Malformed(_))
        ));
    }
}

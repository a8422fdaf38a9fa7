// ABOUTME: Web fetch tool — HTTP GET a URL and return truncated text.
// ABOUTME: Bounded by a 30 second timeout; large bodies are cut at 5000 chars.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::{Tool, ToolError, require_str};
use crate::tools::registry::ToolRegistry;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_BODY_CHARS: usize = 5000;

/// Fetch a URL over HTTP GET, following redirects.
pub struct WebFetchTool {
    client: reqwest::Client,
}

impl Default for WebFetchTool {
    fn default() -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with these options");
        Self { client }
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web.fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL via HTTP GET and return truncated text."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"url": {"type": "string"}},
            "required": ["url"],
            "additionalProperties": false,
        })
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let url = require_str(&args, "url")?;
        let resp = self.client.get(url).send().await?;
        let status = resp.status().as_u16();
        if !(200..400).contains(&status) {
            return Err(ToolError::handler(format!("HTTP {status} fetching {url}")));
        }
        let text = resp.text().await?;
        let truncated: String = text.chars().take(MAX_BODY_CHARS).collect();
        Ok(json!({"status": status, "text": truncated}))
    }
}

/// Register the web fetch tool.
pub fn register_web_tools(registry: &mut ToolRegistry) {
    registry.register(Arc::new(WebFetchTool::default()));
}

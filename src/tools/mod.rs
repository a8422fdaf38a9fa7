// ABOUTME: Tools module — the Tool trait, registry, and built-in handlers.
// ABOUTME: Handlers receive arguments as a JSON map and return a JSON value or fail.

pub mod email;
pub mod exec;
pub mod fs;
pub mod registry;
pub mod web;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::workspace::WorkspacePathError;

/// Failures a handler can produce. The registry converts these into
/// structured error values the model can see and react to; they never crash
/// a turn.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    Workspace(#[from] WorkspacePathError),

    #[error("Command timed out after {0}s")]
    Timeout(u64),

    #[error("{0}")]
    Handler(String),
}

impl ToolError {
    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        Self::Handler(e.to_string())
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(e: reqwest::Error) -> Self {
        Self::Handler(e.to_string())
    }
}

/// A capability the model can invoke: declarative description plus an
/// executable handler. Scope and approval requirements are declared here and
/// enforced by the registry before `execute` ever runs.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON-schema-shaped parameter descriptor relayed to the model.
    fn parameters(&self) -> Value;

    /// Whether invocation demands the `write` scope.
    fn requires_write(&self) -> bool {
        false
    }

    /// Whether invocation must pass the two-phase approval gate.
    fn requires_approval(&self) -> bool {
        false
    }

    /// Human-readable line shown on the approval prompt.
    fn approval_summary(&self) -> String {
        format!("Run tool {}", self.name())
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<Value, ToolError>;
}

/// Pull a required string argument out of a tool-call map.
pub(crate) fn require_str<'a>(
    args: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::handler(format!("Missing required argument: {key}")))
}

/// Pull an optional string argument, falling back to a default.
pub(crate) fn optional_str<'a>(args: &'a Map<String, Value>, key: &str, default: &'a str) -> &'a str {
    args.get(key).and_then(Value::as_str).unwrap_or(default)
}

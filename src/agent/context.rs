// ABOUTME: Conversation data model and context builder.
// ABOUTME: Assembles system prompt + history + tool definitions into the provider payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Message author role, serialized in provider wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A model-requested tool invocation, identified by an id the model chose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// One entry of a session's ordered history.
///
/// Tool messages carry the id of the call they answer; assistant messages
/// dispatched with tool calls carry those calls so the log records which
/// message requested them. Optional fields are skipped when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Some(calls),
        }
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }
}

/// A fully assembled turn context, recomputed each iteration.
#[derive(Debug, Clone)]
pub struct Context {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tool_definitions: Vec<Value>,
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are Deskclaw, a helpful local-first AI assistant.\n\
- You can only access files within the configured workspace.\n\
- High-risk actions (shell execution, sending email) may require user approval.\n\
- If a tool returns an approval-required message, explain what you need and wait.\n";

/// Builds provider-shaped payloads from the system prompt and history.
/// History is never rewritten in place.
pub struct ContextBuilder {
    system_prompt: String,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl ContextBuilder {
    pub fn new(system_prompt: Option<String>) -> Self {
        Self {
            system_prompt: system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }

    pub fn build(&self, history: &[Message], tool_definitions: &[Value]) -> Context {
        Context {
            system_prompt: self.system_prompt.clone(),
            messages: history.to_vec(),
            tool_definitions: tool_definitions.to_vec(),
        }
    }

    /// Flatten a context into the provider message list: a leading `system`
    /// entry, then each history message in order. Tool messages carry their
    /// `tool_call_id`; every other role carries role + content only.
    pub fn to_provider_messages(ctx: &Context) -> Vec<Value> {
        let mut msgs = Vec::with_capacity(ctx.messages.len() + 1);
        msgs.push(json!({"role": "system", "content": ctx.system_prompt}));
        for m in &ctx.messages {
            let mut entry = json!({"role": m.role, "content": m.content});
            if m.role == Role::Tool {
                if let Some(id) = &m.tool_call_id {
                    entry["tool_call_id"] = json!(id);
                }
            }
            msgs.push(entry);
        }
        msgs
    }
}

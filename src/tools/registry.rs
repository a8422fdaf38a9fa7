// ABOUTME: Tool registry — named handlers bound to scope and approval metadata.
// ABOUTME: Invocation order: lookup, write scope, approval gate, execute.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value, json};

use super::Tool;
use crate::policy::{AuthContext, PolicyEngine, PolicyError};

/// Named tool handlers plus the policy engine gating their invocation.
/// Populated once at daemon start, read-only afterwards.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    policy: Arc<PolicyEngine>,
}

impl ToolRegistry {
    pub fn new(policy: Arc<PolicyEngine>) -> Self {
        Self {
            tools: BTreeMap::new(),
            policy,
        }
    }

    /// Register a tool under its declared name. Names are unique; a second
    /// registration replaces the first.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Provider-shaped definitions list relayed to the chat endpoint.
    pub fn definitions(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name(),
                        "description": t.description(),
                        "parameters": t.parameters(),
                    }
                })
            })
            .collect()
    }

    /// Invoke a tool under policy.
    ///
    /// An unknown name and handler failures come back as structured error
    /// values so the model can see them and recover. `MissingScope` and
    /// `ApprovalRequired` propagate as typed errors: the first terminates the
    /// turn, the second suspends it.
    pub async fn invoke(
        &self,
        ctx: &AuthContext,
        session_id: &str,
        name: &str,
        args: Map<String, Value>,
        tool_call_id: Option<&str>,
        approved: bool,
    ) -> Result<Value, PolicyError> {
        let Some(tool) = self.tools.get(name) else {
            return Ok(json!({"error": format!("Unknown tool: {name}")}));
        };

        if tool.requires_write() {
            self.policy.enforce_write_scope(ctx)?;
        }

        if tool.requires_approval() && !approved {
            self.policy.maybe_require_approval(
                ctx,
                session_id,
                name,
                &args,
                &tool.approval_summary(),
                true,
                tool_call_id,
            )?;
        }

        match tool.execute(args).await {
            Ok(value) => Ok(value),
            Err(e) => Ok(json!({"error": e.to_string()})),
        }
    }
}

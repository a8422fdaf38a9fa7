// ABOUTME: Agent turn executor — drives the model through tool calls to a final reply.
// ABOUTME: A turn ends final, suspended on approval, or exhausted at the iteration cap.

use std::sync::Arc;

use serde_json::{Value, json};

use super::context::{ContextBuilder, Message, ToolCall};
use super::provider::Provider;
use super::sessions::Session;
use crate::events::EventHub;
use crate::policy::{ApprovalStatus, ApprovalStore, AuthContext, PolicyError};
use crate::tools::registry::ToolRegistry;

pub const DEFAULT_MAX_ITERATIONS: usize = 25;

const EXHAUSTED_REPLY: &str = "Reached maximum iterations without a final answer.";
const INVALID_APPROVAL_REPLY: &str = "Invalid or non-allowed approval_id.";

/// Outcome of one executor invocation. A present `pending_approval_id` means
/// the turn is suspended awaiting a human decision, not finished.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub reply: String,
    pub tool_calls: Vec<ToolCall>,
    pub pending_approval_id: Option<String>,
}

/// The turn executor: context build, provider call, in-order tool dispatch,
/// repeated until the model stops asking for tools.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    ctx_builder: ContextBuilder,
    approvals: Arc<ApprovalStore>,
    hub: Arc<EventHub>,
    max_iterations: usize,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        approvals: Arc<ApprovalStore>,
        hub: Arc<EventHub>,
    ) -> Self {
        Self {
            provider,
            tools,
            ctx_builder: ContextBuilder::default(),
            approvals,
            hub,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_context_builder(mut self, ctx_builder: ContextBuilder) -> Self {
        self.ctx_builder = ctx_builder;
        self
    }

    /// Run a fresh turn: append the user message and iterate until the model
    /// produces a reply, an approval suspends the turn, or the cap is hit.
    pub async fn run_turn(
        &self,
        auth: &AuthContext,
        session: &Session,
        user_text: &str,
    ) -> anyhow::Result<AgentResponse> {
        let mut msgs = session.read_all();
        let user_msg = Message::user(user_text);
        session.append(&user_msg)?;
        msgs.push(user_msg);
        self.drive(auth, session, msgs).await
    }

    /// Resume a turn suspended on an approval. The approval must exist,
    /// belong to this session, and be in the `allow` state; anything else
    /// replies with an error without touching history. A successful resume
    /// consumes the approval so it can never authorise a second execution.
    pub async fn resume_turn(
        &self,
        auth: &AuthContext,
        session: &Session,
        approval_id: Option<&str>,
    ) -> anyhow::Result<AgentResponse> {
        let mut msgs = session.read_all();

        if let Some(approval_id) = approval_id {
            let approval = self.approvals.get(approval_id).filter(|a| {
                a.session_id == session.id() && a.status == ApprovalStatus::Allow
            });
            let Some(approval) = approval else {
                return Ok(AgentResponse {
                    reply: INVALID_APPROVAL_REPLY.to_string(),
                    tool_calls: Vec::new(),
                    pending_approval_id: None,
                });
            };

            let invoked = self
                .tools
                .invoke(
                    auth,
                    session.id(),
                    &approval.tool_name,
                    approval.tool_arguments.clone(),
                    approval.tool_call_id.as_deref(),
                    true,
                )
                .await;
            match invoked {
                Ok(value) => {
                    let msg = Message {
                        role: super::context::Role::Tool,
                        content: render_tool_result(&value),
                        tool_call_id: approval.tool_call_id.clone(),
                        tool_calls: None,
                    };
                    session.append(&msg)?;
                    msgs.push(msg);
                    self.approvals.consume(&approval.id);
                }
                Err(e) => {
                    let pending = match &e {
                        PolicyError::ApprovalRequired { approval_id, .. } => {
                            Some(approval_id.clone())
                        }
                        PolicyError::MissingScope(_) => None,
                    };
                    return self.finish(session, e.to_string(), Vec::new(), pending).await;
                }
            }
        }

        self.drive(auth, session, msgs).await
    }

    /// The iteration loop shared by fresh and resumed turns. Tool calls from
    /// a single model response run strictly in order; the first
    /// `ApprovalRequired` short-circuits the rest of the batch, and results
    /// already produced stay in history.
    async fn drive(
        &self,
        auth: &AuthContext,
        session: &Session,
        mut msgs: Vec<Message>,
    ) -> anyhow::Result<AgentResponse> {
        let defs = self.tools.definitions();
        let mut all_tool_calls: Vec<ToolCall> = Vec::new();

        for _ in 0..self.max_iterations {
            let ctx = self.ctx_builder.build(&msgs, &defs);
            let payload = ContextBuilder::to_provider_messages(&ctx);
            let tools = (!defs.is_empty()).then(|| defs.clone());

            let response = match self.provider.chat(payload, tools).await {
                Ok(r) => r,
                Err(e) => {
                    return self
                        .finish(session, format!("Provider error: {e}"), all_tool_calls, None)
                        .await;
                }
            };

            if response.tool_calls.is_empty() {
                return self
                    .finish(session, response.content, all_tool_calls, None)
                    .await;
            }

            let assistant =
                Message::assistant_with_calls(&response.content, response.tool_calls.clone());
            session.append(&assistant)?;
            msgs.push(assistant);

            for tc in response.tool_calls {
                all_tool_calls.push(tc.clone());
                let invoked = self
                    .tools
                    .invoke(
                        auth,
                        session.id(),
                        &tc.name,
                        tc.arguments,
                        Some(&tc.id),
                        false,
                    )
                    .await;
                match invoked {
                    Ok(value) => {
                        let msg = Message::tool(render_tool_result(&value), &tc.id);
                        session.append(&msg)?;
                        msgs.push(msg);
                    }
                    Err(PolicyError::ApprovalRequired {
                        approval_id,
                        summary,
                    }) => {
                        return self
                            .finish(
                                session,
                                format!("Approval required: {summary}"),
                                all_tool_calls,
                                Some(approval_id),
                            )
                            .await;
                    }
                    Err(e @ PolicyError::MissingScope(_)) => {
                        return self
                            .finish(session, e.to_string(), all_tool_calls, None)
                            .await;
                    }
                }
            }
        }

        self.finish(session, EXHAUSTED_REPLY.to_string(), all_tool_calls, None)
            .await
    }

    /// Every terminal outcome lands here: the reply is appended to the
    /// session log and `chat.reply` goes out to subscribers.
    async fn finish(
        &self,
        session: &Session,
        reply: String,
        tool_calls: Vec<ToolCall>,
        pending_approval_id: Option<String>,
    ) -> anyhow::Result<AgentResponse> {
        session.append(&Message::assistant(&reply))?;
        self.hub.broadcast(
            "chat.reply",
            json!({
                "session_id": session.id(),
                "pending_approval_id": pending_approval_id,
            }),
        );
        Ok(AgentResponse {
            reply,
            tool_calls,
            pending_approval_id,
        })
    }
}

/// Tool results become the `content` of a tool message: strings verbatim,
/// anything else as compact JSON.
fn render_tool_result(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

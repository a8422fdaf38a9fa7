// ABOUTME: End-to-end executor scenarios with a scripted provider stub.
// ABOUTME: Covers plain replies, tool dispatch, approval suspend/resume, scopes, and the cap.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use deskclaw::agent::{
    AgentLoop, ChatResponse, Provider, ProviderError, Role, Session, SessionStore, ToolCall,
};
use deskclaw::events::EventHub;
use deskclaw::policy::{ApprovalStatus, ApprovalStore, AuthContext, Decision, PolicyEngine, Scope};
use deskclaw::tools::exec::register_exec_tool;
use deskclaw::tools::fs::register_fs_tools;
use deskclaw::tools::registry::ToolRegistry;

/// Scripted provider: pops queued responses, then repeats the fallback.
struct StubProvider {
    script: Mutex<VecDeque<ChatResponse>>,
    fallback: Option<ChatResponse>,
}

impl StubProvider {
    fn scripted(responses: Vec<ChatResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().collect()),
            fallback: None,
        }
    }

    fn repeating(response: ChatResponse) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(response),
        }
    }
}

#[async_trait]
impl Provider for StubProvider {
    async fn chat(
        &self,
        _messages: Vec<Value>,
        _tools: Option<Vec<Value>>,
    ) -> Result<ChatResponse, ProviderError> {
        if let Some(response) = self.script.lock().unwrap().pop_front() {
            return Ok(response);
        }
        match &self.fallback {
            Some(response) => Ok(response.clone()),
            None => Err(ProviderError::Malformed("script exhausted".to_string())),
        }
    }
}

fn reply(content: &str) -> ChatResponse {
    ChatResponse {
        content: content.to_string(),
        ..Default::default()
    }
}

fn tool_call(id: &str, name: &str, args: Value) -> ChatResponse {
    let arguments: Map<String, Value> = args.as_object().cloned().unwrap_or_default();
    ChatResponse {
        content: String::new(),
        tool_calls: vec![ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }],
        usage: Map::new(),
    }
}

struct Harness {
    _tmp: tempfile::TempDir,
    workspace: PathBuf,
    sessions: SessionStore,
    approvals: Arc<ApprovalStore>,
    hub: Arc<EventHub>,
    agent: AgentLoop,
}

impl Harness {
    fn new(provider: StubProvider) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let workspace = tmp.path().join("workspace");
        std::fs::create_dir_all(&workspace).unwrap();

        let approvals = Arc::new(ApprovalStore::load(tmp.path().join("approvals.json")));
        let policy = Arc::new(PolicyEngine::new(approvals.clone()));
        let mut registry = ToolRegistry::new(policy);
        register_fs_tools(&mut registry, &workspace);
        register_exec_tool(&mut registry, &workspace);

        let hub = Arc::new(EventHub::new());
        let agent = AgentLoop::new(
            Arc::new(provider),
            Arc::new(registry),
            approvals.clone(),
            hub.clone(),
        );
        let sessions = SessionStore::new(tmp.path().join("sessions"));

        Self {
            _tmp: tmp,
            workspace,
            sessions,
            approvals,
            hub,
            agent,
        }
    }

    fn session(&self) -> Session {
        self.sessions.create()
    }
}

#[tokio::test]
async fn no_tool_reply_appends_user_and_assistant() {
    let harness = Harness::new(StubProvider::scripted(vec![reply("hi")]));
    let (_id, mut events) = harness.hub.subscribe();
    let session = harness.session();
    let auth = AuthContext::admin("t");

    let resp = harness.agent.run_turn(&auth, &session, "hello").await.unwrap();

    assert_eq!(resp.reply, "hi");
    assert!(resp.tool_calls.is_empty());
    assert!(resp.pending_approval_id.is_none());

    let log = session.read_all();
    assert_eq!(log.len(), 2);
    assert_eq!((log[0].role, log[0].content.as_str()), (Role::User, "hello"));
    assert_eq!((log[1].role, log[1].content.as_str()), (Role::Assistant, "hi"));

    let envelope: Value = serde_json::from_str(&events.recv().await.unwrap()).unwrap();
    assert_eq!(envelope["event"], "chat.reply");
    assert_eq!(envelope["payload"]["session_id"], session.id());
    assert!(envelope["payload"]["pending_approval_id"].is_null());
}

#[tokio::test]
async fn low_risk_tool_then_reply() {
    let harness = Harness::new(StubProvider::scripted(vec![
        tool_call("c1", "fs.list_dir", json!({"path": "."})),
        reply("done"),
    ]));
    std::fs::write(harness.workspace.join("note.txt"), "x").unwrap();
    let session = harness.session();
    let auth = AuthContext::admin("t");

    let resp = harness
        .agent
        .run_turn(&auth, &session, "what's here?")
        .await
        .unwrap();

    assert_eq!(resp.reply, "done");
    assert_eq!(resp.tool_calls.len(), 1);
    assert_eq!(resp.tool_calls[0].name, "fs.list_dir");

    let log = session.read_all();
    // user, assistant(with calls), tool, assistant(final)
    assert_eq!(log.len(), 4);
    assert_eq!(log[1].role, Role::Assistant);
    assert_eq!(log[1].tool_calls.as_ref().unwrap()[0].id, "c1");
    assert_eq!(log[2].role, Role::Tool);
    assert_eq!(log[2].tool_call_id.as_deref(), Some("c1"));
    assert!(log[2].content.contains("note.txt"));
}

#[tokio::test]
async fn high_risk_tool_suspends_with_pending_approval() {
    let harness = Harness::new(StubProvider::scripted(vec![tool_call(
        "c2",
        "exec.run",
        json!({"command": "ls"}),
    )]));
    let session = harness.session();
    let auth = AuthContext::admin("t");

    let resp = harness.agent.run_turn(&auth, &session, "run ls").await.unwrap();

    let approval_id = resp.pending_approval_id.expect("turn should suspend");
    assert!(resp.reply.starts_with("Approval required:"));

    let pending = harness.approvals.pending();
    assert_eq!(pending.len(), 1);
    let record = &pending[0];
    assert_eq!(record.id, approval_id);
    assert_eq!(record.tool_name, "exec.run");
    assert_eq!(record.tool_arguments["command"], "ls");
    assert_eq!(record.session_id, session.id());
    assert_eq!(record.tool_call_id.as_deref(), Some("c2"));
}

#[tokio::test]
async fn resume_after_allow_consumes_exactly_once() {
    let harness = Harness::new(StubProvider::scripted(vec![
        tool_call("c2", "exec.run", json!({"command": "ls"})),
        reply("ok"),
    ]));
    let session = harness.session();
    let auth = AuthContext::admin("t");

    let suspended = harness.agent.run_turn(&auth, &session, "run ls").await.unwrap();
    let approval_id = suspended.pending_approval_id.unwrap();

    assert!(harness.approvals.resolve(&approval_id, Decision::Allow, "test"));

    let resumed = harness
        .agent
        .resume_turn(&auth, &session, Some(&approval_id))
        .await
        .unwrap();

    assert_eq!(resumed.reply, "ok");
    assert!(resumed.pending_approval_id.is_none());
    assert_eq!(
        harness.approvals.get(&approval_id).unwrap().status,
        ApprovalStatus::Consumed
    );

    let log = session.read_all();
    let tool_msg = log
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("resumed tool result should be in the log");
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some("c2"));
    assert!(tool_msg.content.contains("exit_code"));

    // The consumed approval cannot authorise a second execution.
    let again = harness
        .agent
        .resume_turn(&auth, &session, Some(&approval_id))
        .await
        .unwrap();
    assert_eq!(again.reply, "Invalid or non-allowed approval_id.");
    let log_after = session.read_all();
    assert_eq!(log_after.len(), log.len(), "invalid resume must not advance history");
}

#[tokio::test]
async fn resume_with_unknown_or_denied_approval_is_rejected() {
    let harness = Harness::new(StubProvider::scripted(vec![tool_call(
        "c2",
        "exec.run",
        json!({"command": "ls"}),
    )]));
    let session = harness.session();
    let auth = AuthContext::admin("t");

    let resp = harness
        .agent
        .resume_turn(&auth, &session, Some("no-such-approval"))
        .await
        .unwrap();
    assert_eq!(resp.reply, "Invalid or non-allowed approval_id.");

    let suspended = harness.agent.run_turn(&auth, &session, "run ls").await.unwrap();
    let approval_id = suspended.pending_approval_id.unwrap();
    assert!(harness.approvals.resolve(&approval_id, Decision::Deny, "test"));

    let denied = harness
        .agent
        .resume_turn(&auth, &session, Some(&approval_id))
        .await
        .unwrap();
    assert_eq!(denied.reply, "Invalid or non-allowed approval_id.");
}

#[tokio::test]
async fn approval_for_another_session_is_rejected() {
    let harness = Harness::new(StubProvider::scripted(vec![tool_call(
        "c2",
        "exec.run",
        json!({"command": "ls"}),
    )]));
    let auth = AuthContext::admin("t");

    let session_a = harness.session();
    let suspended = harness.agent.run_turn(&auth, &session_a, "run ls").await.unwrap();
    let approval_id = suspended.pending_approval_id.unwrap();
    assert!(harness.approvals.resolve(&approval_id, Decision::Allow, "test"));

    let session_b = harness.session();
    let resp = harness
        .agent
        .resume_turn(&auth, &session_b, Some(&approval_id))
        .await
        .unwrap();
    assert_eq!(resp.reply, "Invalid or non-allowed approval_id.");
    assert_eq!(
        harness.approvals.get(&approval_id).unwrap().status,
        ApprovalStatus::Allow,
        "a cross-session resume must not consume the approval"
    );
}

#[tokio::test]
async fn missing_write_scope_terminates_without_approval_record() {
    let harness = Harness::new(StubProvider::scripted(vec![tool_call(
        "c3",
        "fs.write",
        json!({"path": "a.txt", "content": "x"}),
    )]));
    let session = harness.session();
    let auth = AuthContext::new("t", [Scope::Read, Scope::Approvals]);

    let resp = harness.agent.run_turn(&auth, &session, "write it").await.unwrap();

    assert!(resp.reply.contains("Missing scope: write"));
    assert!(resp.pending_approval_id.is_none());
    assert!(harness.approvals.pending().is_empty());
    assert!(
        !harness.workspace.join("a.txt").exists(),
        "the handler must never have run"
    );
}

#[tokio::test]
async fn iteration_cap_exhausts_with_25_recorded_calls() {
    let harness = Harness::new(StubProvider::repeating(tool_call(
        "c1",
        "fs.list_dir",
        json!({"path": "."}),
    )));
    let session = harness.session();
    let auth = AuthContext::admin("t");

    let resp = harness.agent.run_turn(&auth, &session, "loop").await.unwrap();

    assert_eq!(resp.reply, "Reached maximum iterations without a final answer.");
    assert_eq!(resp.tool_calls.len(), 25);
    assert!(resp.pending_approval_id.is_none());
    assert!(harness.approvals.pending().is_empty());
}

#[tokio::test]
async fn provider_failure_ends_the_turn_with_error_reply() {
    let harness = Harness::new(StubProvider::scripted(vec![]));
    let session = harness.session();
    let auth = AuthContext::admin("t");

    let resp = harness.agent.run_turn(&auth, &session, "hello").await.unwrap();

    assert!(resp.reply.starts_with("Provider error:"));
    let log = session.read_all();
    assert_eq!(log.last().unwrap().role, Role::Assistant);
    assert_eq!(log.last().unwrap().content, resp.reply);
}

#[tokio::test]
async fn unknown_tool_is_surfaced_to_the_model_not_the_user() {
    let harness = Harness::new(StubProvider::scripted(vec![
        tool_call("c9", "no.such_tool", json!({})),
        reply("recovered"),
    ]));
    let session = harness.session();
    let auth = AuthContext::admin("t");

    let resp = harness.agent.run_turn(&auth, &session, "try it").await.unwrap();

    assert_eq!(resp.reply, "recovered");
    let log = session.read_all();
    let tool_msg = log.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_msg.content.contains("Unknown tool: no.such_tool"));
}

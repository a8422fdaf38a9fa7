// ABOUTME: Approval lifecycle and policy-gating properties through the public API.
// ABOUTME: Exercises the store, the engine, and the registry together.

use std::sync::Arc;

use serde_json::{Map, Value, json};

use deskclaw::policy::{
    ApprovalStatus, ApprovalStore, AuthContext, DEFAULT_APPROVAL_TIMEOUT_MS, Decision,
    PolicyEngine, PolicyError, Scope,
};
use deskclaw::tools::exec::register_exec_tool;
use deskclaw::tools::fs::register_fs_tools;
use deskclaw::tools::registry::ToolRegistry;

fn stack() -> (tempfile::TempDir, Arc<ApprovalStore>, ToolRegistry) {
    let tmp = tempfile::tempdir().unwrap();
    let workspace = tmp.path().join("ws");
    std::fs::create_dir_all(&workspace).unwrap();

    let approvals = Arc::new(ApprovalStore::load(tmp.path().join("approvals.json")));
    let policy = Arc::new(PolicyEngine::new(approvals.clone()));
    let mut registry = ToolRegistry::new(policy);
    register_fs_tools(&mut registry, &workspace);
    register_exec_tool(&mut registry, &workspace);
    (tmp, approvals, registry)
}

fn exec_args() -> Map<String, Value> {
    let mut args = Map::new();
    args.insert("command".to_string(), json!("ls"));
    args
}

#[test]
fn allow_consume_then_consume_again_fails() {
    let (_tmp, approvals, _registry) = stack();
    let a = approvals.create(
        "exec.run",
        exec_args(),
        Some("c1".to_string()),
        "s1",
        "Execute a shell command",
        DEFAULT_APPROVAL_TIMEOUT_MS,
    );

    assert!(approvals.resolve(&a.id, Decision::Allow, "console"));
    assert!(approvals.consume(&a.id));
    assert!(!approvals.consume(&a.id));
    assert_eq!(approvals.get(&a.id).unwrap().status, ApprovalStatus::Consumed);
}

#[test]
fn resolve_is_pending_only_and_expiry_aware() {
    let (_tmp, approvals, _registry) = stack();

    let denied = approvals.create("exec.run", exec_args(), None, "s1", "run", DEFAULT_APPROVAL_TIMEOUT_MS);
    assert!(approvals.resolve(&denied.id, Decision::Deny, "console"));
    assert!(!approvals.resolve(&denied.id, Decision::Allow, "console"));

    let stale = approvals.create("exec.run", exec_args(), None, "s1", "run", -1);
    assert!(!approvals.resolve(&stale.id, Decision::Allow, "console"));
    assert_eq!(approvals.get(&stale.id).unwrap().status, ApprovalStatus::Expired);

    assert!(!approvals.resolve("missing-id", Decision::Allow, "console"));
}

#[test]
fn approvals_survive_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("approvals.json");

    let store = ApprovalStore::load(path.clone());
    let a = store.create("email.send", Map::new(), None, "s1", "Send an email", DEFAULT_APPROVAL_TIMEOUT_MS);
    store.resolve(&a.id, Decision::Allow, "console");

    let reopened = ApprovalStore::load(path);
    assert_eq!(reopened.get(&a.id).unwrap().status, ApprovalStatus::Allow);
    assert!(reopened.consume(&a.id));
}

#[tokio::test]
async fn registry_demands_write_scope_before_approval() {
    let (_tmp, approvals, registry) = stack();
    let read_only = AuthContext::new("t", [Scope::Read, Scope::Approvals]);

    let err = registry
        .invoke(&read_only, "s1", "exec.run", exec_args(), Some("c1"), false)
        .await
        .unwrap_err();
    assert_eq!(err, PolicyError::MissingScope(Scope::Write));
    assert!(approvals.pending().is_empty());
}

#[tokio::test]
async fn registry_parks_pending_approval_for_gated_tool() {
    let (_tmp, approvals, registry) = stack();
    let ctx = AuthContext::admin("t");

    let err = registry
        .invoke(&ctx, "s1", "exec.run", exec_args(), Some("c1"), false)
        .await
        .unwrap_err();

    let PolicyError::ApprovalRequired { approval_id, summary } = err else {
        panic!("expected ApprovalRequired");
    };
    assert_eq!(summary, "Execute a shell command");

    let record = approvals.get(&approval_id).unwrap();
    assert_eq!(record.status, ApprovalStatus::Pending);
    assert_eq!(record.tool_name, "exec.run");
    assert_eq!(record.session_id, "s1");
}

#[tokio::test]
async fn approved_invocation_runs_without_a_new_record() {
    let (_tmp, approvals, registry) = stack();
    let ctx = AuthContext::admin("t");

    let value = registry
        .invoke(&ctx, "s1", "exec.run", exec_args(), Some("c1"), true)
        .await
        .unwrap();
    assert_eq!(value["exit_code"], 0);
    assert!(approvals.pending().is_empty());
}

#[tokio::test]
async fn ungated_tool_needs_no_approval() {
    let (_tmp, approvals, registry) = stack();
    let ctx = AuthContext::new("t", [Scope::Read]);

    let mut args = Map::new();
    args.insert("path".to_string(), json!("."));
    let value = registry
        .invoke(&ctx, "s1", "fs.list_dir", args, Some("c1"), false)
        .await
        .unwrap();
    assert!(value.is_array());
    assert!(approvals.pending().is_empty());
}

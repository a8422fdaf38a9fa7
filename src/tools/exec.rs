// ABOUTME: Shell exec tool — runs a command inside the workspace under a hard timeout.
// ABOUTME: High risk: requires the write scope and a human approval.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::process::Command;

use super::{Tool, ToolError, optional_str, require_str};
use crate::tools::registry::ToolRegistry;
use crate::workspace::resolve_in_workspace;

pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 30;

/// Run a shell command with its working directory confined to the workspace.
/// On timeout the process is killed and a timeout value is returned.
pub struct ExecTool {
    workspace: PathBuf,
    timeout_secs: u64,
}

impl ExecTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self {
            workspace,
            timeout_secs: DEFAULT_EXEC_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec.run"
    }

    fn description(&self) -> &str {
        "Run a shell command (high risk; requires approval)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string"},
                "cwd": {"type": "string", "default": "."},
            },
            "required": ["command"],
            "additionalProperties": false,
        })
    }

    fn requires_write(&self) -> bool {
        true
    }

    fn requires_approval(&self) -> bool {
        true
    }

    fn approval_summary(&self) -> String {
        "Execute a shell command".to_string()
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let command = require_str(&args, "command")?;
        let cwd = optional_str(&args, "cwd", ".");
        let cwd_abs = resolve_in_workspace(&self.workspace, cwd)?;

        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .current_dir(&cwd_abs)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            child.wait_with_output(),
        )
        .await;

        match output {
            Ok(output) => {
                let output = output?;
                Ok(json!({
                    "exit_code": output.status.code(),
                    "stdout": String::from_utf8_lossy(&output.stdout),
                    "stderr": String::from_utf8_lossy(&output.stderr),
                }))
            }
            // kill_on_drop reaps the child once the future is dropped here.
            Err(_) => Err(ToolError::Timeout(self.timeout_secs)),
        }
    }
}

/// Register the exec tool bound to the workspace.
pub fn register_exec_tool(registry: &mut ToolRegistry, workspace: &PathBuf) {
    registry.register(Arc::new(ExecTool::new(workspace.clone())));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(command: &str) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("command".to_string(), json!(command));
        m
    }

    fn workspace() -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let ws = tmp.path().join("ws");
        std::fs::create_dir_all(&ws).unwrap();
        (tmp, ws)
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let (_tmp, ws) = workspace();
        let tool = ExecTool::new(ws);
        let value = tool.execute(args("echo hello")).await.unwrap();
        assert_eq!(value["exit_code"], 0);
        assert_eq!(value["stdout"], "hello\n");
    }

    #[tokio::test]
    async fn nonzero_exit_and_stderr_are_reported() {
        let (_tmp, ws) = workspace();
        let tool = ExecTool::new(ws);
        let value = tool
            .execute(args("echo oops >&2; exit 3"))
            .await
            .unwrap();
        assert_eq!(value["exit_code"], 3);
        assert_eq!(value["stderr"], "oops\n");
    }

    #[tokio::test]
    async fn runs_in_the_workspace_directory() {
        let (_tmp, ws) = workspace();
        let tool = ExecTool::new(ws.clone());
        let value = tool.execute(args("pwd")).await.unwrap();
        let reported = value["stdout"].as_str().unwrap().trim().to_string();
        assert_eq!(
            std::fs::canonicalize(reported).unwrap(),
            std::fs::canonicalize(ws).unwrap()
        );
    }

    #[tokio::test]
    async fn timeout_kills_and_reports() {
        let (_tmp, ws) = workspace();
        let tool = ExecTool::new(ws).with_timeout_secs(1);
        let err = tool.execute(args("sleep 10")).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout(1)));
        assert!(err.to_string().contains("timed out after 1s"));
    }

    #[tokio::test]
    async fn cwd_outside_workspace_is_rejected() {
        let (_tmp, ws) = workspace();
        let tool = ExecTool::new(ws);
        let mut m = args("true");
        m.insert("cwd".to_string(), json!("../"));
        let err = tool.execute(m).await.unwrap_err();
        assert!(matches!(err, ToolError::Workspace(_)));
    }
}

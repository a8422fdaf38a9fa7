// ABOUTME: Filesystem tools — read, write, and list confined to the workspace.
// ABOUTME: Every path goes through the workspace guard before any I/O.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::{Tool, ToolError, optional_str, require_str};
use crate::tools::registry::ToolRegistry;
use crate::workspace::resolve_in_workspace;

/// Read a UTF-8 text file inside the workspace.
pub struct FsReadTool {
    workspace: PathBuf,
}

#[async_trait]
impl Tool for FsReadTool {
    fn name(&self) -> &str {
        "fs.read"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file within the workspace."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"],
            "additionalProperties": false,
        })
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let path = require_str(&args, "path")?;
        let resolved = resolve_in_workspace(&self.workspace, path)?;
        let content = tokio::fs::read_to_string(&resolved).await?;
        Ok(json!(content))
    }
}

/// Write a UTF-8 text file inside the workspace, creating parent directories.
pub struct FsWriteTool {
    workspace: PathBuf,
}

#[async_trait]
impl Tool for FsWriteTool {
    fn name(&self) -> &str {
        "fs.write"
    }

    fn description(&self) -> &str {
        "Write a UTF-8 text file within the workspace."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string"},
            },
            "required": ["path", "content"],
            "additionalProperties": false,
        })
    }

    fn requires_write(&self) -> bool {
        true
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let path = require_str(&args, "path")?;
        let content = require_str(&args, "content")?;
        let resolved = resolve_in_workspace(&self.workspace, path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&resolved, content).await?;
        Ok(json!(format!("Wrote {} bytes to {path}", content.len())))
    }
}

/// List a workspace directory, directories first markers included.
pub struct FsListDirTool {
    workspace: PathBuf,
}

#[async_trait]
impl Tool for FsListDirTool {
    fn name(&self) -> &str {
        "fs.list_dir"
    }

    fn description(&self) -> &str {
        "List a directory within the workspace."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": [],
            "additionalProperties": false,
        })
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let path = optional_str(&args, "path", ".");
        let resolved = resolve_in_workspace(&self.workspace, path)?;
        if !resolved.is_dir() {
            return Err(ToolError::handler(format!("Not a directory: {path}")));
        }
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&resolved).await?;
        while let Some(entry) = dir.next_entry().await? {
            let kind = if entry.file_type().await?.is_dir() {
                "[dir]"
            } else {
                "[file]"
            };
            entries.push(format!("{kind} {}", entry.file_name().to_string_lossy()));
        }
        entries.sort();
        Ok(json!(entries))
    }
}

/// Register the filesystem tool family against a workspace root.
pub fn register_fs_tools(registry: &mut ToolRegistry, workspace: &PathBuf) {
    registry.register(Arc::new(FsReadTool { workspace: workspace.clone() }));
    registry.register(Arc::new(FsWriteTool { workspace: workspace.clone() }));
    registry.register(Arc::new(FsListDirTool { workspace: workspace.clone() }));
}

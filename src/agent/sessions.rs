// ABOUTME: Durable per-session conversation log — one JSONL file per session id.
// ABOUTME: Appends are atomic at the record boundary; reads skip malformed lines.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::{Message, Role, ToolCall};

/// On-disk record: a message plus its append timestamp in milliseconds.
#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    ts: i64,
    role: Role,
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCall>>,
}

/// A single conversation's append-only history.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    path: PathBuf,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Append one message as a self-describing JSONL record.
    pub fn append(&self, msg: &Message) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let record = SessionRecord {
            ts: Utc::now().timestamp_millis(),
            role: msg.role,
            content: msg.content.clone(),
            tool_call_id: msg.tool_call_id.clone(),
            tool_calls: msg.tool_calls.clone(),
        };
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Messages in append order. An unknown session reads as empty; a
    /// truncated or malformed trailing record is silently dropped.
    pub fn read_all(&self) -> Vec<Message> {
        let Ok(raw) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<SessionRecord>(line).ok())
            .map(|rec| Message {
                role: rec.role,
                content: rec.content,
                tool_call_id: rec.tool_call_id,
                tool_calls: rec.tool_calls,
            })
            .collect()
    }
}

/// Hands out sessions under a root directory. Sessions are created lazily:
/// the file appears on first append.
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn create(&self) -> Session {
        self.get(&Uuid::new_v4().to_string())
    }

    pub fn get(&self, session_id: &str) -> Session {
        Session {
            id: session_id.to_string(),
            path: self.root.join(format!("{session_id}.jsonl")),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

// ABOUTME: Audit log — append-only JSONL record of named events with redacted payloads.
// ABOUTME: Sensitive keys are replaced recursively before anything touches disk.

use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use serde_json::{Value, json};

const REDACTED_KEYS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api_key",
    "apikey",
    "credential",
    "auth",
    "authorization",
];

const REDACTED: &str = "**REDACTED**";
const MAX_REDACT_DEPTH: usize = 10;
const DEFAULT_RECENT: usize = 200;

/// Replace every value whose key contains a sensitive term, case-insensitive,
/// at any nesting depth up to the cap. The cap bounds adversarially nested
/// payloads; anything deeper passes through untouched.
pub fn redact(value: &Value) -> Value {
    redact_at(value, 0)
}

fn redact_at(value: &Value, depth: usize) -> Value {
    if depth > MAX_REDACT_DEPTH {
        return value.clone();
    }
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                let lowered = k.to_lowercase();
                if REDACTED_KEYS.iter().any(|term| lowered.contains(term)) {
                    out.insert(k.clone(), json!(REDACTED));
                } else {
                    out.insert(k.clone(), redact_at(v, depth + 1));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| redact_at(v, depth + 1)).collect())
        }
        other => other.clone(),
    }
}

/// Append-only audit sink, read from the tail.
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Record one named event. The payload is redacted before serialisation;
    /// write failures are logged and swallowed so auditing never takes down a
    /// turn.
    pub fn log(&self, event: &str, payload: Value) {
        let record = json!({
            "ts": Utc::now().timestamp_millis(),
            "event": event,
            "payload": redact(&payload),
        });
        if let Err(e) = self.append_line(&record.to_string()) {
            tracing::error!("failed to write audit record to {}: {e}", self.path.display());
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// The last `n` decoded records in file order; malformed lines are
    /// skipped.
    pub fn recent(&self, n: Option<usize>) -> Vec<Value> {
        let limit = n.unwrap_or(DEFAULT_RECENT);
        let Ok(raw) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(limit);
        lines[start..]
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

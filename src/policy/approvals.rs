// ABOUTME: Durable approval store — pending requests for high-risk tool calls.
// ABOUTME: Whole-file JSON snapshot on every mutation; approvals are single-use.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Default lifetime of a pending approval before it expires.
pub const DEFAULT_APPROVAL_TIMEOUT_MS: i64 = 5 * 60 * 1000;

/// Lifecycle state of an approval record.
///
/// `Pending` may become `Allow`, `Deny`, or `Expired`; `Allow` may become
/// `Consumed` exactly once. Every other status is a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Allow,
    Deny,
    Expired,
    Consumed,
}

/// The human's verdict on a pending approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

/// A persisted authorisation for exactly one future execution of a specific
/// tool with specific arguments in a specific session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub id: String,
    pub session_id: String,
    pub tool_name: String,
    pub tool_arguments: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub summary: String,
    pub created_ms: i64,
    pub expires_ms: i64,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_ms: Option<i64>,
}

/// Persistent map of approvals keyed by id.
///
/// All mutations happen under the internal mutex and rewrite the snapshot
/// file before returning.
pub struct ApprovalStore {
    path: PathBuf,
    inner: Mutex<HashMap<String, Approval>>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl ApprovalStore {
    /// Load the store from disk. A missing or malformed snapshot resets to
    /// an empty store.
    pub fn load(path: PathBuf) -> Self {
        let mut map = HashMap::new();
        if let Ok(raw) = std::fs::read_to_string(&path) {
            match serde_json::from_str::<Vec<Approval>>(&raw) {
                Ok(records) => {
                    for a in records {
                        map.insert(a.id.clone(), a);
                    }
                }
                Err(e) => {
                    tracing::warn!("discarding malformed approvals file {}: {e}", path.display());
                }
            }
        }
        Self {
            path,
            inner: Mutex::new(map),
        }
    }

    /// Create a pending approval and persist it synchronously.
    pub fn create(
        &self,
        tool_name: &str,
        tool_arguments: Map<String, Value>,
        tool_call_id: Option<String>,
        session_id: &str,
        summary: &str,
        timeout_ms: i64,
    ) -> Approval {
        let now = now_ms();
        let approval = Approval {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            tool_name: tool_name.to_string(),
            tool_arguments,
            tool_call_id,
            summary: summary.to_string(),
            created_ms: now,
            expires_ms: now + timeout_ms,
            status: ApprovalStatus::Pending,
            resolved_by: None,
            resolved_ms: None,
        };
        let mut inner = self.lock();
        inner.insert(approval.id.clone(), approval.clone());
        self.save(&inner);
        approval
    }

    /// All still-pending approvals. Records found pending past their expiry
    /// are transitioned to `Expired` and persisted as a side effect.
    pub fn pending(&self) -> Vec<Approval> {
        let now = now_ms();
        let mut inner = self.lock();
        let mut expired_any = false;
        let mut out = Vec::new();
        for a in inner.values_mut() {
            if a.status != ApprovalStatus::Pending {
                continue;
            }
            if now <= a.expires_ms {
                out.push(a.clone());
            } else {
                a.status = ApprovalStatus::Expired;
                expired_any = true;
            }
        }
        if expired_any {
            self.save(&inner);
        }
        out.sort_by_key(|a| a.created_ms);
        out
    }

    pub fn get(&self, id: &str) -> Option<Approval> {
        self.lock().get(id).cloned()
    }

    /// Record a human decision. Returns false without change if the record is
    /// absent or no longer pending; a pending record past expiry transitions
    /// to `Expired` instead.
    pub fn resolve(&self, id: &str, decision: Decision, resolved_by: &str) -> bool {
        let mut inner = self.lock();
        let Some(a) = inner.get_mut(id) else {
            return false;
        };
        if a.status != ApprovalStatus::Pending {
            return false;
        }
        let now = now_ms();
        if now > a.expires_ms {
            a.status = ApprovalStatus::Expired;
            self.save(&inner);
            return false;
        }
        a.status = match decision {
            Decision::Allow => ApprovalStatus::Allow,
            Decision::Deny => ApprovalStatus::Deny,
        };
        a.resolved_by = Some(resolved_by.to_string());
        a.resolved_ms = Some(now);
        self.save(&inner);
        true
    }

    /// Mark an allowed approval as used. Succeeds exactly once per record;
    /// anything other than `Allow` (including a prior consume) returns false.
    pub fn consume(&self, id: &str) -> bool {
        let mut inner = self.lock();
        let Some(a) = inner.get_mut(id) else {
            return false;
        };
        if a.status != ApprovalStatus::Allow {
            return false;
        }
        a.status = ApprovalStatus::Consumed;
        self.save(&inner);
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Approval>> {
        self.inner.lock().expect("approvals lock poisoned")
    }

    fn save(&self, inner: &HashMap<String, Approval>) {
        let mut records: Vec<&Approval> = inner.values().collect();
        records.sort_by_key(|a| a.created_ms);
        if let Err(e) = self.write_snapshot(&records) {
            tracing::error!("failed to persist approvals to {}: {e}", self.path.display());
        }
    }

    fn write_snapshot(&self, records: &[&Approval]) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(records)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

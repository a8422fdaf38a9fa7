// ABOUTME: Policy engine — scope enforcement and approval interception.
// ABOUTME: ApprovalRequired is a control-flow signal, not a crash.

use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use super::approvals::{ApprovalStore, DEFAULT_APPROVAL_TIMEOUT_MS};
use super::scopes::{AuthContext, Scope};

/// Typed outcomes the registry and executor switch on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// The caller's auth context lacks a required scope. Terminates the turn.
    #[error("Missing scope: {0}")]
    MissingScope(Scope),

    /// A pending approval was created; the turn suspends until a human
    /// resolves it.
    #[error("Approval required: {summary}")]
    ApprovalRequired { approval_id: String, summary: String },
}

/// Wraps the approval store with the scope and approval checks every tool
/// invocation passes through.
pub struct PolicyEngine {
    approvals: Arc<ApprovalStore>,
    approval_timeout_ms: i64,
}

impl PolicyEngine {
    pub fn new(approvals: Arc<ApprovalStore>) -> Self {
        Self {
            approvals,
            approval_timeout_ms: DEFAULT_APPROVAL_TIMEOUT_MS,
        }
    }

    pub fn with_approval_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.approval_timeout_ms = timeout_ms;
        self
    }

    pub fn require_scope(&self, ctx: &AuthContext, scope: Scope) -> Result<(), PolicyError> {
        if ctx.has(scope) {
            Ok(())
        } else {
            Err(PolicyError::MissingScope(scope))
        }
    }

    pub fn enforce_write_scope(&self, ctx: &AuthContext) -> Result<(), PolicyError> {
        self.require_scope(ctx, Scope::Write)
    }

    /// When `require` is set, demand the approvals scope and park a pending
    /// approval record, surfacing `ApprovalRequired` to suspend the turn.
    ///
    /// The scope check runs first so an unauthorised caller never leaves a
    /// dangling pending record behind.
    #[allow(clippy::too_many_arguments)]
    pub fn maybe_require_approval(
        &self,
        ctx: &AuthContext,
        session_id: &str,
        tool_name: &str,
        tool_args: &Map<String, Value>,
        summary: &str,
        require: bool,
        tool_call_id: Option<&str>,
    ) -> Result<(), PolicyError> {
        if !require {
            return Ok(());
        }
        self.require_scope(ctx, Scope::Approvals)?;
        let approval = self.approvals.create(
            tool_name,
            tool_args.clone(),
            tool_call_id.map(str::to_string),
            session_id,
            summary,
            self.approval_timeout_ms,
        );
        Err(PolicyError::ApprovalRequired {
            approval_id: approval.id,
            summary: summary.to_string(),
        })
    }
}

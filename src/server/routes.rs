// ABOUTME: Control-plane route handlers — thin wrappers over the core components.
// ABOUTME: Turns are serialised per session id before the executor runs.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{Value, json};

use super::SharedState;
use crate::agent::ToolCall;
use crate::policy::{AuthContext, Decision, Scope};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContinueRequest {
    pub session_id: String,
    #[serde(default)]
    pub approval_id: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct ChatResponseBody {
    pub reply: String,
    pub session_id: String,
    pub tool_calls: Vec<ToolCall>,
    pub pending_approval_id: Option<String>,
}

pub async fn health(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "host": state.settings.host,
        "port": state.settings.port,
        "workspace_dir": state.settings.workspace_dir.display().to_string(),
    }))
}

pub async fn chat(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponseBody>, StatusCode> {
    let session = match req.session_id.as_deref() {
        Some(id) => state.sessions.get(id),
        None => state.sessions.create(),
    };

    let lock = state.session_lock(session.id());
    let _turn = lock.lock().await;

    let resp = state
        .agent
        .run_turn(&auth, &session, &req.message)
        .await
        .map_err(|e| {
            tracing::error!("chat turn failed for session {}: {e}", session.id());
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    state.audit.log(
        "chat.turn",
        json!({
            "session_id": session.id(),
            "pending": resp.pending_approval_id.is_some(),
        }),
    );

    Ok(Json(ChatResponseBody {
        reply: resp.reply,
        session_id: session.id().to_string(),
        tool_calls: resp.tool_calls,
        pending_approval_id: resp.pending_approval_id,
    }))
}

pub async fn chat_continue(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<ContinueRequest>,
) -> Result<Json<ChatResponseBody>, StatusCode> {
    let session = state.sessions.get(&req.session_id);

    let lock = state.session_lock(session.id());
    let _turn = lock.lock().await;

    let resp = state
        .agent
        .resume_turn(&auth, &session, req.approval_id.as_deref())
        .await
        .map_err(|e| {
            tracing::error!("chat continue failed for session {}: {e}", session.id());
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    state.audit.log(
        "chat.continue",
        json!({
            "session_id": session.id(),
            "approval_id": req.approval_id,
            "pending": resp.pending_approval_id.is_some(),
        }),
    );

    Ok(Json(ChatResponseBody {
        reply: resp.reply,
        session_id: session.id().to_string(),
        tool_calls: resp.tool_calls,
        pending_approval_id: resp.pending_approval_id,
    }))
}

pub async fn approvals_pending(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthContext>,
) -> Json<Value> {
    if !auth.has(Scope::Approvals) {
        return Json(json!({"error": "Missing scope: approvals"}));
    }
    Json(json!({"pending": state.approvals.pending()}))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub decision: Decision,
}

pub async fn approvals_resolve(
    State(state): State<SharedState>,
    Path(approval_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<ResolveRequest>,
) -> Json<Value> {
    if !auth.has(Scope::Approvals) {
        return Json(json!({"error": "Missing scope: approvals"}));
    }
    let ok = state.approvals.resolve(&approval_id, req.decision, "console");
    if ok {
        state.hub.broadcast(
            "approval.resolved",
            json!({"id": approval_id, "decision": req.decision}),
        );
        state.audit.log(
            "approval.resolved",
            json!({"id": approval_id, "decision": req.decision}),
        );
    }
    Json(json!({"ok": ok}))
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    #[serde(default)]
    pub n: Option<usize>,
}

pub async fn audit_recent(
    State(state): State<SharedState>,
    Query(query): Query<RecentQuery>,
) -> Json<Value> {
    Json(json!({"entries": state.audit.recent(query.n)}))
}

pub async fn config_get(State(state): State<SharedState>) -> Json<Value> {
    Json(serde_json::to_value(state.config.get()).unwrap_or_else(|_| json!({})))
}

#[derive(Debug, Deserialize)]
pub struct UpdateConfigRequest {
    pub path: String,
    pub value: Value,
}

pub async fn config_update(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<UpdateConfigRequest>,
) -> Json<Value> {
    if !auth.has(Scope::Write) {
        return Json(json!({"error": "Missing scope: write"}));
    }
    match state.config.update_path(&req.path, req.value) {
        Ok(()) => Json(json!({"ok": true})),
        Err(e) => Json(json!({"error": e.to_string()})),
    }
}

#[derive(Debug, Deserialize)]
pub struct SetSecretRequest {
    pub key: String,
    pub value: String,
}

pub async fn secrets_set(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<SetSecretRequest>,
) -> Json<Value> {
    if !auth.has(Scope::Admin) {
        return Json(json!({"error": "Missing scope: admin"}));
    }
    state.secrets.set(&req.key, &req.value);
    state.audit.log("secret.set", json!({"key": req.key}));
    Json(json!({"ok": true}))
}

#[derive(Debug, Deserialize)]
pub struct ModelsQuery {
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Relay the backend's model listing so clients can offer a picker.
pub async fn models_available(
    State(state): State<SharedState>,
    Query(query): Query<ModelsQuery>,
) -> Json<Value> {
    let base_url = query
        .base_url
        .unwrap_or_else(|| state.config.get().model.base_url);
    if base_url.is_empty() {
        return Json(json!({"models": [], "error": "No base_url configured"}));
    }

    let endpoint = format!("{}/models", base_url.trim_end_matches('/'));
    let fetch = async {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        let resp = client.get(&endpoint).send().await?.error_for_status()?;
        resp.json::<Value>().await
    };
    match fetch.await {
        Ok(data) => {
            let models = data.get("data").cloned().unwrap_or_else(|| json!([]));
            Json(json!({"models": models, "base_url": base_url}))
        }
        Err(e) => Json(json!({"models": [], "base_url": base_url, "error": e.to_string()})),
    }
}

// ABOUTME: Server module — composes AppState and serves the loopback control plane.
// ABOUTME: Registry and provider are wired once at startup; config edits need a restart.

pub mod auth;
pub mod routes;
pub mod ws;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;

use crate::agent::{AgentLoop, OpenAiCompatProvider, Provider, SessionStore};
use crate::audit::AuditLog;
use crate::config::{AppConfig, ConfigStore, Settings};
use crate::events::EventHub;
use crate::policy::{ApprovalStore, PolicyEngine};
use crate::secrets::SecretsStore;
use crate::tools::email::{EmailAccount, EmailTransport, SmtpImapTransport, register_email_tools};
use crate::tools::exec::register_exec_tool;
use crate::tools::fs::register_fs_tools;
use crate::tools::registry::ToolRegistry;
use crate::tools::web::register_web_tools;

/// Everything a request handler can reach. Composed once at startup and
/// passed explicitly; there are no process-wide singletons.
pub struct AppState {
    pub settings: Settings,
    pub config: ConfigStore,
    pub secrets: SecretsStore,
    pub approvals: Arc<ApprovalStore>,
    pub sessions: SessionStore,
    pub agent: AgentLoop,
    pub hub: Arc<EventHub>,
    pub audit: AuditLog,
    session_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Per-session turn mutex. Concurrent requests against the same session
    /// id queue here; the core assumes a single writer per session.
    pub fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.session_locks.lock().expect("session locks poisoned");
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

fn build_registry(
    settings: &Settings,
    config: &AppConfig,
    secrets: &SecretsStore,
    policy: Arc<PolicyEngine>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new(policy);
    register_fs_tools(&mut registry, &settings.workspace_dir);
    register_exec_tool(&mut registry, &settings.workspace_dir);
    register_web_tools(&mut registry);

    let transport: Option<Arc<dyn EmailTransport>> = if config.email.enabled {
        let password = secrets.get(&config.email.password_secret).unwrap_or_default();
        Some(Arc::new(SmtpImapTransport::new(EmailAccount {
            username: config.email.username.clone(),
            password,
            imap_host: config.email.imap_host.clone(),
            imap_port: config.email.imap_port,
            smtp_host: config.email.smtp_host.clone(),
            smtp_port: config.email.smtp_port,
            smtp_from: config.email.smtp_from.clone(),
        })))
    } else {
        None
    };
    register_email_tools(&mut registry, transport, config.email.consent_granted);
    registry
}

/// Compose the daemon: directories, token, stores, tools, provider, executor.
pub fn build_state(settings: Settings) -> anyhow::Result<SharedState> {
    std::fs::create_dir_all(&settings.data_dir)
        .with_context(|| format!("creating {}", settings.data_dir.display()))?;
    std::fs::create_dir_all(&settings.workspace_dir)
        .with_context(|| format!("creating {}", settings.workspace_dir.display()))?;

    if settings.host != "127.0.0.1" {
        tracing::warn!(
            "daemon is binding to {} -- this exposes the control plane to the network; \
             loopback-only (127.0.0.1) is strongly recommended",
            settings.host
        );
    }

    let secrets = SecretsStore::new("deskclaw", settings.secrets_path());
    auth::ensure_auth_token(&settings, &secrets)?;

    let config = ConfigStore::load(settings.config_path())?;
    let cfg = config.get();

    let approvals = Arc::new(ApprovalStore::load(settings.approvals_path()));
    let policy = Arc::new(PolicyEngine::new(approvals.clone()));
    let hub = Arc::new(EventHub::new());
    let audit = AuditLog::new(settings.audit_path());
    let sessions = SessionStore::new(settings.sessions_dir());

    let registry = build_registry(&settings, &cfg, &secrets, policy);

    let api_key = secrets.get(&cfg.model.api_key_secret).unwrap_or_default();
    let provider: Arc<dyn Provider> = Arc::new(OpenAiCompatProvider::new(
        &cfg.model.base_url,
        &api_key,
        &cfg.model.model,
    ));

    let agent = AgentLoop::new(provider, Arc::new(registry), approvals.clone(), hub.clone())
        .with_max_iterations(cfg.max_iterations);

    Ok(Arc::new(AppState {
        settings,
        config,
        secrets,
        approvals,
        sessions,
        agent,
        hub,
        audit,
        session_locks: Mutex::new(HashMap::new()),
    }))
}

/// The control-plane router: health and the WS channel are public (the WS
/// handler checks the token itself); everything else sits behind the bearer
/// middleware.
pub fn router(state: SharedState) -> Router {
    let protected = Router::new()
        .route("/chat", post(routes::chat))
        .route("/chat/continue", post(routes::chat_continue))
        .route("/approvals/pending", get(routes::approvals_pending))
        .route("/approvals/{id}/resolve", post(routes::approvals_resolve))
        .route("/audit/recent", get(routes::audit_recent))
        .route("/config", get(routes::config_get).post(routes::config_update))
        .route("/secrets", post(routes::secrets_set))
        .route("/models/available", get(routes::models_available))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .with_state(state.clone());

    let public = Router::new()
        .route("/health", get(routes::health))
        .route("/ws", get(ws::ws_handler))
        .with_state(state);

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(CorsLayer::permissive())
}

/// Bind and serve until shutdown.
pub async fn serve(state: SharedState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.settings.host, state.settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("deskclaw daemon listening on {addr}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

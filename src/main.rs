// ABOUTME: Entry point for dclaw — onboarding, doctor checks, and the daemon itself.
// ABOUTME: Parses CLI args, loads .env and settings, and dispatches subcommands.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde_json::Value;

use deskclaw::config::{ConfigStore, Settings};
use deskclaw::secrets::SecretsStore;
use deskclaw::server::auth::ensure_auth_token;
use deskclaw::server::{build_state, serve};

#[derive(Parser)]
#[command(name = "dclaw", about = "Local-first personal AI agent daemon.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// First-time setup: create dirs, generate the auth token, write defaults.
    Onboard,
    /// Launch the loopback control-plane daemon.
    Start {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Check config, interface binding, secrets, and file permissions.
    Doctor,
    /// Send a message to the running daemon and print the reply.
    Chat {
        #[arg(short, long)]
        message: String,
        #[arg(long)]
        session: Option<String>,
    },
    /// Config operations.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Secret operations.
    #[command(subcommand)]
    Secret(SecretCommand),
    /// Print the current version.
    Version,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the current config as JSON.
    Get,
    /// Set a config value by dotted path (e.g. model.base_url).
    Set { path: String, value: String },
}

#[derive(Subcommand)]
enum SecretCommand {
    /// Store a secret in the OS keychain (or fallback file).
    Set { key: String, value: String },
    /// Remove a secret from the OS keychain (or fallback file).
    Delete { key: String },
}

fn open_stores(settings: &Settings) -> anyhow::Result<(ConfigStore, SecretsStore)> {
    std::fs::create_dir_all(&settings.data_dir)?;
    std::fs::create_dir_all(&settings.workspace_dir)?;
    let secrets = SecretsStore::new("deskclaw", settings.secrets_path());
    ensure_auth_token(settings, &secrets)?;
    let config = ConfigStore::load(settings.config_path())?;
    Ok((config, secrets))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let settings = Settings::from_env();

    match cli.command {
        Command::Onboard => {
            open_stores(&settings)?;
            println!("Workspace: {}", settings.workspace_dir.display());
            println!("Config: {}", settings.config_path().display());
            println!("Token file: {}", settings.token_path().display());
        }
        Command::Start { host, port } => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "info".into()),
                )
                .init();
            let mut settings = settings;
            if let Some(host) = host {
                settings.host = host;
            }
            if let Some(port) = port {
                settings.port = port;
            }
            let state = build_state(settings)?;
            serve(state).await?;
        }
        Command::Doctor => {
            run_doctor(&settings)?;
        }
        Command::Chat { message, session } => {
            let token = std::fs::read_to_string(settings.token_path())
                .context("auth token file missing; run `dclaw onboard` first")?
                .trim()
                .to_string();
            let mut body = serde_json::json!({"message": message});
            if let Some(session) = session {
                body["session_id"] = serde_json::json!(session);
            }
            let resp = reqwest::Client::new()
                .post(format!("http://127.0.0.1:{}/chat", settings.port))
                .bearer_auth(token)
                .json(&body)
                .timeout(std::time::Duration::from_secs(120))
                .send()
                .await
                .context("is the daemon running? try `dclaw start`")?
                .error_for_status()?
                .json::<Value>()
                .await?;
            println!("{}", resp["reply"].as_str().unwrap_or_default());
            if let Some(pending) = resp["pending_approval_id"].as_str() {
                println!("(pending approval: {pending})");
            }
        }
        Command::Config(cmd) => {
            let (config, _secrets) = open_stores(&settings)?;
            match cmd {
                ConfigCommand::Get => {
                    println!("{}", serde_json::to_string_pretty(&config.get())?);
                }
                ConfigCommand::Set { path, value } => {
                    let parsed: Value =
                        serde_json::from_str(&value).unwrap_or(Value::String(value));
                    config.update_path(&path, parsed)?;
                    println!("ok");
                }
            }
        }
        Command::Secret(cmd) => {
            let secrets = SecretsStore::new("deskclaw", settings.secrets_path());
            match cmd {
                SecretCommand::Set { key, value } => {
                    secrets.set(&key, &value);
                    println!("ok");
                }
                SecretCommand::Delete { key } => {
                    secrets.delete(&key);
                    println!("ok");
                }
            }
        }
        Command::Version => {
            println!("deskclaw {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn run_doctor(settings: &Settings) -> anyhow::Result<()> {
    let mut issues: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    if settings.host != "127.0.0.1" {
        issues.push(format!(
            "Control plane binds to {} -- this exposes the daemon to the network. \
             Use 127.0.0.1 unless you understand the risks.",
            settings.host
        ));
    }

    if !settings.workspace_dir.is_dir() {
        issues.push(format!(
            "Workspace directory missing: {}",
            settings.workspace_dir.display()
        ));
    }

    let token_path = settings.token_path();
    if token_path.exists() {
        check_owner_only(&token_path, &mut warnings);
    } else {
        issues.push(format!("Auth token file missing: {}", token_path.display()));
    }

    let secrets = SecretsStore::new("deskclaw", settings.secrets_path());
    if secrets.fallback_path().exists() {
        check_owner_only(secrets.fallback_path(), &mut warnings);
    }
    if secrets.keychain_available() {
        println!("[ok] OS keychain backend available");
    } else {
        warnings.push(
            "OS keychain backend unavailable -- secrets will use fallback file storage".to_string(),
        );
    }

    for w in &warnings {
        println!("[warn] {w}");
    }
    for i in &issues {
        println!("[FAIL] {i}");
    }
    if !issues.is_empty() {
        std::process::exit(1);
    }
    if warnings.is_empty() {
        println!("All checks passed.");
    }
    Ok(())
}

#[cfg(unix)]
fn check_owner_only(path: &std::path::Path, warnings: &mut Vec<String>) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = std::fs::metadata(path) {
        if meta.permissions().mode() & 0o077 != 0 {
            warnings.push(format!(
                "{} is readable by group/others. Run: chmod 600 {}",
                path.display(),
                path.display()
            ));
        }
    }
}

#[cfg(not(unix))]
fn check_owner_only(_path: &std::path::Path, _warnings: &mut Vec<String>) {}

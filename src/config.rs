// ABOUTME: Settings and configuration for the deskclaw daemon.
// ABOUTME: Env-driven runtime settings plus a TOML config snapshot with dotted-path edits.

use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const APP_NAME: &str = "deskclaw";
const ENV_PREFIX: &str = "DESKCLAW_";

pub const DEFAULT_PORT: u16 = 18791;

/// Runtime settings resolved from the environment at process start.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub workspace_dir: PathBuf,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .filter(|v| !v.is_empty())
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: home_dir().join(format!(".{APP_NAME}")),
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            workspace_dir: home_dir().join(format!("{APP_NAME}-workspace")),
        }
    }
}

impl Settings {
    /// Resolve settings from `DESKCLAW_`-prefixed environment variables,
    /// falling back to home-relative defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: env_var("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            host: env_var("HOST").unwrap_or(defaults.host),
            port: env_var("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            workspace_dir: env_var("WORKSPACE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_dir),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    pub fn approvals_path(&self) -> PathBuf {
        self.data_dir.join("approvals.json")
    }

    pub fn audit_path(&self) -> PathBuf {
        self.data_dir.join("audit.log")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.data_dir.join("secrets.json")
    }

    pub fn token_path(&self) -> PathBuf {
        self.data_dir.join("auth_token.txt")
    }
}

/// Model backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    /// Secrets-facade key holding the backend API key.
    pub api_key_secret: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".to_string(),
            model: String::new(),
            api_key_secret: "model.api_key".to_string(),
        }
    }
}

/// Email connector configuration. Disabled by default; the tools also demand
/// an explicit consent flag before touching a mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,
    pub consent_granted: bool,
    pub username: String,
    pub password_secret: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_from: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            consent_granted: false,
            username: String::new(),
            password_secret: "email.password".to_string(),
            imap_host: String::new(),
            imap_port: 993,
            smtp_host: String::new(),
            smtp_port: 587,
            smtp_from: String::new(),
        }
    }
}

/// Durable application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub onboarded: bool,
    pub model: ModelConfig,
    pub email: EmailConfig,
    pub max_iterations: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            onboarded: false,
            model: ModelConfig::default(),
            email: EmailConfig::default(),
            max_iterations: 25,
        }
    }
}

/// Owns the on-disk TOML snapshot of [`AppConfig`].
pub struct ConfigStore {
    path: PathBuf,
    config: RwLock<AppConfig>,
}

impl ConfigStore {
    /// Load the snapshot, writing defaults when none exists yet. A malformed
    /// file is an error: silently resetting would drop operator edits.
    pub fn load(path: PathBuf) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        } else {
            AppConfig::default()
        };
        let store = Self {
            path,
            config: RwLock::new(config),
        };
        store.save()?;
        Ok(store)
    }

    pub fn get(&self) -> AppConfig {
        self.config.read().expect("config lock poisoned").clone()
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config = self.get();
        let toml = toml::to_string_pretty(&config)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, toml)
            .with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }

    /// Set one field by dotted path (e.g. `model.base_url`), validate the
    /// result against the schema, and rewrite the snapshot.
    pub fn update_path(&self, dotted: &str, value: Value) -> anyhow::Result<()> {
        let parts: Vec<&str> = dotted.split('.').filter(|p| !p.is_empty()).collect();
        let Some((last, parents)) = parts.split_last() else {
            anyhow::bail!("empty config path");
        };

        let mut root = serde_json::to_value(self.get())?;
        let mut cursor = &mut root;
        for part in parents {
            cursor = cursor
                .get_mut(*part)
                .ok_or_else(|| anyhow::anyhow!("unknown config path: {dotted}"))?;
        }
        let Value::Object(map) = cursor else {
            anyhow::bail!("config path {dotted} does not address a field");
        };
        if !map.contains_key(*last) {
            anyhow::bail!("unknown config path: {dotted}");
        }
        map.insert((*last).to_string(), value);

        let updated: AppConfig = serde_json::from_value(root)
            .with_context(|| format!("invalid value for {dotted}"))?;
        *self.config.write().expect("config lock poisoned") = updated;
        self.save()
    }
}

// ABOUTME: Secrets facade — OS keychain first, 0600 JSON fallback file second.
// ABOUTME: Keychain failures degrade silently to the fallback so headless hosts still work.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use keyring::Entry;

/// Key-value secret storage used for the auth token, provider API keys, and
/// connector passwords.
pub struct SecretsStore {
    service: String,
    fallback_path: PathBuf,
    use_keychain: AtomicBool,
}

impl SecretsStore {
    pub fn new(service: impl Into<String>, fallback_path: PathBuf) -> Self {
        Self {
            service: service.into(),
            fallback_path,
            use_keychain: AtomicBool::new(true),
        }
    }

    /// Disable the keychain, forcing all operations onto the fallback file.
    pub fn set_use_keychain(&self, enabled: bool) {
        self.use_keychain.store(enabled, Ordering::Relaxed);
    }

    pub fn fallback_path(&self) -> &PathBuf {
        &self.fallback_path
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if self.keychain_enabled() {
            if let Ok(entry) = Entry::new(&self.service, key) {
                if let Ok(value) = entry.get_password() {
                    if !value.is_empty() {
                        return Some(value);
                    }
                }
            }
        }
        self.fallback_load().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: &str) {
        if self.keychain_enabled() {
            if let Ok(entry) = Entry::new(&self.service, key) {
                if entry.set_password(value).is_ok() {
                    return;
                }
            }
            tracing::debug!("keychain set failed for {key}; using fallback file");
        }
        let mut data = self.fallback_load();
        data.insert(key.to_string(), value.to_string());
        self.fallback_save(&data);
    }

    pub fn delete(&self, key: &str) {
        if self.keychain_enabled() {
            if let Ok(entry) = Entry::new(&self.service, key) {
                if entry.delete_credential().is_ok() {
                    return;
                }
            }
        }
        let mut data = self.fallback_load();
        if data.remove(key).is_some() {
            self.fallback_save(&data);
        }
    }

    /// Whether the OS keychain backend answers at all.
    pub fn keychain_available(&self) -> bool {
        if !self.keychain_enabled() {
            return false;
        }
        match Entry::new(&self.service, "__probe__") {
            Ok(entry) => !matches!(entry.get_password(), Err(keyring::Error::PlatformFailure(_))),
            Err(_) => false,
        }
    }

    fn keychain_enabled(&self) -> bool {
        self.use_keychain.load(Ordering::Relaxed)
    }

    fn fallback_load(&self) -> BTreeMap<String, String> {
        let Ok(raw) = std::fs::read_to_string(&self.fallback_path) else {
            return BTreeMap::new();
        };
        serde_json::from_str(&raw).unwrap_or_default()
    }

    fn fallback_save(&self, data: &BTreeMap<String, String>) {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.fallback_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string());
            std::fs::write(&self.fallback_path, json)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(
                    &self.fallback_path,
                    std::fs::Permissions::from_mode(0o600),
                )?;
            }
            Ok(())
        };
        if let Err(e) = write() {
            tracing::error!(
                "failed to persist secrets fallback {}: {e}",
                self.fallback_path.display()
            );
        }
    }
}

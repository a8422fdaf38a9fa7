// ABOUTME: Bearer-token issuance and the auth middleware guarding the control plane.
// ABOUTME: One token, minted at first run, 0600 on disk, mirrored into the secrets facade.

use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use super::SharedState;
use crate::config::Settings;
use crate::policy::AuthContext;
use crate::secrets::SecretsStore;

pub const AUTH_TOKEN_KEY: &str = "auth.token";

/// Return the control-plane bearer token, creating it on first run.
///
/// Lookup order: secrets facade, then the token file (migrating it into the
/// facade), then a freshly generated token written to both.
pub fn ensure_auth_token(settings: &Settings, secrets: &SecretsStore) -> anyhow::Result<String> {
    if let Some(token) = secrets.get(AUTH_TOKEN_KEY) {
        return Ok(token);
    }

    let path = settings.token_path();
    if path.exists() {
        let token = std::fs::read_to_string(&path)?.trim().to_string();
        if !token.is_empty() {
            secrets.set(AUTH_TOKEN_KEY, &token);
            return Ok(token);
        }
    }

    let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    std::fs::create_dir_all(&settings.data_dir)?;
    std::fs::write(&path, &token)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }
    secrets.set(AUTH_TOKEN_KEY, &token);
    tracing::info!("auth token written to {}", path.display());
    Ok(token)
}

/// Validate `Authorization: Bearer <token>` and stash the caller's
/// [`AuthContext`] (full console scopes) for handlers.
pub async fn auth_middleware(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let expected = state.secrets.get(AUTH_TOKEN_KEY).unwrap_or_default();
    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    match provided {
        Some(token) if !expected.is_empty() && token == expected => {
            request.extensions_mut().insert(AuthContext::admin(token));
            Ok(next.run(request).await)
        }
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_in(dir: &std::path::Path) -> Settings {
        Settings {
            data_dir: dir.to_path_buf(),
            host: "127.0.0.1".to_string(),
            port: 0,
            workspace_dir: dir.join("ws"),
        }
    }

    #[test]
    fn token_is_created_once_and_stable() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings_in(tmp.path());
        let secrets = SecretsStore::new("deskclaw-test", settings.secrets_path());
        secrets.set_use_keychain(false);

        let first = ensure_auth_token(&settings, &secrets).unwrap();
        let second = ensure_auth_token(&settings, &secrets).unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
        assert!(settings.token_path().exists());
    }

    #[test]
    fn existing_token_file_is_migrated_into_secrets() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings_in(tmp.path());
        std::fs::create_dir_all(&settings.data_dir).unwrap();
        std::fs::write(settings.token_path(), "legacy-token\n").unwrap();

        let secrets = SecretsStore::new("deskclaw-test", settings.secrets_path());
        secrets.set_use_keychain(false);

        let token = ensure_auth_token(&settings, &secrets).unwrap();
        assert_eq!(token, "legacy-token");
        assert_eq!(secrets.get(AUTH_TOKEN_KEY).as_deref(), Some("legacy-token"));
    }

    #[cfg(unix)]
    #[test]
    fn token_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings_in(tmp.path());
        let secrets = SecretsStore::new("deskclaw-test", settings.secrets_path());
        secrets.set_use_keychain(false);

        ensure_auth_token(&settings, &secrets).unwrap();
        let mode = std::fs::metadata(settings.token_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

//! Git authentication handling.

use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};

use super::types::{GitAuthSettings, GitAuthType};
use crate::gitops::error::{GitOpsError, Result};
use crate::secrets::{expand_home, resolve_secret};

/// Escapes a token for safe use in single-quoted shell strings.
/// Replaces single quotes with '\'' (end quote, escaped quote, start quote).
pub fn shell_escape_token(token: &str) -> String {
    token.replace('\'', "'\\''")
}

/// RAII guard for askpass script cleanup.
///
/// Deletes the askpass script when dropped, so the token does not outlive
/// the git invocation on disk even if the command fails.
#[derive(Debug)]
pub struct AskpassCleanup {
    path: Option<PathBuf>,
}

impl AskpassCleanup {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    pub(crate) fn empty() -> Self {
        Self { path: None }
    }
}

impl Drop for AskpassCleanup {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to clean up askpass script: {}", e);
            }
        }
    }
}

/// Authentication environment for one git command.
#[derive(Debug)]
pub struct AuthEnv {
    /// Environment variables to set for the git command.
    pub env_vars: Vec<(String, String)>,
    /// Must outlive the git command to keep the askpass script alive.
    pub _cleanup: AskpassCleanup,
}

impl AuthEnv {
    fn none() -> Self {
        Self {
            env_vars: vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())],
            _cleanup: AskpassCleanup::empty(),
        }
    }
}

/// Builds the auth environment for a git invocation.
///
/// The token is resolved on every call so that rotated secrets are picked up
/// without a restart.
pub fn build_auth_env(auth: &GitAuthSettings) -> Result<AuthEnv> {
    match auth.auth_type {
        GitAuthType::None => Ok(AuthEnv::none()),
        GitAuthType::Token => {
            let env_var = Some(auth.token_env_var.as_str()).filter(|v| !v.is_empty());
            let token = resolve_secret(auth.token_file.as_deref(), env_var).map_err(|e| {
                GitOpsError::Credential(format!(
                    "Failed to resolve git token: {}. Configure tokenFile or tokenEnvVar.",
                    e
                ))
            })?;
            askpass_env(&token)
        }
        GitAuthType::SshKey => ssh_env(&auth.ssh_key_path),
    }
}

fn askpass_env(token: &SecretString) -> Result<AuthEnv> {
    let escaped_token = shell_escape_token(token.expose_secret());
    let askpass_path =
        std::env::temp_dir().join(format!(".peanut-askpass-{}.sh", uuid::Uuid::new_v4()));
    let script = format!("#!/bin/sh\necho '{}'\n", escaped_token);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o700)
            .open(&askpass_path)?;
        std::io::Write::write_all(&mut file, script.as_bytes())?;
    }

    #[cfg(not(unix))]
    {
        std::fs::write(&askpass_path, &script)?;
    }

    let cleanup = AskpassCleanup::new(askpass_path.clone());

    let askpass_path_str = askpass_path
        .to_str()
        .ok_or_else(|| {
            GitOpsError::Credential("Temp directory path contains non-UTF8 characters".to_string())
        })?
        .to_string();

    Ok(AuthEnv {
        env_vars: vec![
            ("GIT_ASKPASS".to_string(), askpass_path_str),
            ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
        ],
        _cleanup: cleanup,
    })
}

fn ssh_env(configured: &str) -> Result<AuthEnv> {
    let key_path = if configured.is_empty() {
        dirs::home_dir()
            .map(|h| h.join(".ssh").join("id_ed25519"))
            .unwrap_or_else(|| PathBuf::from(".ssh/id_ed25519"))
    } else {
        PathBuf::from(expand_home(configured))
    };

    if !key_path.exists() {
        return Err(GitOpsError::Credential(format!(
            "SSH key file not found: {}",
            key_path.display()
        )));
    }

    // Quote the path so spaces and leading dashes survive the shell
    let safe_path = {
        let escaped = shell_escape_token(&key_path.display().to_string());
        if escaped.starts_with('-') {
            format!("'./{}'", escaped)
        } else {
            format!("'{}'", escaped)
        }
    };

    Ok(AuthEnv {
        env_vars: vec![
            (
                "GIT_SSH_COMMAND".to_string(),
                format!(
                    "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new",
                    safe_path
                ),
            ),
            ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
        ],
        _cleanup: AskpassCleanup::empty(),
    })
}

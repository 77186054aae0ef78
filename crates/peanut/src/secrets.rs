//! Secret resolution for the git credential.
//!
//! Secrets are resolved in priority order:
//!
//! 1. **File reference** - mounted secrets (e.g. `tokenFile: /run/secrets/git-token`)
//! 2. **Env var reference** - e.g. `tokenEnvVar: AUTH_TOKEN`

use secrecy::SecretString;
use std::fs;

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need a file path or an env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Secret file '{path}' is empty")]
    EmptyFile { path: String },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

/// Result type for secret resolution.
pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves a secret from a file or an environment variable.
///
/// A configured file always wins over the environment, and a file that cannot
/// be read is an error rather than a silent fallback.
pub fn resolve_secret(file_path: Option<&str>, env_var: Option<&str>) -> Result<SecretString> {
    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        return match fs::read_to_string(&expanded) {
            Ok(content) => {
                let trimmed = content.trim();
                if trimmed.is_empty() {
                    Err(SecretError::EmptyFile { path: expanded })
                } else {
                    Ok(SecretString::from(trimmed.to_string()))
                }
            }
            Err(e) => Err(SecretError::FileReadError {
                path: expanded,
                source: e,
            }),
        };
    }

    if let Some(var_name) = env_var.filter(|v| !v.is_empty()) {
        return match std::env::var(var_name) {
            // Env vars may carry trailing newlines from secret mounts
            Ok(value) => Ok(SecretString::from(value.trim())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: var_name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: var_name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Expands `~` and `~/path` to the user's home directory.
pub(crate) fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            if path == "~" {
                return home.to_string_lossy().into_owned();
            }
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

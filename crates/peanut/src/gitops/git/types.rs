//! Pure data types for git operations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default environment variable holding the git token.
pub const DEFAULT_TOKEN_ENV_VAR: &str = "AUTH_TOKEN";

/// Identifies the source of truth: a path on a branch of a remote repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryRef {
    /// Remote repository URL.
    #[serde(default)]
    pub url: String,
    /// Branch to track.
    #[serde(default)]
    pub branch: String,
    /// Directory within the repository holding the manifests.
    #[serde(default)]
    pub path: String,
    /// Credential used for clone and fetch.
    #[serde(default)]
    pub auth: GitAuthSettings,
}

impl RepositoryRef {
    /// Creates an unauthenticated repository reference.
    pub fn new(url: impl Into<String>, branch: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: branch.into(),
            path: path.into(),
            auth: GitAuthSettings::default(),
        }
    }

    /// Sets the credential.
    pub fn with_auth(mut self, auth: GitAuthSettings) -> Self {
        self.auth = auth;
        self
    }
}

/// Git authentication settings.
///
/// Only references to secrets are stored here; the token itself is resolved
/// each time git is invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitAuthSettings {
    /// Authentication type: none, token, or ssh-key.
    #[serde(default, rename = "type")]
    pub auth_type: GitAuthType,

    /// Environment variable containing the token.
    #[serde(default = "default_token_env_var")]
    pub token_env_var: String,

    /// Path to file containing the token (for mounted secrets).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_file: Option<String>,

    /// Path to SSH key file.
    #[serde(default)]
    pub ssh_key_path: String,
}

impl Default for GitAuthSettings {
    fn default() -> Self {
        Self {
            auth_type: GitAuthType::None,
            token_env_var: default_token_env_var(),
            token_file: None,
            ssh_key_path: String::new(),
        }
    }
}

fn default_token_env_var() -> String {
    DEFAULT_TOKEN_ENV_VAR.to_string()
}

/// Git authentication type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GitAuthType {
    #[default]
    None,
    Token,
    SshKey,
}

/// A full commit hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        self.0.get(..end).unwrap_or(&self.0)
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommitId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

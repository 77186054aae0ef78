//! Repository and manifest error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while tracking the source repository or extracting manifests.
#[derive(Error, Debug)]
pub enum GitOpsError {
    #[error("Not a git working copy: {}", path.display())]
    NotARepository { path: PathBuf },

    #[error("Git authentication failed: {0}")]
    Authentication(String),

    #[error("Git repository or branch not found: {0}")]
    NotFound(String),

    #[error("Repository state error: {0}")]
    RepositoryState(String),

    #[error("Failed to sync repository: {0}")]
    Sync(String),

    #[error("Git operation timed out after {0}s")]
    Timeout(u64),

    #[error("Git command failed: {0}")]
    Command(String),

    #[error("Failed to parse manifests in '{}': {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Invalid manifest in '{}': {message}", path.display())]
    InvalidManifest { path: PathBuf, message: String },

    #[error("Path traversal detected: {0}")]
    PathTraversal(String),

    #[error("Credential resolution failed: {0}")]
    Credential(String),
}

impl From<std::io::Error> for GitOpsError {
    fn from(err: std::io::Error) -> Self {
        GitOpsError::Command(err.to_string())
    }
}

impl GitOpsError {
    /// Returns true for failures that mean "could not establish or update the
    /// repository", as opposed to manifest extraction failures.
    pub fn is_repository_access(&self) -> bool {
        !matches!(
            self,
            GitOpsError::Parse { .. }
                | GitOpsError::InvalidManifest { .. }
                | GitOpsError::PathTraversal(_)
        )
    }
}

/// Classifies a git stderr string into a more specific error variant.
///
/// Missing repositories and rejected credentials often look identical at the
/// transport level, so callers must not rely on the distinction.
pub fn classify_git_error(stderr: &str) -> GitOpsError {
    let lower = stderr.to_lowercase();
    let message = stderr.trim().to_string();

    if lower.contains("authentication failed")
        || lower.contains("authentication required")
        || lower.contains("could not read username")
        || lower.contains("terminal prompts disabled")
        || lower.contains("permission denied")
        || lower.contains("invalid credentials")
    {
        return GitOpsError::Authentication(message);
    }

    if lower.contains("not found")
        || lower.contains("does not exist")
        || lower.contains("couldn't find remote ref")
        || lower.contains("does not appear to be a git repository")
    {
        return GitOpsError::NotFound(message);
    }

    GitOpsError::Sync(message)
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, GitOpsError>;

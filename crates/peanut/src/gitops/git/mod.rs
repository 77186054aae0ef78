//! Git working copy management through the git CLI.

pub mod auth;
pub mod parse;
mod repository;
pub mod types;

pub use repository::{RepositoryTracker, DEFAULT_GIT_TIMEOUT};
pub use types::{CommitId, GitAuthSettings, GitAuthType, RepositoryRef};

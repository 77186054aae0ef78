//! The repository seen from the reconciliation loop.

use async_trait::async_trait;

use super::error::Result;
use super::git::{CommitId, RepositoryRef};
use super::resource::Manifest;

/// A source of desired state that can be refreshed and read.
///
/// [`RepositoryTracker`](super::git::RepositoryTracker) is the production
/// implementation.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// The repository this source tracks.
    fn repository(&self) -> &RepositoryRef;

    /// The last head observed, if any.
    fn current_head(&self) -> Option<&CommitId>;

    /// Pulls remote changes and returns the (possibly unchanged) head.
    async fn sync(&mut self) -> Result<CommitId>;

    /// Reads the manifests at the current head.
    async fn extract_manifests(&self) -> Result<Vec<Manifest>>;
}

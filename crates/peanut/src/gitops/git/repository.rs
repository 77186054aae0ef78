//! The local working copy of the source repository.

use std::path::{Component, Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::auth::{build_auth_env, AuthEnv};
use super::parse::{format_command_error, is_unborn_head, parse_commit_id};
use super::types::{CommitId, RepositoryRef};
use crate::gitops::error::{classify_git_error, GitOpsError, Result};
use crate::gitops::parser::ManifestParser;
use crate::gitops::resource::Manifest;
use crate::gitops::source::ManifestSource;

/// Default bound on a single git invocation.
pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Tracks one branch of one remote repository in a local working copy.
///
/// The tracker is owned by the reconciliation loop; nothing else touches the
/// working copy while it is alive.
pub struct RepositoryTracker {
    repo: RepositoryRef,
    parser: Arc<dyn ManifestParser>,
    work_dir: Option<PathBuf>,
    git_timeout: Duration,
    head: Option<CommitId>,
}

impl std::fmt::Debug for RepositoryTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryTracker")
            .field("url", &self.repo.url)
            .field("branch", &self.repo.branch)
            .field("path", &self.repo.path)
            .field("parser", &self.parser.name())
            .field("work_dir", &self.work_dir)
            .field("head", &self.head)
            .finish()
    }
}

impl RepositoryTracker {
    /// Creates a tracker that is not yet attached to a working copy.
    pub fn new(repo: RepositoryRef, parser: Arc<dyn ManifestParser>) -> Self {
        Self {
            repo,
            parser,
            work_dir: None,
            git_timeout: DEFAULT_GIT_TIMEOUT,
            head: None,
        }
    }

    /// Sets the bound applied to every git invocation.
    pub fn with_git_timeout(mut self, timeout: Duration) -> Self {
        self.git_timeout = timeout;
        self
    }

    /// Returns the working copy path, once attached.
    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }

    /// Attaches to an existing working copy.
    pub async fn open(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !path.join(".git").exists() {
            return Err(GitOpsError::NotARepository {
                path: path.to_path_buf(),
            });
        }

        let output = self
            .run_git(path, &["rev-parse", "--is-inside-work-tree"], false)
            .await?;
        if !output.status.success() {
            return Err(GitOpsError::NotARepository {
                path: path.to_path_buf(),
            });
        }

        self.work_dir = Some(path.to_path_buf());
        match self.head_commit().await {
            Ok(head) => log::info!("Opened working copy {} at {}", path.display(), head.short()),
            Err(e) => log::warn!("Opened working copy {} without a head: {}", path.display(), e),
        }
        Ok(())
    }

    /// Clones the configured branch into `path`.
    ///
    /// Authentication and not-found failures are reported as such when git
    /// makes the distinction, but they often look the same on the wire.
    pub async fn clone(&mut self, path: impl AsRef<Path>) -> Result<CommitId> {
        let path = std::path::absolute(path.as_ref())?;
        let path = path.as_path();
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent).await?;

        let target = path.to_string_lossy();
        log::info!(
            "Cloning {} (branch {}) into {}",
            self.repo.url,
            self.repo.branch,
            path.display()
        );
        let output = self
            .run_git(
                parent,
                &[
                    "clone",
                    "--branch",
                    &self.repo.branch,
                    "--single-branch",
                    "--",
                    &self.repo.url,
                    &target,
                ],
                true,
            )
            .await?;

        if !output.status.success() {
            return Err(classify_git_error(&format_command_error(&output)));
        }

        self.work_dir = Some(path.to_path_buf());
        self.head_commit().await
    }

    /// Returns the checked-out commit.
    pub async fn head_commit(&mut self) -> Result<CommitId> {
        let dir = self.require_work_dir()?.to_path_buf();
        let output = self.run_git(&dir, &["rev-parse", "HEAD"], false).await?;

        if !output.status.success() {
            if is_unborn_head(&output.stderr) {
                return Err(GitOpsError::RepositoryState(format!(
                    "branch {} has no commits",
                    self.repo.branch
                )));
            }
            return Err(GitOpsError::RepositoryState(format_command_error(&output)));
        }

        let head = parse_commit_id(&output.stdout)?;
        self.head = Some(head.clone());
        Ok(head)
    }

    /// Fetches the configured branch and fast-forwards the working copy.
    ///
    /// An up-to-date branch is not an error: the unchanged head is returned.
    pub async fn sync(&mut self) -> Result<CommitId> {
        let dir = self.require_work_dir()?.to_path_buf();
        let previous = self.head.clone();

        let fetch = self
            .run_git(&dir, &["fetch", "origin", &self.repo.branch], true)
            .await?;
        if !fetch.status.success() {
            return Err(classify_git_error(&format_command_error(&fetch)));
        }

        let merge = self
            .run_git(&dir, &["merge", "--ff-only", "FETCH_HEAD"], false)
            .await?;
        if !merge.status.success() {
            return Err(GitOpsError::Sync(format!(
                "cannot fast-forward {}: {}",
                self.repo.branch,
                format_command_error(&merge)
            )));
        }

        let head = self.head_commit().await?;
        match previous {
            Some(prev) if prev == head => {
                log::debug!("Branch {} already up to date at {}", self.repo.branch, head.short())
            }
            Some(prev) => log::info!(
                "Branch {} moved {} -> {}",
                self.repo.branch,
                prev.short(),
                head.short()
            ),
            None => log::info!("Branch {} at {}", self.repo.branch, head.short()),
        }
        Ok(head)
    }

    /// Parses the manifests under the configured path of the working copy.
    pub async fn extract_manifests(&self) -> Result<Vec<Manifest>> {
        let root = self.manifest_root()?;
        self.parser.parse(&root).await
    }

    /// Resolves the manifest directory, refusing paths that leave the working copy.
    fn manifest_root(&self) -> Result<PathBuf> {
        let work_dir = self.require_work_dir()?;
        let relative = Path::new(&self.repo.path);

        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(GitOpsError::PathTraversal(self.repo.path.clone()));
        }

        Ok(work_dir.join(relative))
    }

    fn require_work_dir(&self) -> Result<&Path> {
        self.work_dir
            .as_deref()
            .ok_or_else(|| GitOpsError::RepositoryState("working copy not opened".to_string()))
    }

    /// Runs git in `dir`, bounded by the git timeout.
    async fn run_git(&self, dir: &Path, args: &[&str], with_auth: bool) -> Result<Output> {
        let auth = if with_auth {
            Some(self.get_auth_env()?)
        } else {
            None
        };

        let mut cmd = Command::new("git");
        cmd.current_dir(dir)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("GIT_TERMINAL_PROMPT", "0");

        if let Some(auth) = &auth {
            for (key, value) in &auth.env_vars {
                cmd.env(key, value);
            }
        }

        let output = tokio::time::timeout(self.git_timeout, cmd.output())
            .await
            .map_err(|_| GitOpsError::Timeout(self.git_timeout.as_secs()))?
            .map_err(|e| GitOpsError::Command(format!("git {}: {}", args[0], e)))?;

        // Drop auth env (cleanup guard) after the command completes
        drop(auth);
        Ok(output)
    }

    fn get_auth_env(&self) -> Result<AuthEnv> {
        build_auth_env(&self.repo.auth)
    }
}

#[async_trait]
impl ManifestSource for RepositoryTracker {
    fn repository(&self) -> &RepositoryRef {
        &self.repo
    }

    fn current_head(&self) -> Option<&CommitId> {
        self.head.as_ref()
    }

    async fn sync(&mut self) -> Result<CommitId> {
        RepositoryTracker::sync(self).await
    }

    async fn extract_manifests(&self) -> Result<Vec<Manifest>> {
        RepositoryTracker::extract_manifests(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gitops::parser::PlainManifestParser;
    use tempfile::TempDir;

    fn tracker(path: &str) -> RepositoryTracker {
        RepositoryTracker::new(
            RepositoryRef::new("https://example.com/config.git", "main", path),
            Arc::new(PlainManifestParser::new()),
        )
    }

    #[tokio::test]
    async fn test_open_rejects_plain_directory() {
        let dir = TempDir::new().unwrap();
        let err = tracker("deploy").open(dir.path()).await.unwrap_err();
        assert!(matches!(err, GitOpsError::NotARepository { .. }));
    }

    #[tokio::test]
    async fn test_operations_require_open() {
        let mut t = tracker("deploy");
        assert!(matches!(
            t.head_commit().await,
            Err(GitOpsError::RepositoryState(_))
        ));
        assert!(matches!(t.sync().await, Err(GitOpsError::RepositoryState(_))));
        assert!(t.current_head().is_none());
    }

    #[test]
    fn test_manifest_root_rejects_traversal() {
        let mut t = tracker("../outside");
        t.work_dir = Some(PathBuf::from("/srv/wc"));
        assert!(matches!(
            t.manifest_root(),
            Err(GitOpsError::PathTraversal(_))
        ));

        let mut t = tracker("/etc");
        t.work_dir = Some(PathBuf::from("/srv/wc"));
        assert!(matches!(
            t.manifest_root(),
            Err(GitOpsError::PathTraversal(_))
        ));

        let mut t = tracker("apps/prod");
        t.work_dir = Some(PathBuf::from("/srv/wc"));
        assert_eq!(t.manifest_root().unwrap(), PathBuf::from("/srv/wc/apps/prod"));
    }

    #[tokio::test]
    async fn test_extract_missing_path_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker("deploy");
        t.work_dir = Some(dir.path().to_path_buf());
        let err = t.extract_manifests().await.unwrap_err();
        assert!(!err.is_repository_access());
        assert!(err.to_string().contains("deploy"));
    }
}

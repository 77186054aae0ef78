//! Kustomize parser.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{ensure_directory, split_yaml_documents, ManifestParser};
use crate::gitops::error::{GitOpsError, Result};
use crate::gitops::git::parse::format_command_error;
use crate::gitops::resource::Manifest;

/// Upper bound for one `kustomize build` run.
pub const DEFAULT_KUSTOMIZE_TIMEOUT: Duration = Duration::from_secs(120);

/// Renders the root with `kustomize build` and splits the output stream.
///
/// The child is killed when the build exceeds the timeout or the parse
/// future is dropped.
#[derive(Debug, Clone)]
pub struct KustomizeParser {
    binary: String,
    timeout: Duration,
}

impl KustomizeParser {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            timeout: DEFAULT_KUSTOMIZE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for KustomizeParser {
    fn default() -> Self {
        Self::new("kustomize")
    }
}

#[async_trait]
impl ManifestParser for KustomizeParser {
    fn name(&self) -> &'static str {
        "kustomize"
    }

    async fn parse(&self, root: &Path) -> Result<Vec<Manifest>> {
        ensure_directory(root)?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg("build")
            .arg(root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| GitOpsError::Parse {
                path: root.to_path_buf(),
                message: format!("failed to run {}: {}", self.binary, e),
            })?,
            Err(_) => {
                return Err(GitOpsError::Parse {
                    path: root.to_path_buf(),
                    message: format!(
                        "kustomize build timed out after {}s",
                        self.timeout.as_secs_f64()
                    ),
                })
            }
        };

        if !output.status.success() {
            return Err(GitOpsError::Parse {
                path: root.to_path_buf(),
                message: format_command_error(&output),
            });
        }

        let rendered = String::from_utf8_lossy(&output.stdout);
        split_yaml_documents(&rendered, root)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn fake_kustomize(dir: &Path, body: &str) -> String {
        let path = dir.join("kustomize");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[tokio::test]
    async fn test_parse_splits_build_output() {
        let bin = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let script = fake_kustomize(
            bin.path(),
            r#"cat <<'YAML'
apiVersion: v1
kind: Namespace
metadata:
  name: shop
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: taxi
  namespace: shop
YAML"#,
        );

        let manifests = KustomizeParser::new(script).parse(root.path()).await.unwrap();
        assert_eq!(manifests.len(), 2);
        assert_eq!(manifests[1].identity().group, "apps");
    }

    #[tokio::test]
    async fn test_parse_failure_carries_root_and_stderr() {
        let bin = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let script = fake_kustomize(bin.path(), "echo 'missing kustomization.yaml' >&2; exit 1");

        let err = KustomizeParser::new(script).parse(root.path()).await.unwrap_err();
        match err {
            GitOpsError::Parse { path, message } => {
                assert_eq!(path, root.path());
                assert!(message.contains("missing kustomization.yaml"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_parse_missing_binary() {
        let root = TempDir::new().unwrap();
        let err = KustomizeParser::new("/nonexistent/kustomize")
            .parse(root.path())
            .await
            .unwrap_err();
        assert!(matches!(err, GitOpsError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_parse_times_out_and_kills_build() {
        let bin = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let marker = bin.path().join("finished");
        let script = fake_kustomize(
            bin.path(),
            &format!("sleep 2\ntouch {}", marker.display()),
        );

        let started = std::time::Instant::now();
        let err = KustomizeParser::new(script)
            .with_timeout(Duration::from_millis(200))
            .parse(root.path())
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        match err {
            GitOpsError::Parse { path, message } => {
                assert_eq!(path, root.path());
                assert!(message.contains("timed out"), "{}", message);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // The killed build never gets to write its marker
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists());
    }
}

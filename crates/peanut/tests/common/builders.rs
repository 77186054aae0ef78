//! Builders for manifests, commits and throwaway git repositories.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::json;
use tempfile::TempDir;

use peanut::gitops::{CommitId, Manifest};

/// A syntactically valid commit id derived from `n`.
pub fn commit(n: u64) -> CommitId {
    CommitId::new(format!("{:040x}", n))
}

pub fn manifest(api_version: &str, kind: &str, name: &str) -> Manifest {
    Manifest::from_value(
        json!({
            "apiVersion": api_version,
            "kind": kind,
            "metadata": {"name": name},
        }),
        Path::new("deploy/generated.yaml"),
    )
    .expect("valid manifest")
}

pub fn deployment(name: &str) -> Manifest {
    manifest("apps/v1", "Deployment", name)
}

pub fn config_map(name: &str) -> Manifest {
    manifest("v1", "ConfigMap", name)
}

/// Returns false when no `git` binary is on the PATH.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Runs git in `dir` and returns trimmed stdout, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=Peanut Tests",
            "-c",
            "user.email=tests@peanut.invalid",
            "-c",
            "commit.gpgsign=false",
            "-c",
            "init.defaultBranch=main",
        ])
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A bare "remote" plus an authoring clone that pushes to it.
pub struct GitFixture {
    temp_dir: TempDir,
    pub remote: PathBuf,
    pub author: PathBuf,
    pub branch: String,
}

impl GitFixture {
    /// Creates the remote with one commit on `branch`.
    pub fn new(branch: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let remote = temp_dir.path().join("remote.git");
        let author = temp_dir.path().join("author");
        fs::create_dir_all(&remote).unwrap();
        fs::create_dir_all(&author).unwrap();

        git(&remote, &["init", "--bare", "--quiet"]);
        git(&author, &["init", "--quiet"]);
        git(&author, &["symbolic-ref", "HEAD", &format!("refs/heads/{}", branch)]);

        let fixture = Self {
            temp_dir,
            remote,
            author,
            branch: branch.to_string(),
        };
        fixture.commit_file(
            "deploy/configmap.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\ndata:\n  mode: blue\n",
            "initial",
        );
        fixture
    }

    /// The remote as a clone URL.
    pub fn url(&self) -> String {
        self.remote.to_string_lossy().into_owned()
    }

    /// Scratch directory next to the repositories.
    pub fn scratch(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Writes a file, commits it and pushes. Returns the new head.
    pub fn commit_file(&self, rel: &str, content: &str, message: &str) -> String {
        let path = self.author.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        git(&self.author, &["add", "--all"]);
        git(&self.author, &["commit", "--quiet", "-m", message]);
        self.push()
    }

    /// Removes a file, commits and pushes. Returns the new head.
    pub fn remove_file(&self, rel: &str, message: &str) -> String {
        git(&self.author, &["rm", "--quiet", rel]);
        git(&self.author, &["commit", "--quiet", "-m", message]);
        self.push()
    }

    fn push(&self) -> String {
        let remote = self.url();
        let refspec = format!("HEAD:refs/heads/{}", self.branch);
        git(&self.author, &["push", "--quiet", &remote, &refspec]);
        git(&self.author, &["rev-parse", "HEAD"])
    }
}

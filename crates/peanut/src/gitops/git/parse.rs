//! Git output parsing helpers.

use std::process::Output;

use super::types::CommitId;
use crate::gitops::error::{GitOpsError, Result};

/// Formats a failed command from both stderr and stdout for better debugging.
pub fn format_command_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "Command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

/// Parses the output of `git rev-parse HEAD`.
pub fn parse_commit_id(stdout: &[u8]) -> Result<CommitId> {
    let text = String::from_utf8_lossy(stdout);
    let hash = text.trim();
    if hash.len() < 40 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(GitOpsError::RepositoryState(format!(
            "unexpected rev-parse output: '{}'",
            hash
        )));
    }
    Ok(CommitId::new(hash))
}

/// Returns true when `git rev-parse HEAD` failed because the branch has no commits.
pub fn is_unborn_head(stderr: &[u8]) -> bool {
    let text = String::from_utf8_lossy(stderr);
    text.contains("unknown revision")
        || text.contains("ambiguous argument 'HEAD'")
        || text.contains("does not have any commits")
}

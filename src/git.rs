use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::error::RevertError;

/// Restores the shared workspace to its committed baseline between jobs.
pub trait WorkspaceReverter: Send + Sync {
    fn revert(&self, workspace: &Path) -> Result<(), RevertError>;
}

/// Discards everything an agent did using git: tracked paths are restored
/// from the baseline commit and untracked files are deleted, ignored or not.
///
/// The baseline is the commit `HEAD` pointed at on the first revert, so an
/// agent that commits inside the mounted repository cannot move it.
#[derive(Debug, Clone, Default)]
pub struct GitReverter {
    baseline: OnceLock<String>,
}

impl GitReverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn baseline(&self) -> Option<&str> {
        self.baseline.get().map(String::as_str)
    }

    fn git(&self, workspace: &Path, args: &[&str]) -> Result<String, RevertError> {
        let command = format!("git {}", args.join(" "));
        let output = Command::new("git")
            .args(args)
            .current_dir(workspace)
            .output()
            .map_err(|source| RevertError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.contains("not a git repository") {
                return Err(RevertError::NotARepository {
                    path: workspace.to_path_buf(),
                });
            }
            return Err(RevertError::CommandFailed {
                command,
                code: output.status.code(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn resolve_baseline(&self, workspace: &Path) -> Result<String, RevertError> {
        if let Some(commit) = self.baseline.get() {
            return Ok(commit.clone());
        }
        let head = self.git(workspace, &["rev-parse", "--verify", "HEAD"])?;
        info!(commit = %head, "Pinned workspace baseline");
        Ok(self.baseline.get_or_init(|| head).clone())
    }
}

impl WorkspaceReverter for GitReverter {
    fn revert(&self, workspace: &Path) -> Result<(), RevertError> {
        if !workspace.is_dir() {
            return Err(RevertError::NotARepository {
                path: workspace.to_path_buf(),
            });
        }
        info!(workspace = %workspace.display(), "Reverting all agent modifications");

        let baseline = self.resolve_baseline(workspace)?;
        let head = self.git(workspace, &["rev-parse", "--verify", "HEAD"])?;
        if head != baseline {
            warn!(baseline = %baseline, head = %head, "HEAD moved during the run, restoring from baseline");
        }

        let source = format!("--source={}", baseline);
        // Staged and unstaged edits to tracked files
        self.git(
            workspace,
            &["restore", &source, "--staged", "--worktree", "--", "."],
        )?;
        // Untracked files and directories, including nested repositories and
        // anything hidden behind .gitignore or .git/info/exclude
        self.git(workspace, &["clean", "-ffdx", "--", "."])?;

        info!("Workspace reverted, ready for next execution");
        Ok(())
    }
}

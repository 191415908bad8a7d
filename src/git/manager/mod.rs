//! Git manager implementation

mod changes;
mod types;
mod worktree;

#[cfg(test)]
mod tests;

pub use types::WorktreeInfo;

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Find the git repository root for a given path.
/// Returns None if the path is not inside a git repository.
pub fn find_git_root(path: &Path) -> Option<PathBuf> {
    let start_dir = if path.is_file() { path.parent()? } else { path };

    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(start_dir)
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if root.is_empty() {
        None
    } else {
        Some(PathBuf::from(root))
    }
}

/// Manages git operations for boatman.
///
/// Every subprocess is launched with an explicit working directory; the
/// parent process's working directory is never changed.
#[derive(Clone)]
pub struct GitManager {
    /// Root directory of the repository
    root: PathBuf,

    /// Base directory for task worktrees
    pub(super) worktrees_dir: PathBuf,
}

impl GitManager {
    /// Create a new git manager for a repository root.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();

        if !root.join(".git").exists() {
            bail!("Not a git repository: {}", root.display());
        }

        let worktrees_dir = root.join(".worktrees");

        Ok(Self {
            root,
            worktrees_dir,
        })
    }

    /// Run git with explicit arguments in an explicit directory.
    pub(super) fn git(&self, dir: &Path, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .with_context(|| format!("Failed to run git {}", args.join(" ")))
    }

    /// Run git and fail with stderr when it exits non-zero.
    pub(super) fn git_checked(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let output = self.git(dir, args)?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Get the current HEAD commit SHA.
    pub fn head_sha(&self, dir: &Path) -> Result<String> {
        Ok(self.git_checked(dir, &["rev-parse", "HEAD"])?.trim().to_string())
    }

    /// Check if the repository has at least one commit.
    pub fn has_commits(&self) -> bool {
        self.git(&self.root, &["rev-parse", "HEAD"])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Get the current branch name at the repository root.
    pub fn current_branch(&self) -> Result<String> {
        Ok(self
            .git_checked(&self.root, &["rev-parse", "--abbrev-ref", "HEAD"])?
            .trim()
            .to_string())
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, name: &str) -> bool {
        self.git(
            &self.root,
            &["rev-parse", "--verify", &format!("refs/heads/{}", name)],
        )
        .map(|o| o.status.success())
        .unwrap_or(false)
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Base directory worktrees are created under.
    pub fn worktrees_dir(&self) -> &Path {
        &self.worktrees_dir
    }
}

//! Status, diff, commit, and push operations for GitManager

use anyhow::{Result, bail};
use std::path::{Path, PathBuf};

use super::GitManager;
use super::types::parse_porcelain;

impl GitManager {
    /// Files changed in a worktree, from `git status --porcelain`.
    ///
    /// This is the authoritative answer: subprocess claims about changed
    /// files are never trusted.
    pub fn changed_files(&self, worktree: &Path) -> Result<Vec<PathBuf>> {
        let output = self.git_checked(worktree, &["status", "--porcelain"])?;
        Ok(parse_porcelain(&output))
    }

    /// Check if a directory has any uncommitted changes.
    pub fn has_uncommitted_changes(&self, dir: &Path) -> Result<bool> {
        let output = self.git_checked(dir, &["status", "--porcelain"])?;
        Ok(!output.is_empty())
    }

    /// Diff of the working tree against HEAD (including staged changes).
    pub fn diff(&self, worktree: &Path) -> Result<String> {
        self.git_checked(worktree, &["diff", "HEAD"])
    }

    /// Diff of staged changes only.
    pub fn diff_cached(&self, worktree: &Path) -> Result<String> {
        self.git_checked(worktree, &["diff", "--cached"])
    }

    /// Diff against a base branch, for review handoffs.
    pub fn diff_against(&self, worktree: &Path, base: &str) -> Result<String> {
        self.git_checked(worktree, &["diff", base])
    }

    /// Stage everything in the worktree.
    pub fn stage_all(&self, worktree: &Path) -> Result<()> {
        self.git_checked(worktree, &["add", "-A"])?;
        Ok(())
    }

    /// Stage and commit everything in a directory.
    ///
    /// Returns `true` if a commit was created.
    pub fn commit_all(&self, dir: &Path, message: &str) -> Result<bool> {
        self.stage_all(dir)?;

        let output = self.git(dir, &["commit", "-m", message])?;
        if output.status.success() {
            return Ok(true);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stderr.contains("nothing to commit") || stdout.contains("nothing to commit") {
            tracing::debug!("git commit reported nothing to commit");
            return Ok(false);
        }

        bail!("git commit failed: {}", stderr.trim());
    }

    /// Push a branch, setting upstream on first push.
    pub fn push(&self, worktree: &Path, branch: &str) -> Result<()> {
        self.git_checked(worktree, &["push", "-u", "origin", branch])?;
        Ok(())
    }

    /// Discard the last `n` commits and all working-tree changes.
    pub fn reset_hard(&self, dir: &Path, n: u32) -> Result<()> {
        let target = format!("HEAD~{}", n);
        self.git_checked(dir, &["reset", "--hard", &target])?;
        Ok(())
    }

    /// Create a branch at the current HEAD of a directory.
    pub fn branch_at_head(&self, dir: &Path, name: &str) -> Result<()> {
        self.git_checked(dir, &["branch", name])?;
        Ok(())
    }

    /// One-line log entries whose messages match a pattern.
    pub fn log_grep(&self, dir: &Path, pattern: &str) -> Result<Vec<String>> {
        let output = self.git_checked(dir, &["log", "--oneline", "--grep", pattern])?;
        Ok(output
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| l.to_string())
            .collect())
    }

    /// Read a file's contents at a specific commit.
    pub fn show_file(&self, dir: &Path, sha: &str, path: &str) -> Result<String> {
        self.git_checked(dir, &["show", &format!("{}:{}", sha, path)])
    }

    /// Count commits between HEAD and a base reference.
    pub fn commits_ahead_of(&self, dir: &Path, base: &str) -> Result<u32> {
        let range = format!("{}..HEAD", base);
        let output = self.git_checked(dir, &["rev-list", "--count", &range])?;
        Ok(output.trim().parse().unwrap_or(0))
    }

    /// Collapse the last `n` commits into one.
    pub fn squash_last(&self, dir: &Path, n: u32, message: &str) -> Result<()> {
        if n < 2 {
            return Ok(());
        }
        let target = format!("HEAD~{}", n);
        self.git_checked(dir, &["reset", "--soft", &target])?;
        let output = self.git(dir, &["commit", "-m", message])?;
        if !output.status.success() {
            bail!(
                "git commit failed during squash: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

//! Worktree operations for GitManager

use anyhow::{Result, anyhow, bail};
use std::path::{Path, PathBuf};

use super::{GitManager, types::WorktreeInfo};
use crate::domain::sanitize_branch_name;

impl GitManager {
    /// Create or reuse the worktree for a branch.
    ///
    /// The worktree lives at `<repo>/.worktrees/<sanitized-branch>`. When the
    /// path already exists it is reused as-is (a resumed run continues in the
    /// same checkout); otherwise a fresh branch is created off `base_branch`
    /// and checked out there.
    pub fn ensure_worktree(&self, branch: &str, base_branch: &str) -> Result<WorktreeInfo> {
        if !self.has_commits() {
            bail!(
                "Cannot create worktree: repository has no commits. \
                Please make an initial commit first."
            );
        }

        #[cfg(unix)]
        {
            if unsafe { libc::geteuid() } == 0 {
                bail!(
                    "Cannot create worktree: running as root. \
                    This would create files owned by root that cannot be modified later. \
                    Please run boatman as your normal user."
                );
            }
        }

        let dir_name = sanitize_branch_name(branch);
        let worktree_path = self.worktrees_dir.join(&dir_name);

        if worktree_path.exists() {
            tracing::debug!("Reusing existing worktree at {}", worktree_path.display());
            return Ok(WorktreeInfo {
                path: worktree_path,
                branch: branch.to_string(),
                base_branch: base_branch.to_string(),
                reused: true,
            });
        }

        std::fs::create_dir_all(&self.worktrees_dir)?;

        let worktree_path_str = worktree_path
            .to_str()
            .ok_or_else(|| anyhow!("Worktree path contains invalid UTF-8"))?;

        let args: Vec<&str> = if self.branch_exists(branch) {
            vec!["worktree", "add", worktree_path_str, branch]
        } else {
            vec![
                "worktree",
                "add",
                "-b",
                branch,
                worktree_path_str,
                base_branch,
            ]
        };

        let output = self.git(self.root(), &args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

            // A half-created branch would shadow the next attempt.
            let _ = self.git(self.root(), &["branch", "-D", branch]);

            bail!("Failed to create worktree: {}", stderr);
        }

        Ok(WorktreeInfo {
            path: worktree_path,
            branch: branch.to_string(),
            base_branch: base_branch.to_string(),
            reused: false,
        })
    }

    /// Remove a worktree and its branch.
    pub fn remove_worktree(&self, worktree_path: &Path) -> Result<()> {
        let branch = worktree_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("Could not extract directory name from worktree path"))?
            .to_string();

        if worktree_path.exists() {
            let worktree_path_str = worktree_path
                .to_str()
                .ok_or_else(|| anyhow!("Worktree path contains invalid UTF-8"))?;
            let output = self.git(
                self.root(),
                &["worktree", "remove", "--force", worktree_path_str],
            )?;

            if !output.status.success() {
                tracing::warn!(
                    "Failed to remove worktree: {}",
                    String::from_utf8_lossy(&output.stderr)
                );
            }
        }

        let output = self.git(self.root(), &["branch", "-D", &branch])?;
        if !output.status.success() {
            tracing::warn!(
                "Failed to delete branch: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        Ok(())
    }

    /// List worktrees under the boatman worktrees directory.
    pub fn list_worktrees(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        if !self.worktrees_dir.exists() {
            return Ok(paths);
        }
        for entry in std::fs::read_dir(&self.worktrees_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Remove every worktree under the boatman worktrees directory.
    /// Returns the number removed.
    pub fn clean_worktrees(&self) -> Result<usize> {
        let paths = self.list_worktrees()?;
        let mut removed = 0;
        for path in &paths {
            self.remove_worktree(path)?;
            removed += 1;
        }
        Ok(removed)
    }
}

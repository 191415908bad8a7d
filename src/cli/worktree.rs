//! `boatman worktree` - list and clean task worktrees

use anyhow::{Context, Result};
use std::path::Path;

use crate::git::{GitManager, find_git_root};

pub fn list_command(work_dir: &Path) -> Result<()> {
    let git = manager(work_dir)?;
    let worktrees = git.list_worktrees()?;
    if worktrees.is_empty() {
        println!("no task worktrees");
        return Ok(());
    }
    for path in worktrees {
        println!("{}", path.display());
    }
    Ok(())
}

pub fn clean_command(work_dir: &Path) -> Result<()> {
    let git = manager(work_dir)?;
    let removed = git.clean_worktrees()?;
    println!("removed {} worktree(s)", removed);
    Ok(())
}

fn manager(work_dir: &Path) -> Result<GitManager> {
    let root = find_git_root(work_dir)
        .with_context(|| format!("{} is not inside a git repository", work_dir.display()))?;
    GitManager::new(root)
}

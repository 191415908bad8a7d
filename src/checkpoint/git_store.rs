//! Git-commit-backed checkpoint store
//!
//! Inside a worktree, every step transition is materialized as a commit
//! carrying a serialized state file. The commit history then doubles as the
//! checkpoint log: rollback is `git reset --hard`, snapshots are branches,
//! and historical state is read back with `git show`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::{Checkpoint, PipelineStep};
use crate::git::GitManager;

/// Serialized checkpoint state carried in every checkpoint commit
pub const STATE_FILE_NAME: &str = ".boatman-state.json";

/// A step transition being recorded
#[derive(Debug, Clone, Copy)]
pub enum Transition {
    Begin,
    Complete,
}

impl Transition {
    fn as_str(&self) -> &'static str {
        match self {
            Transition::Begin => "begin",
            Transition::Complete => "complete",
        }
    }
}

/// Checkpoint store that commits state into a worktree
pub struct GitCheckpointStore {
    git: GitManager,
    worktree: PathBuf,
    task_id: String,
}

impl GitCheckpointStore {
    pub fn new(git: GitManager, worktree: impl Into<PathBuf>, task_id: impl Into<String>) -> Self {
        Self {
            git,
            worktree: worktree.into(),
            task_id: task_id.into(),
        }
    }

    pub fn worktree(&self) -> &Path {
        &self.worktree
    }

    /// Record a step transition: write the state file and commit everything
    /// currently in the worktree under a checkpoint message.
    pub fn record(
        &self,
        checkpoint: &Checkpoint,
        transition: Transition,
        step: PipelineStep,
    ) -> Result<bool> {
        let state_path = self.worktree.join(STATE_FILE_NAME);
        let json = serde_json::to_string_pretty(checkpoint)
            .context("Failed to serialize checkpoint state")?;
        std::fs::write(&state_path, json)
            .with_context(|| format!("Failed to write {}", state_path.display()))?;

        let message = format!(
            "[checkpoint] {}: {} {} (step: {}, iter: {})",
            self.task_id,
            transition.as_str(),
            step,
            step,
            checkpoint.iteration
        );
        self.git.commit_all(&self.worktree, &message)
    }

    /// Discard the last `n` checkpoint commits and their changes.
    pub fn rollback(&self, n: u32) -> Result<()> {
        self.git.reset_hard(&self.worktree, n)
    }

    /// Create a snapshot branch `checkpoint/<task-id>/<name>` at HEAD.
    pub fn snapshot_branch(&self, name: &str) -> Result<String> {
        let branch = format!("checkpoint/{}/{}", self.task_id, name);
        self.git.branch_at_head(&self.worktree, &branch)?;
        Ok(branch)
    }

    /// Number of checkpoint commits for this task in the worktree history.
    pub fn checkpoint_commit_count(&self) -> Result<u32> {
        let pattern = format!("\\[checkpoint\\] {}:", self.task_id);
        Ok(self.git.log_grep(&self.worktree, &pattern)?.len() as u32)
    }

    /// Collapse the checkpoint commits into a single commit before the PR.
    pub fn squash(&self, message: &str) -> Result<()> {
        let count = self.checkpoint_commit_count()?;
        if count < 2 {
            return Ok(());
        }
        self.git.squash_last(&self.worktree, count, message)
    }

    /// Read the checkpoint state that was recorded at a given commit.
    pub fn checkpoint_at_commit(&self, sha: &str) -> Result<Checkpoint> {
        let json = self
            .git
            .show_file(&self.worktree, sha, STATE_FILE_NAME)
            .with_context(|| format!("No checkpoint state at commit {}", sha))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Invalid checkpoint state at commit {}", sha))
    }

    /// Latest recorded checkpoint state in the worktree, read from the state
    /// file itself.
    pub fn latest(&self) -> Result<Option<Checkpoint>> {
        let state_path = self.worktree.join(STATE_FILE_NAME);
        if !state_path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&state_path)?;
        Ok(Some(serde_json::from_str(&json).with_context(|| {
            format!("Invalid checkpoint state: {}", state_path.display())
        })?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn init_repo(dir: &Path) {
        for args in [
            vec!["init"],
            vec!["config", "user.email", "test@example.com"],
            vec!["config", "user.name", "Test User"],
        ] {
            let out = Command::new("git")
                .args(&args)
                .current_dir(dir)
                .output()
                .unwrap();
            assert!(out.status.success(), "git {:?} failed", args);
        }
        std::fs::write(dir.join("README.md"), "hello\n").unwrap();
        for args in [vec!["add", "-A"], vec!["commit", "-m", "init"]] {
            let out = Command::new("git")
                .args(&args)
                .current_dir(dir)
                .output()
                .unwrap();
            assert!(out.status.success(), "git {:?} failed", args);
        }
    }

    fn store(dir: &Path) -> GitCheckpointStore {
        let git = GitManager::new(dir).unwrap();
        GitCheckpointStore::new(git, dir, "t1")
    }

    #[test]
    fn record_commits_state_with_checkpoint_message() {
        let tmp = TempDir::new().unwrap();
        init_repo(tmp.path());
        let store = store(tmp.path());

        let mut cp = Checkpoint::new("t1", 3);
        cp.begin_step(PipelineStep::Execute);
        assert!(store.record(&cp, Transition::Begin, PipelineStep::Execute).unwrap());

        cp.complete_step(PipelineStep::Execute, None);
        std::fs::write(tmp.path().join("work.txt"), "done\n").unwrap();
        assert!(store.record(&cp, Transition::Complete, PipelineStep::Execute).unwrap());

        assert_eq!(store.checkpoint_commit_count().unwrap(), 2);

        let latest = store.latest().unwrap().unwrap();
        assert_eq!(latest.task_id, "t1");
        assert_eq!(latest.current_step, PipelineStep::Test);
    }

    #[test]
    fn rollback_discards_last_checkpoint() {
        let tmp = TempDir::new().unwrap();
        init_repo(tmp.path());
        let store = store(tmp.path());

        let cp = Checkpoint::new("t1", 3);
        store.record(&cp, Transition::Begin, PipelineStep::Execute).unwrap();
        std::fs::write(tmp.path().join("work.txt"), "v1\n").unwrap();
        store.record(&cp, Transition::Complete, PipelineStep::Execute).unwrap();

        store.rollback(1).unwrap();
        assert!(!tmp.path().join("work.txt").exists());
        assert_eq!(store.checkpoint_commit_count().unwrap(), 1);
    }

    #[test]
    fn checkpoint_at_commit_reads_history() {
        let tmp = TempDir::new().unwrap();
        init_repo(tmp.path());
        let git = GitManager::new(tmp.path()).unwrap();
        let store = GitCheckpointStore::new(git.clone(), tmp.path(), "t1");

        let mut cp = Checkpoint::new("t1", 3);
        cp.begin_step(PipelineStep::Plan);
        store.record(&cp, Transition::Begin, PipelineStep::Plan).unwrap();
        let first_sha = git.head_sha(tmp.path()).unwrap();

        cp.complete_step(PipelineStep::Plan, None);
        cp.save_state(serde_json::json!({"plan": "ready"}));
        store.record(&cp, Transition::Complete, PipelineStep::Plan).unwrap();

        let historical = store.checkpoint_at_commit(&first_sha).unwrap();
        assert_eq!(historical.current_step, PipelineStep::Plan);
        assert!(historical.state.is_none());

        let current = store.latest().unwrap().unwrap();
        assert_eq!(current.state, Some(serde_json::json!({"plan": "ready"})));
    }

    #[test]
    fn squash_collapses_checkpoint_commits() {
        let tmp = TempDir::new().unwrap();
        init_repo(tmp.path());
        let store = store(tmp.path());

        let cp = Checkpoint::new("t1", 3);
        for step in [PipelineStep::Plan, PipelineStep::Execute, PipelineStep::Review] {
            std::fs::write(tmp.path().join("work.txt"), format!("{}\n", step)).unwrap();
            store.record(&cp, Transition::Complete, step).unwrap();
        }
        assert_eq!(store.checkpoint_commit_count().unwrap(), 3);

        store.squash("implement the change").unwrap();
        assert_eq!(store.checkpoint_commit_count().unwrap(), 0);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("work.txt")).unwrap(),
            "review\n"
        );
    }

    #[test]
    fn snapshot_branch_is_created() {
        let tmp = TempDir::new().unwrap();
        init_repo(tmp.path());
        let git = GitManager::new(tmp.path()).unwrap();
        let store = GitCheckpointStore::new(git.clone(), tmp.path(), "t1");

        let cp = Checkpoint::new("t1", 3);
        store.record(&cp, Transition::Begin, PipelineStep::Plan).unwrap();

        let branch = store.snapshot_branch("before-refactor").unwrap();
        assert_eq!(branch, "checkpoint/t1/before-refactor");
        assert!(git.branch_exists(&branch));
    }
}

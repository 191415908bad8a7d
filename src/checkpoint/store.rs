//! JSON-file checkpoint store

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::Checkpoint;

/// One file per checkpoint at `<base>/<checkpoint-id>.json`
pub struct CheckpointStore {
    base_dir: PathBuf,
}

impl CheckpointStore {
    /// Store under an explicit base directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Store under the default `~/.boatman/checkpoints`.
    pub fn default_location() -> Self {
        let base = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".boatman")
            .join("checkpoints");
        Self::new(base)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", id))
    }

    /// Create and persist a fresh checkpoint for a task.
    pub fn start(&self, task_id: &str, max_iterations: u32) -> Result<Checkpoint> {
        let checkpoint = Checkpoint::new(task_id, max_iterations);
        self.save(&checkpoint)?;
        Ok(checkpoint)
    }

    /// Persist a checkpoint (directory 0755, file 0644).
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir).with_context(|| {
            format!(
                "Failed to create checkpoint directory: {}",
                self.base_dir.display()
            )
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(
                &self.base_dir,
                std::fs::Permissions::from_mode(0o755),
            );
        }

        let path = self.path_for(&checkpoint.id);
        let json = serde_json::to_string_pretty(checkpoint)
            .context("Failed to serialize checkpoint")?;

        let temp = path.with_extension("json.tmp");
        std::fs::write(&temp, json)
            .with_context(|| format!("Failed to write checkpoint: {}", temp.display()))?;
        std::fs::rename(&temp, &path)
            .with_context(|| format!("Failed to rename checkpoint: {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644));
        }

        Ok(())
    }

    /// Load a checkpoint by id.
    pub fn resume(&self, id: &str) -> Result<Checkpoint> {
        let path = self.path_for(id);
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read checkpoint: {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse checkpoint: {}", path.display()))
    }

    /// Load the most recently updated checkpoint for a task, if any.
    pub fn resume_latest(&self, task_id: &str) -> Result<Option<Checkpoint>> {
        let mut checkpoints = self.list_for_task(task_id)?;
        checkpoints.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(checkpoints.into_iter().next())
    }

    /// All stored checkpoints.
    pub fn list(&self) -> Result<Vec<Checkpoint>> {
        let mut checkpoints = Vec::new();
        if !self.base_dir.exists() {
            return Ok(checkpoints);
        }

        for entry in std::fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|json| serde_json::from_str(&json).map_err(anyhow::Error::from))
            {
                Ok(checkpoint) => checkpoints.push(checkpoint),
                Err(e) => {
                    tracing::warn!("Skipping unreadable checkpoint {}: {}", path.display(), e);
                }
            }
        }

        Ok(checkpoints)
    }

    /// Stored checkpoints for one task.
    pub fn list_for_task(&self, task_id: &str) -> Result<Vec<Checkpoint>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|c| c.task_id == task_id)
            .collect())
    }

    /// True when any checkpoint for the task has unfinished steps.
    pub fn has_incomplete(&self, task_id: &str) -> Result<bool> {
        Ok(self
            .list_for_task(task_id)?
            .iter()
            .any(|c| c.is_incomplete()))
    }

    /// Remove a checkpoint file.
    pub fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id);
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to delete checkpoint: {}", path.display()))
    }

    /// Remove checkpoints not updated within `max_age`. Returns the number
    /// removed.
    pub fn cleanup(&self, max_age: Duration) -> Result<usize> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::zero());
        let mut removed = 0;
        for checkpoint in self.list()? {
            if checkpoint.updated_at < cutoff {
                self.delete(&checkpoint.id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

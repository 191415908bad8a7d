//! Durable pipeline progress
//!
//! Progress is checkpointed at every step transition so an interrupted run
//! can resume where it left off. Two backends: JSON files under
//! `~/.boatman/checkpoints` (always available), and git commits inside the
//! worktree (preferred when one exists - see [`GitCheckpointStore`]), which
//! additionally gives rollback, snapshots, and squash before PR.

mod git_store;
mod store;

pub use git_store::{GitCheckpointStore, STATE_FILE_NAME, Transition};
pub use store::CheckpointStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The fixed pipeline steps, in execution order.
///
/// `Complete` is a terminal marker, not an executable step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStep {
    Prepare,
    Worktree,
    Plan,
    Preflight,
    Execute,
    Test,
    Review,
    Commit,
    Push,
    CreatePr,
    Complete,
}

/// Executable steps in order.
pub const STEP_ORDER: [PipelineStep; 10] = [
    PipelineStep::Prepare,
    PipelineStep::Worktree,
    PipelineStep::Plan,
    PipelineStep::Preflight,
    PipelineStep::Execute,
    PipelineStep::Test,
    PipelineStep::Review,
    PipelineStep::Commit,
    PipelineStep::Push,
    PipelineStep::CreatePr,
];

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::Prepare => "prepare",
            PipelineStep::Worktree => "worktree",
            PipelineStep::Plan => "plan",
            PipelineStep::Preflight => "preflight",
            PipelineStep::Execute => "execute",
            PipelineStep::Test => "test",
            PipelineStep::Review => "review",
            PipelineStep::Commit => "commit",
            PipelineStep::Push => "push",
            PipelineStep::CreatePr => "create-pr",
            PipelineStep::Complete => "complete",
        }
    }

    /// The step after this one. Unknown or terminal steps map to
    /// `Complete`, which resume-point logic treats as "nothing left".
    pub fn next(&self) -> PipelineStep {
        let Some(index) = STEP_ORDER.iter().position(|s| s == self) else {
            return PipelineStep::Complete;
        };
        STEP_ORDER
            .get(index + 1)
            .copied()
            .unwrap_or(PipelineStep::Complete)
    }

    /// Steps that are atomic external effects: a failure here cannot be
    /// safely reconstructed, so the checkpoint refuses to resume.
    pub fn is_atomic(&self) -> bool {
        matches!(
            self,
            PipelineStep::Commit | PipelineStep::Push | PipelineStep::CreatePr
        )
    }
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of one step invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
    Skipped,
}

/// Ledger entry for one step invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: PipelineStep,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Milliseconds from start to completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

/// Durable progress state for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// `<task-id>-<epoch-seconds>`
    pub id: String,

    pub task_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    pub current_step: PipelineStep,

    #[serde(default)]
    pub step_history: Vec<StepRecord>,

    /// Review-refactor iteration counter
    pub iteration: u32,

    pub max_iterations: u32,

    /// Opaque stage state, saved and restored verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Checkpoint {
    pub fn new(task_id: &str, max_iterations: u32) -> Self {
        let now = Utc::now();
        Self {
            id: format!("{}-{}", task_id, now.timestamp()),
            task_id: task_id.to_string(),
            worktree_path: None,
            branch: None,
            current_step: PipelineStep::Prepare,
            step_history: Vec::new(),
            iteration: 0,
            max_iterations,
            state: None,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Mark a step as started.
    pub fn begin_step(&mut self, step: PipelineStep) {
        self.step_history.push(StepRecord {
            step,
            status: StepStatus::InProgress,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            error: None,
            output: None,
        });
        self.current_step = step;
        self.updated_at = Utc::now();
    }

    /// Mark the open record for a step as complete and advance.
    pub fn complete_step(&mut self, step: PipelineStep, output: Option<serde_json::Value>) {
        let now = Utc::now();
        if let Some(record) = self.open_record(step) {
            record.status = StepStatus::Complete;
            record.completed_at = Some(now);
            record.duration_ms =
                Some((now - record.started_at).num_milliseconds().max(0) as u64);
            record.output = output;
        }
        self.current_step = step.next();
        self.updated_at = now;
    }

    /// Mark the open record for a step as failed.
    pub fn fail_step(&mut self, step: PipelineStep, error: &str) {
        let now = Utc::now();
        if let Some(record) = self.open_record(step) {
            record.status = StepStatus::Failed;
            record.completed_at = Some(now);
            record.duration_ms =
                Some((now - record.started_at).num_milliseconds().max(0) as u64);
            record.error = Some(error.to_string());
        }
        self.error = Some(error.to_string());
        self.updated_at = now;
    }

    /// Mark a step as skipped without running it.
    pub fn skip_step(&mut self, step: PipelineStep) {
        let now = Utc::now();
        self.step_history.push(StepRecord {
            step,
            status: StepStatus::Skipped,
            started_at: now,
            completed_at: Some(now),
            duration_ms: Some(0),
            error: None,
            output: None,
        });
        self.current_step = step.next();
        self.updated_at = now;
    }

    fn open_record(&mut self, step: PipelineStep) -> Option<&mut StepRecord> {
        self.step_history
            .iter_mut()
            .rev()
            .find(|r| r.step == step && r.status == StepStatus::InProgress)
    }

    /// Stash opaque stage state.
    pub fn save_state(&mut self, state: serde_json::Value) {
        self.state = Some(state);
        self.updated_at = Utc::now();
    }

    pub fn load_state(&self) -> Option<&serde_json::Value> {
        self.state.as_ref()
    }

    /// A checkpoint is resumable unless it already finished, or its last
    /// step is a failed atomic step (commit/push/create-pr), whose partial
    /// effects cannot be reconstructed.
    pub fn can_resume(&self) -> bool {
        if self.current_step == PipelineStep::Complete {
            return false;
        }
        match self.step_history.last() {
            Some(record) => !(record.step.is_atomic() && record.status == StepStatus::Failed),
            None => true,
        }
    }

    /// The step to restart from: after the last complete step, or the first
    /// step when nothing completed yet.
    pub fn resume_point(&self) -> PipelineStep {
        self.step_history
            .iter()
            .rev()
            .find(|r| r.status == StepStatus::Complete)
            .map(|r| r.step.next())
            .unwrap_or(STEP_ORDER[0])
    }

    /// True while any step is unfinished.
    pub fn is_incomplete(&self) -> bool {
        self.current_step != PipelineStep::Complete
    }
}

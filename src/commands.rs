//! CLI subcommand definitions

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline for one work item
    Run {
        /// Ticket identifier to fetch from the tracker (e.g. ENG-42)
        #[arg(long, conflicts_with_all = ["prompt", "file"])]
        ticket: Option<String>,

        /// Inline task description
        #[arg(long, conflicts_with_all = ["ticket", "file"])]
        prompt: Option<String>,

        /// Path to an instruction file
        #[arg(long, conflicts_with_all = ["ticket", "prompt"])]
        file: Option<PathBuf>,

        /// Resume from the latest resumable checkpoint for this task
        #[arg(long)]
        resume: bool,
    },

    /// Manage task worktrees
    Worktree {
        #[command(subcommand)]
        command: WorktreeCommands,
    },

    /// Manage stored checkpoints
    Checkpoints {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
}

#[derive(Subcommand)]
pub enum WorktreeCommands {
    /// List task worktrees
    List,
    /// Remove all task worktrees and their branches
    Clean,
}

#[derive(Subcommand)]
pub enum CheckpointCommands {
    /// List stored checkpoints
    List {
        /// Only checkpoints for this task
        #[arg(long)]
        task: Option<String>,
    },
    /// Delete checkpoints older than the given age
    Cleanup {
        /// Maximum age in days
        #[arg(long, default_value_t = 7)]
        max_age_days: u64,
    },
}

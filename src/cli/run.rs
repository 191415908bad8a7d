//! `boatman run` - drive the pipeline for one work item

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

use crate::agent::cancel_pair;
use crate::config;
use crate::domain::{EventSink, WorkOutcome};
use crate::git::{GitManager, find_git_root};
use crate::pipeline::{Pipeline, TaskInput};

pub struct RunArgs {
    pub ticket: Option<String>,
    pub prompt: Option<String>,
    pub file: Option<PathBuf>,
    pub resume: bool,
}

/// Exit code for the process: 0 on success, 1 otherwise.
pub async fn run_command(
    work_dir: &Path,
    config_path: Option<&PathBuf>,
    args: RunArgs,
) -> Result<i32> {
    let input = match (args.ticket, args.prompt, args.file) {
        (Some(ticket), None, None) => TaskInput::Ticket(ticket),
        (None, Some(prompt), None) => TaskInput::Prompt(prompt),
        (None, None, Some(file)) => TaskInput::File(file),
        _ => bail!("exactly one of --ticket, --prompt, or --file is required"),
    };

    let config = config::load_config(config_path.map(|p| p.as_path()))?;

    let repo_root = find_git_root(work_dir)
        .with_context(|| format!("{} is not inside a git repository", work_dir.display()))?;
    let git = GitManager::new(repo_root)?;

    let pipeline = Pipeline::new(config, git, EventSink::stdout());

    // Ctrl-C flips the root cancellation signal; everything downstream
    // (subprocesses included) winds down from there.
    let (cancel_tx, cancel) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; cancelling the pipeline");
            let _ = cancel_tx.send(true);
        }
    });

    let result = pipeline.work(input, args.resume, &cancel).await;

    eprintln!();
    eprintln!("{}", result.message);
    if let Some(url) = &result.pr_url {
        eprintln!("PR: {}", url);
    }
    eprintln!(
        "iterations: {}, tests: {}",
        result.iterations,
        if result.tests_passed { "passing" } else { "failing" }
    );

    Ok(match result.outcome {
        WorkOutcome::Success => 0,
        WorkOutcome::MaxIterations | WorkOutcome::Fatal => 1,
    })
}

//! Execution stage agent

use anyhow::Result;
use std::path::Path;

use super::claude::{ClaudeAdapter, LlmRequest, OutputFormat};
use super::{CancelSignal, CostTracker};
use crate::context::{ExecutionHandoff, Handoff};
use crate::domain::{ExecutionResult, Task};
use crate::git::GitManager;

const EXECUTOR_SYSTEM_PROMPT: &str = "\
You are implementing a code change in the repository you are running in. \
Make the change described in the task, following the existing conventions \
of the codebase. Edit files directly. Keep the change minimal and focused. \
Do not commit.";

/// Drives the LLM subprocess that implements the change
pub struct Executor<'a> {
    adapter: &'a ClaudeAdapter,
    git: &'a GitManager,
    costs: &'a CostTracker,
    context_budget: usize,
    enable_tools: bool,
}

impl<'a> Executor<'a> {
    pub fn new(
        adapter: &'a ClaudeAdapter,
        git: &'a GitManager,
        costs: &'a CostTracker,
        context_budget: usize,
        enable_tools: bool,
    ) -> Self {
        Self {
            adapter,
            git,
            costs,
            context_budget,
            enable_tools,
        }
    }

    /// Run the executor in the worktree. The changed-file list is always
    /// recomputed from git, never taken from the subprocess's own account
    /// of what it did.
    pub async fn execute(
        &self,
        task: &Task,
        plan_summary: Option<String>,
        worktree: &Path,
        cancel: &CancelSignal,
    ) -> Result<ExecutionResult> {
        let handoff = ExecutionHandoff::new(task, plan_summary);
        let prompt = handoff.for_token_budget(self.context_budget);

        let request = LlmRequest {
            prompt,
            system_prompt: Some(EXECUTOR_SYSTEM_PROMPT.to_string()),
            agent: None,
            model: None,
            output_format: OutputFormat::StreamJson,
            enable_tools: self.enable_tools,
        };

        let response = self.adapter.run(&request, worktree, cancel).await?;
        if let Some(cost) = response.cost {
            self.costs.record("execute", cost);
        }

        let files_changed = self.git.changed_files(worktree)?;
        if files_changed.is_empty() {
            tracing::warn!(
                "Executor finished without changing any files (response was {} chars)",
                response.text.len()
            );
        }

        Ok(ExecutionResult {
            success: !files_changed.is_empty(),
            files_changed,
            summary: first_paragraph(&response.text, 500),
            error: None,
        })
    }
}

fn first_paragraph(text: &str, max_chars: usize) -> String {
    let mut out = String::new();
    for line in text.lines() {
        if line.trim().is_empty() && !out.is_empty() {
            break;
        }
        out.push_str(line);
        out.push('\n');
        if out.len() >= max_chars {
            break;
        }
    }
    out.trim().chars().take(max_chars).collect()
}

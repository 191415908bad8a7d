//! Refactor stage agent

use anyhow::Result;
use std::path::{Path, PathBuf};

use super::claude::{ClaudeAdapter, LlmRequest, OutputFormat};
use super::{CancelSignal, CostTracker};
use crate::context::{Handoff, RefactorHandoff};
use crate::git::GitManager;

const REFACTOR_SYSTEM_PROMPT: &str = "\
You are fixing review findings in the repository you are running in. \
Address every numbered issue; do not rework anything the review did not \
flag. Follow the reviewer's guidance and the project rules. Edit files \
directly. Do not commit.";

/// Drives the LLM subprocess that fixes review findings
pub struct Refactor<'a> {
    adapter: &'a ClaudeAdapter,
    git: &'a GitManager,
    costs: &'a CostTracker,
    context_budget: usize,
    enable_tools: bool,
}

impl<'a> Refactor<'a> {
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

    /// Run one refactor pass. Returns the files changed according to git.
    pub async fn run(
        &self,
        iteration: u32,
        handoff: &RefactorHandoff,
        worktree: &Path,
        cancel: &CancelSignal,
    ) -> Result<Vec<PathBuf>> {
        let prompt = handoff.for_token_budget(self.context_budget);

        let request = LlmRequest {
            prompt,
            system_prompt: Some(REFACTOR_SYSTEM_PROMPT.to_string()),
            agent: None,
            model: None,
            output_format: OutputFormat::StreamJson,
            enable_tools: self.enable_tools,
        };

        let response = self.adapter.run(&request, worktree, cancel).await?;
        if let Some(cost) = response.cost {
            self.costs.record(&format!("refactor-{}", iteration), cost);
        }

        let files_changed = self.git.changed_files(worktree)?;
        if files_changed.is_empty() {
            tracing::warn!(
                "Refactor iteration {} changed no files ({} issues pending)",
                iteration,
                handoff.issues.len()
            );
        }
        Ok(files_changed)
    }
}

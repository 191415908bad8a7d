//! Review stage agent

use anyhow::Result;
use std::path::{Path, PathBuf};

use super::claude::{ClaudeAdapter, LlmRequest, OutputFormat};
use super::{CancelSignal, CostTracker, is_permanent};
use crate::context::{Handoff, ReviewHandoff};
use crate::domain::{ReviewResult, ReviewThresholds};

/// Fallback system prompt when the configured review skill is absent.
const BUILTIN_REVIEW_PROMPT: &str = "\
You are a strict but fair code reviewer. Review the diff against the task \
description. Answer with a JSON object: {\"passed\": bool, \"score\": 0-100, \
\"summary\": string, \"issues\": [{\"severity\": \"critical\"|\"major\"|\"minor\", \
\"file\": string?, \"line\": number?, \"description\": string, \
\"suggestion\": string?}], \"praise\": [string], \"guidance\": string}. \
Raise an issue only for problems in the diff, not pre-existing ones.";

/// Drives one review pass over the current diff
pub struct Reviewer<'a> {
    adapter: &'a ClaudeAdapter,
    costs: &'a CostTracker,
    review_skill: String,
    review_budget: usize,
    thresholds: ReviewThresholds,
}

impl<'a> Reviewer<'a> {
    pub fn new(
        adapter: &'a ClaudeAdapter,
        costs: &'a CostTracker,
        review_skill: impl Into<String>,
        review_budget: usize,
        thresholds: ReviewThresholds,
    ) -> Self {
        Self {
            adapter,
            costs,
            review_skill: review_skill.into(),
            review_budget,
            thresholds,
        }
    }

    /// Review the diff. Tries the configured skill first; when the CLI
    /// rejects the skill as unknown, falls back to the built-in prompt.
    pub async fn review(
        &self,
        iteration: u32,
        task_summary: &str,
        diff: &str,
        changed_files: &[PathBuf],
        worktree: &Path,
        cancel: &CancelSignal,
    ) -> Result<ReviewResult> {
        let handoff = ReviewHandoff {
            task_summary: task_summary.to_string(),
            diff: diff.to_string(),
            changed_files: changed_files.to_vec(),
        };
        let prompt = handoff.for_token_budget(self.review_budget);

        let mut request = LlmRequest {
            prompt,
            system_prompt: None,
            agent: (!self.review_skill.is_empty()).then(|| self.review_skill.clone()),
            model: None,
            output_format: OutputFormat::Text,
            enable_tools: false,
        };

        let response = match self.adapter.run(&request, worktree, cancel).await {
            Ok(response) => response,
            Err(err) if is_skill_missing(&err) => {
                tracing::warn!(
                    "Review skill '{}' not available, using built-in prompt",
                    self.review_skill
                );
                request.agent = None;
                request.system_prompt = Some(BUILTIN_REVIEW_PROMPT.to_string());
                self.adapter.run(&request, worktree, cancel).await?
            }
            Err(err) => return Err(err),
        };

        if let Some(cost) = response.cost {
            self.costs.record(&format!("review-{}", iteration), cost);
        }

        Ok(ReviewResult::parse(&response.text, &self.thresholds))
    }
}

/// A permanent subprocess error complaining about the agent name means the
/// skill is not installed.
fn is_skill_missing(err: &anyhow::Error) -> bool {
    if !is_permanent(err) {
        return false;
    }
    let text = format!("{:#}", err).to_lowercase();
    text.contains("agent") && (text.contains("not found") || text.contains("unknown"))
}

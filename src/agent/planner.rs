//! Planning stage agent

use anyhow::Result;
use std::path::Path;

use super::claude::{ClaudeAdapter, LlmRequest, OutputFormat};
use super::{CancelSignal, CostTracker};
use crate::domain::{Plan, Task};

const PLANNER_SYSTEM_PROMPT: &str = "\
You are a senior engineer planning a code change. Explore the repository \
structure conceptually from the task description and produce a plan with \
these sections: Summary, Approach (numbered steps), Relevant Files, \
Relevant Directories, Existing Patterns, Warnings. Be specific about file \
paths. Do not write code.";

/// Produces a plan for a task by asking the LLM to study the change
pub struct Planner<'a> {
    adapter: &'a ClaudeAdapter,
    costs: &'a CostTracker,
    plan_budget: usize,
}

impl<'a> Planner<'a> {
    pub fn new(adapter: &'a ClaudeAdapter, costs: &'a CostTracker, plan_budget: usize) -> Self {
        Self {
            adapter,
            costs,
            plan_budget,
        }
    }

    /// Run the planner. Failures here are recoverable: the pipeline
    /// continues without a plan.
    pub async fn plan(
        &self,
        task: &Task,
        worktree: &Path,
        cancel: &CancelSignal,
    ) -> Result<Plan> {
        let prompt = format!(
            "Plan the following change.\n\nTask: {}\n\n{}",
            task.title, task.description
        );

        let request = LlmRequest {
            prompt,
            system_prompt: Some(PLANNER_SYSTEM_PROMPT.to_string()),
            agent: None,
            model: None,
            output_format: OutputFormat::Text,
            enable_tools: false,
        };

        let response = self.adapter.run(&request, worktree, cancel).await?;
        if let Some(cost) = response.cost {
            self.costs.record("plan", cost);
        }

        let plan = Plan::parse(&response.text);
        tracing::debug!(
            "Planner produced {} steps, {} files ({} token budget)",
            plan.approach.len(),
            plan.relevant_files.len(),
            self.plan_budget
        );
        Ok(plan)
    }

    /// Plan summary shaped for downstream handoffs.
    pub fn summary_for_handoff(&self, plan: &Plan) -> String {
        let mut out = plan.summary.clone();
        if !plan.approach.is_empty() {
            out.push_str("\n\nApproach:\n");
            for (i, step) in plan.approach.iter().enumerate() {
                out.push_str(&format!("{}. {}\n", i + 1, step));
            }
        }
        if !plan.warnings.is_empty() {
            out.push_str("\nWarnings:\n");
            for warning in &plan.warnings {
                out.push_str(&format!("- {}\n", warning));
            }
        }
        crate::context::Compressor::new().compress(
            &[crate::context::ContentBlock::new("approach", out)],
            self.plan_budget,
        )
    }
}

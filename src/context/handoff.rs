//! Stage handoffs
//!
//! A handoff is the structured context one stage passes to the next. Every
//! variant can render itself in full, concisely, or squeezed into a token
//! budget via the compression engine.

use std::path::PathBuf;

use super::compress::{Compressor, ContentBlock};
use crate::domain::{Issue, Task};

/// Common rendering surface for all handoff variants
pub trait Handoff {
    /// Stable type tag, e.g. "execution", "refactor"
    fn handoff_type(&self) -> &'static str;

    /// Content blocks in presentation order
    fn blocks(&self) -> Vec<ContentBlock>;

    /// Everything, uncompressed.
    fn full(&self) -> String {
        self.blocks()
            .iter()
            .map(|b| b.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// A short rendering for logs and progress events.
    fn concise(&self) -> String {
        self.for_token_budget(250)
    }

    /// Rendering guaranteed to approximate the token budget.
    fn for_token_budget(&self, budget: usize) -> String {
        Compressor::new().compress(&self.blocks(), budget)
    }
}

/// Context for the executor stage: the task itself
#[derive(Debug, Clone)]
pub struct ExecutionHandoff {
    pub task_title: String,
    pub description: String,
    pub labels: Vec<String>,
    pub plan_summary: Option<String>,
}

impl ExecutionHandoff {
    pub fn new(task: &Task, plan_summary: Option<String>) -> Self {
        Self {
            task_title: task.title.clone(),
            description: task.description.clone(),
            labels: task.labels.clone(),
            plan_summary,
        }
    }
}

impl Handoff for ExecutionHandoff {
    fn handoff_type(&self) -> &'static str {
        "execution"
    }

    fn blocks(&self) -> Vec<ContentBlock> {
        let mut blocks = vec![
            ContentBlock::new("requirements", format!("Task: {}", self.task_title)).required(),
            ContentBlock::new("requirements", self.description.clone()).required(),
        ];
        if !self.labels.is_empty() {
            blocks.push(ContentBlock::new(
                "context",
                format!("Labels: {}", self.labels.join(", ")),
            ));
        }
        if let Some(plan) = &self.plan_summary {
            blocks.push(ContentBlock::new("approach", plan.clone()));
        }
        blocks
    }
}

/// Context for a review pass: what changed
#[derive(Debug, Clone)]
pub struct ReviewHandoff {
    pub task_summary: String,
    pub diff: String,
    pub changed_files: Vec<PathBuf>,
}

impl Handoff for ReviewHandoff {
    fn handoff_type(&self) -> &'static str {
        "review"
    }

    fn blocks(&self) -> Vec<ContentBlock> {
        let files = self
            .changed_files
            .iter()
            .map(|p| format!("- {}", p.display()))
            .collect::<Vec<_>>()
            .join("\n");
        vec![
            ContentBlock::new("requirements", self.task_summary.clone()).required(),
            ContentBlock::new("files", format!("Changed files:\n{}", files)),
            ContentBlock::new("diff", self.diff.clone()).required(),
        ]
    }
}

/// Context for the refactor agent: what to fix and where
#[derive(Debug, Clone, Default)]
pub struct RefactorHandoff {
    pub requirements: String,
    pub issues: Vec<Issue>,
    pub guidance: String,
    pub files: Vec<PathBuf>,
    /// Current contents (possibly summarized) of the files under repair
    pub current_code: Vec<(PathBuf, String)>,
    /// Project rules loaded from the repository
    pub project_rules: String,
}

impl Handoff for RefactorHandoff {
    fn handoff_type(&self) -> &'static str {
        "refactor"
    }

    fn blocks(&self) -> Vec<ContentBlock> {
        let mut blocks = Vec::new();

        if !self.requirements.is_empty() {
            blocks.push(ContentBlock::new("requirements", self.requirements.clone()).required());
        }

        let numbered = self
            .issues
            .iter()
            .enumerate()
            .map(|(i, issue)| {
                let location = match (&issue.file, issue.line) {
                    (Some(file), Some(line)) => format!(" ({}:{})", file, line),
                    (Some(file), None) => format!(" ({})", file),
                    _ => String::new(),
                };
                format!(
                    "{}. [{}]{} {}",
                    i + 1,
                    issue.severity,
                    location,
                    issue.description
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        blocks.push(ContentBlock::new("issues", format!("Issues to address:\n{}", numbered)).required());

        if !self.guidance.is_empty() {
            blocks.push(ContentBlock::new("guidance", self.guidance.clone()));
        }

        if !self.files.is_empty() {
            let files = self
                .files
                .iter()
                .map(|p| format!("- {}", p.display()))
                .collect::<Vec<_>>()
                .join("\n");
            blocks.push(ContentBlock::new("files", files));
        }

        for (path, code) in &self.current_code {
            blocks.push(ContentBlock::new(
                "code",
                format!("=== {} ===\n{}", path.display(), code),
            ));
        }

        if !self.project_rules.is_empty() {
            blocks.push(ContentBlock::new("context", self.project_rules.clone()));
        }

        blocks
    }
}

/// Several handoffs concatenated, each given an even share of the budget
pub struct CompoundHandoff {
    pub parts: Vec<Box<dyn Handoff + Send + Sync>>,
}

impl Handoff for CompoundHandoff {
    fn handoff_type(&self) -> &'static str {
        "compound"
    }

    fn blocks(&self) -> Vec<ContentBlock> {
        self.parts.iter().flat_map(|p| p.blocks()).collect()
    }

    fn for_token_budget(&self, budget: usize) -> String {
        let share = budget / self.parts.len().max(1);
        self.parts
            .iter()
            .map(|p| p.for_token_budget(share))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A handoff plus the chain that led to it, for debugging
pub struct PipelineHandoff {
    pub current: Box<dyn Handoff + Send + Sync>,
    pub history: Vec<String>,
}

impl Handoff for PipelineHandoff {
    fn handoff_type(&self) -> &'static str {
        "pipeline"
    }

    fn blocks(&self) -> Vec<ContentBlock> {
        let mut blocks = self.current.blocks();
        if !self.history.is_empty() {
            blocks.push(ContentBlock::new(
                "context",
                format!("Earlier stages:\n{}", self.history.join("\n")),
            ));
        }
        blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::compress::estimate_tokens;
    use crate::domain::Severity;

    fn refactor_handoff() -> RefactorHandoff {
        RefactorHandoff {
            requirements: "Add the /healthz endpoint".to_string(),
            issues: vec![
                Issue::new(Severity::Major, "missing timestamp field").in_file("server/routes.go"),
                Issue::new(Severity::Minor, "rename the helper"),
            ],
            guidance: "Keep the handler small.".to_string(),
            files: vec![PathBuf::from("server/routes.go")],
            current_code: vec![(PathBuf::from("server/routes.go"), "func Routes() {}".into())],
            project_rules: String::new(),
        }
    }

    #[test]
    fn refactor_handoff_numbers_issues() {
        let full = refactor_handoff().full();
        assert!(full.contains("1. [major] (server/routes.go) missing timestamp field"));
        assert!(full.contains("2. [minor] rename the helper"));
        assert!(full.contains("Keep the handler small."));
        assert!(full.contains("=== server/routes.go ==="));
    }

    #[test]
    fn execution_handoff_carries_task_and_labels() {
        let mut task = Task::from_prompt("# Ship it\nbody");
        task.labels = vec!["bug".to_string()];
        let handoff = ExecutionHandoff::new(&task, Some("plan summary".to_string()));
        let full = handoff.full();
        assert!(full.contains("Task: Ship it"));
        assert!(full.contains("Labels: bug"));
        assert!(full.contains("plan summary"));
    }

    #[test]
    fn budgeted_rendering_keeps_issues_over_code() {
        let mut handoff = refactor_handoff();
        handoff.current_code = vec![(
            PathBuf::from("big.rs"),
            "let filler = 0; // padding\n".repeat(2000),
        )];

        let out = handoff.for_token_budget(200);
        assert!(
            estimate_tokens(&out) <= 240,
            "over budget: {}",
            estimate_tokens(&out)
        );
        assert!(
            out.contains("missing timestamp field") || out.contains("[issues]"),
            "issues lost: {}",
            out
        );
    }

    #[test]
    fn compound_splits_budget_evenly() {
        let compound = CompoundHandoff {
            parts: vec![
                Box::new(refactor_handoff()),
                Box::new(refactor_handoff()),
            ],
        };
        let out = compound.for_token_budget(400);
        // Both halves render something.
        assert_eq!(out.matches("Add the /healthz endpoint").count() + out.matches("[requirements]").count(), 2);
    }

    #[test]
    fn unbounded_budget_equals_full() {
        let handoff = refactor_handoff();
        assert_eq!(handoff.full(), handoff.for_token_budget(usize::MAX / 8));
    }

    #[test]
    fn pipeline_handoff_appends_history() {
        let handoff = PipelineHandoff {
            current: Box::new(refactor_handoff()),
            history: vec!["planner: summarized".to_string(), "executor: 2 files".to_string()],
        };
        let full = handoff.full();
        assert!(full.contains("Add the /healthz endpoint"));
        assert!(full.contains("Earlier stages:"));
        assert!(full.contains("executor: 2 files"));
        assert_eq!(handoff.handoff_type(), "pipeline");
    }
}

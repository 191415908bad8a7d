//! Task - the unit of work driven through the pipeline
//!
//! A task arrives from one of three sources: an upstream ticket, an inline
//! prompt, or an instruction file. All variants expose the same surface
//! (id, title, description, branch name, labels) so downstream stages never
//! branch on the source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where a task came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    Ticket,
    Prompt,
    File,
}

impl std::fmt::Display for TaskSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskSource::Ticket => write!(f, "ticket"),
            TaskSource::Prompt => write!(f, "prompt"),
            TaskSource::File => write!(f, "file"),
        }
    }
}

/// Provenance metadata carried alongside every task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Source the task was created from
    pub source: TaskSource,

    /// When the task object was created locally
    pub created_at: DateTime<Utc>,

    /// Path of the instruction file, for file-sourced tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
}

/// A unit of work: one task per pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Stable identifier (ticket identifier, or generated for prompts)
    pub id: String,

    /// Human-readable title
    pub title: String,

    /// Full description the planner and executor work from
    pub description: String,

    /// Branch name from the upstream tracker, if it provided one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,

    /// Labels from the upstream tracker
    #[serde(default)]
    pub labels: Vec<String>,

    pub metadata: TaskMetadata,
}

impl Task {
    /// Create a task from an upstream ticket.
    pub fn from_ticket(
        identifier: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        branch_name: Option<String>,
        labels: Vec<String>,
    ) -> Self {
        Self {
            id: identifier.into(),
            title: nonempty_title(title.into()),
            description: description.into(),
            branch_name,
            labels,
            metadata: TaskMetadata {
                source: TaskSource::Ticket,
                created_at: Utc::now(),
                file_path: None,
            },
        }
    }

    /// Create a task from an inline prompt.
    ///
    /// The id is generated as `prompt-<yyyymmdd-hhmmss>-<6-hex>` and the
    /// title is extracted from the first markdown heading, falling back to
    /// the first line truncated to 50 characters.
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        let description = prompt.into();
        let suffix: String = uuid::Uuid::new_v4().simple().to_string()[..6].to_string();
        let id = format!("prompt-{}-{}", Utc::now().format("%Y%m%d-%H%M%S"), suffix);

        Self {
            title: extract_title(&description),
            id,
            description,
            branch_name: None,
            labels: Vec::new(),
            metadata: TaskMetadata {
                source: TaskSource::Prompt,
                created_at: Utc::now(),
                file_path: None,
            },
        }
    }

    /// Create a task by loading an instruction file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let description = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read task file: {}", path.display()))?;

        let mut task = Self::from_prompt(description);
        task.metadata.source = TaskSource::File;
        task.metadata.file_path = Some(path.to_path_buf());
        Ok(task)
    }

    /// Branch name for this task: the tracker-provided one, or
    /// `<id>-<title>` run through [`sanitize_branch_name`].
    pub fn branch(&self) -> String {
        match &self.branch_name {
            Some(name) => name.clone(),
            None => sanitize_branch_name(&format!("{}-{}", self.id, self.title)),
        }
    }
}

/// Extract a title from free-form task text.
///
/// Prefers the first markdown heading; otherwise the first non-empty line,
/// truncated to 50 characters.
fn extract_title(text: &str) -> String {
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let title = trimmed.trim_start_matches('#').trim();
        if title.is_empty() {
            continue;
        }
        return truncate_chars(title, 50);
    }
    "Untitled task".to_string()
}

fn nonempty_title(title: String) -> String {
    if title.trim().is_empty() {
        "Untitled task".to_string()
    } else {
        title
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Sanitize a string into a git-safe branch name.
///
/// Lower-cases, maps spaces, slashes, and colons to `-`, strips everything
/// outside `[a-z0-9_-]`, collapses runs of `-`, trims `-` from the edges,
/// and truncates to 30 characters. Falls back to `"untitled"` when nothing
/// survives.
pub fn sanitize_branch_name(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.to_lowercase().chars() {
        match c {
            ' ' | '/' | ':' => out.push('-'),
            'a'..='z' | '0'..='9' | '_' | '-' => out.push(c),
            _ => {}
        }
    }

    let mut collapsed = String::with_capacity(out.len());
    let mut prev_dash = false;
    for c in out.chars() {
        if c == '-' {
            if !prev_dash {
                collapsed.push('-');
            }
            prev_dash = true;
        } else {
            collapsed.push(c);
            prev_dash = false;
        }
    }

    let trimmed = collapsed.trim_matches('-');
    let truncated: String = trimmed.chars().take(30).collect();
    let result = truncated.trim_matches('-').to_string();

    if result.is_empty() {
        "untitled".to_string()
    } else {
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_task_title_from_heading() {
        let task = Task::from_prompt("# Add /healthz endpoint\n\nDetails here.");
        assert_eq!(task.title, "Add /healthz endpoint");
        assert!(task.id.starts_with("prompt-"));
        assert_eq!(task.metadata.source, TaskSource::Prompt);
    }

    #[test]
    fn prompt_task_title_from_first_line_truncated() {
        let long = "x".repeat(80);
        let task = Task::from_prompt(long.clone());
        assert_eq!(task.title.chars().count(), 50);
        assert!(long.starts_with(&task.title));
    }

    #[test]
    fn empty_prompt_gets_default_title() {
        let task = Task::from_prompt("");
        assert_eq!(task.title, "Untitled task");
    }

    #[test]
    fn prompt_id_format() {
        let task = Task::from_prompt("do a thing");
        // prompt-YYYYMMDD-HHMMSS-xxxxxx
        let parts: Vec<&str> = task.id.splitn(2, '-').collect();
        assert_eq!(parts[0], "prompt");
        let rest = parts[1];
        assert_eq!(rest.len(), "20240101-120000-abc123".len());
    }

    #[test]
    fn ticket_task_keeps_provided_branch() {
        let task = Task::from_ticket(
            "ENG-42",
            "Fix login",
            "desc",
            Some("eng-42-fix-login".to_string()),
            vec!["bug".to_string()],
        );
        assert_eq!(task.branch(), "eng-42-fix-login");
        assert_eq!(task.labels, vec!["bug"]);
    }

    #[test]
    fn computed_branch_is_sanitized() {
        let task = Task::from_ticket("ENG-7", "Fix: The Thing / Again", "d", None, vec![]);
        let branch = task.branch();
        assert!(
            regex::Regex::new("^[a-z0-9][a-z0-9_-]{0,29}$")
                .unwrap()
                .is_match(&branch),
            "bad branch: {}",
            branch
        );
    }

    #[test]
    fn sanitize_maps_separators_and_collapses() {
        assert_eq!(sanitize_branch_name("Fix: a/b thing"), "fix-a-b-thing");
        assert_eq!(sanitize_branch_name("a   b"), "a-b");
        assert_eq!(sanitize_branch_name("--edge--"), "edge");
    }

    #[test]
    fn sanitize_truncates_to_30() {
        let out = sanitize_branch_name(&"a".repeat(64));
        assert_eq!(out.len(), 30);
    }

    #[test]
    fn sanitize_fallback_untitled() {
        assert_eq!(sanitize_branch_name("!!!"), "untitled");
        assert_eq!(sanitize_branch_name(""), "untitled");
        assert_eq!(sanitize_branch_name("Ünïcödé"), "ncd");
    }

    #[test]
    fn file_task_records_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task.md");
        std::fs::write(&path, "# From file\nbody").unwrap();

        let task = Task::from_file(&path).unwrap();
        assert_eq!(task.title, "From file");
        assert_eq!(task.metadata.source, TaskSource::File);
        assert_eq!(task.metadata.file_path.as_deref(), Some(path.as_path()));
    }
}

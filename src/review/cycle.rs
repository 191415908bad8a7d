//! The review-refactor loop
//!
//! Stage seven of the pipeline: iterate until the review verdict is
//! "passed" with green tests, or the iteration budget runs out. The issue
//! tracker keeps repeated reviews from thrashing on rephrased findings; the
//! diff verifier keeps the loop honest about whether a refactor actually
//! touched what it was asked to touch.

use anyhow::Result;
use std::path::{Path, PathBuf};

use super::tracker::{IssueStats, IssueTracker};
use super::verifier::DiffVerifier;
use crate::agent::{CancelSignal, Refactor, Reviewer, TestRunner};
use crate::context::{ContextPinner, FileContext, RefactorHandoff, summarize};
use crate::domain::{
    EventData, EventSink, Issue, PipelineEvent, ReviewResult, Severity, Task, TestResult,
};
use crate::git::GitManager;

/// Files above this many lines are summarized in refactor handoffs.
const MAX_FULL_FILE_LINES: usize = 200;

/// Most files included in one refactor handoff.
const MAX_HANDOFF_FILES: usize = 10;

/// Combined size cap for project rules.
const MAX_PROJECT_RULES_BYTES: usize = 50 * 1024;

/// How the loop ended
#[derive(Debug, Clone)]
pub struct ReviewCycleOutcome {
    pub passed: bool,
    /// Iterations consumed (0 when the budget was zero)
    pub iterations: u32,
    pub tests_passed: bool,
    pub final_review: ReviewResult,
    pub stats: IssueStats,
}

/// The loop driver
pub struct ReviewCycle<'a> {
    pub reviewer: &'a Reviewer<'a>,
    pub refactor: &'a Refactor<'a>,
    pub git: &'a GitManager,
    pub events: &'a EventSink,
    pub pinner: &'a ContextPinner,
    pub max_iterations: u32,
    pub min_confidence: u8,
}

impl<'a> ReviewCycle<'a> {
    /// Run the loop. `initial_review` comes from the stage-six parallel
    /// fork, with any test failure already folded in by the caller.
    pub async fn run(
        &self,
        task: &Task,
        worktree: &Path,
        base_branch: &str,
        initial_review: ReviewResult,
        initial_tests: &TestResult,
        cancel: &CancelSignal,
    ) -> Result<ReviewCycleOutcome> {
        let mut tracker = IssueTracker::new();
        let verifier = DiffVerifier::new();
        let mut review = initial_review;
        let mut tests_passed = initial_tests.passed;
        let mut iterations = 0;

        for iteration in 1..=self.max_iterations {
            iterations = iteration;
            self.events.emit(&PipelineEvent::progress(format!(
                "Review & refactor iteration {} of {}",
                iteration, self.max_iterations
            )));

            if iteration > 1 {
                review = self.fresh_review(task, worktree, base_branch, iteration, cancel).await?;
            }

            if review.passed {
                let tests = TestRunner::run(worktree, cancel).await?;
                tests_passed = tests.passed;
                if tests.passed {
                    tracker.track(&review.issues);
                    return Ok(ReviewCycleOutcome {
                        passed: true,
                        iterations,
                        tests_passed: true,
                        final_review: review,
                        stats: tracker.stats(),
                    });
                }
                tracing::warn!(
                    "Tests regressed after review passed ({} framework)",
                    tests.framework.as_deref().unwrap_or("unknown")
                );
                review.passed = false;
                review.issues.push(synthetic_test_issue(&tests));
            }

            tracker.track(&review.issues);
            let open_issues: Vec<Issue> = tracker
                .unaddressed_issues()
                .iter()
                .map(|t| t.issue.clone())
                .collect();

            let handoff = self.build_refactor_handoff(task, &review, &open_issues, worktree);

            let refactor_id = format!("refactor-{}-{}", iteration, task.id);
            self.events.emit(&PipelineEvent::started(
                &refactor_id,
                "refactor",
                format!("Fix {} open issues", open_issues.len()),
            ));

            // Pin the files under repair so out-of-band drift is caught and
            // sibling agents cannot edit the same set.
            let pinned = if handoff.files.is_empty() {
                false
            } else {
                match self.pinner.pin(&refactor_id, &handoff.files, true) {
                    Ok(_) => true,
                    Err(err) => {
                        tracing::warn!("Could not pin refactor files: {:#}", err);
                        false
                    }
                }
            };

            let old_diff = self.git.diff_against(worktree, base_branch)?;
            let refactor_result = self
                .refactor
                .run(iteration, &handoff, worktree, cancel)
                .await;

            match refactor_result {
                Ok(files_changed) => {
                    if pinned {
                        // Stale pins on files the refactor did not itself
                        // change mean something else wrote to them mid-edit.
                        if let Ok(verification) = self.pinner.verify_pin(&refactor_id) {
                            for stale in &verification.stale {
                                if !files_changed.contains(stale) {
                                    tracing::warn!(
                                        "Integrity: {} changed outside the refactor agent",
                                        stale.display()
                                    );
                                }
                            }
                        }
                        self.pinner.unpin(&refactor_id);
                    }

                    let new_diff = self.git.diff_against(worktree, base_branch)?;
                    let report = verifier.verify(&open_issues, &old_diff, &new_diff);
                    if !report.meets(self.min_confidence) {
                        tracing::warn!(
                            "Refactor verification confidence {} below threshold {} \
                             ({} of {} issues show evidence)",
                            report.confidence,
                            self.min_confidence,
                            report.addressed_count(),
                            report.verdicts.len()
                        );
                    }
                    for new_issue in &report.new_issues {
                        tracing::warn!("Refactor introduced: {}", new_issue.message);
                    }

                    self.git.stage_all(worktree)?;
                    self.events.emit(&PipelineEvent::completed_with(
                        &refactor_id,
                        "refactor",
                        true,
                        EventData {
                            refactor_diff: Some(new_diff),
                            ..Default::default()
                        },
                    ));
                }
                Err(err) => {
                    if pinned {
                        self.pinner.unpin(&refactor_id);
                    }
                    self.events
                        .emit(&PipelineEvent::completed(&refactor_id, "refactor", false));
                    return Err(err);
                }
            }
        }

        Ok(ReviewCycleOutcome {
            passed: false,
            iterations,
            tests_passed,
            final_review: review,
            stats: tracker.stats(),
        })
    }

    async fn fresh_review(
        &self,
        task: &Task,
        worktree: &Path,
        base_branch: &str,
        iteration: u32,
        cancel: &CancelSignal,
    ) -> Result<ReviewResult> {
        let review_id = format!("review-{}-{}", iteration, task.id);
        self.events.emit(&PipelineEvent::started(
            &review_id,
            "reviewer",
            format!("Review iteration {}", iteration),
        ));

        let diff = self.git.diff_against(worktree, base_branch)?;
        let changed_files = self.git.changed_files(worktree)?;
        let result = self
            .reviewer
            .review(iteration, &task.title, &diff, &changed_files, worktree, cancel)
            .await;

        match result {
            Ok(review) => {
                self.events.emit(&PipelineEvent::completed_with(
                    &review_id,
                    "reviewer",
                    review.passed,
                    EventData {
                        issues: Some(review.issues.clone()),
                        feedback: Some(review.guidance.clone()),
                        ..Default::default()
                    },
                ));
                Ok(review)
            }
            Err(err) => {
                self.events
                    .emit(&PipelineEvent::completed(&review_id, "reviewer", false));
                Err(err)
            }
        }
    }

    fn build_refactor_handoff(
        &self,
        task: &Task,
        review: &ReviewResult,
        open_issues: &[Issue],
        worktree: &Path,
    ) -> RefactorHandoff {
        let files = collect_issue_files(open_issues, worktree);
        let current_code = files
            .iter()
            .filter_map(|file| {
                let content = std::fs::read_to_string(worktree.join(file)).ok()?;
                let rendered = match summarize(file, &content, MAX_FULL_FILE_LINES) {
                    FileContext::Full(text) => text,
                    FileContext::Summary(summary) => summary.to_summary_string(),
                };
                Some((file.clone(), rendered))
            })
            .collect();

        RefactorHandoff {
            requirements: format!("Task: {}\n\n{}", task.title, task.description),
            issues: open_issues.to_vec(),
            guidance: review.guidance.clone(),
            files,
            current_code,
            project_rules: load_project_rules(worktree),
        }
    }
}

/// A failing test run, folded into the review as a major issue.
pub fn synthetic_test_issue(tests: &TestResult) -> Issue {
    let mut issue = Issue::new(
        Severity::Major,
        format!(
            "Tests are failing ({}): {}",
            tests.framework.as_deref().unwrap_or("unknown framework"),
            last_lines(&tests.output, 5)
        ),
    );
    issue.suggestion = Some("Fix the failing tests without weakening them".to_string());
    issue
}

/// Files named by the open issues, deduplicated, existing in the worktree.
fn collect_issue_files(issues: &[Issue], worktree: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    for issue in issues {
        let Some(file) = &issue.file else { continue };
        let path = PathBuf::from(file);
        if worktree.join(&path).is_file() && !files.contains(&path) {
            files.push(path);
        }
        if files.len() >= MAX_HANDOFF_FILES {
            break;
        }
    }
    files
}

/// Project rules: `.cursorrules` plus the first `packs/*/CLAUDE.md`,
/// capped at 50 KB combined.
pub fn load_project_rules(worktree: &Path) -> String {
    let mut rules = String::new();

    let cursorrules = worktree.join(".cursorrules");
    if let Ok(content) = std::fs::read_to_string(&cursorrules) {
        rules.push_str(&content);
    }

    let pattern = worktree.join("packs/*/CLAUDE.md");
    if let Some(pattern) = pattern.to_str() {
        if let Ok(mut paths) = glob::glob(pattern) {
            if let Some(Ok(path)) = paths.next() {
                if let Ok(content) = std::fs::read_to_string(&path) {
                    if !rules.is_empty() {
                        rules.push_str("\n\n");
                    }
                    rules.push_str(&content);
                }
            }
        }
    }

    if rules.len() > MAX_PROJECT_RULES_BYTES {
        rules.truncate(MAX_PROJECT_RULES_BYTES);
    }
    rules
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_issue_is_major_and_carries_output() {
        let tests = TestResult {
            passed: false,
            framework: Some("cargo".to_string()),
            output: "test foo ... FAILED\nfailures:\n    foo".to_string(),
            coverage: None,
        };
        let issue = synthetic_test_issue(&tests);
        assert_eq!(issue.severity, Severity::Major);
        assert!(issue.description.contains("cargo"));
        assert!(issue.description.contains("FAILED"));
    }

    #[test]
    fn issue_files_are_deduped_and_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("real.rs"), "x").unwrap();

        let issues = vec![
            Issue::new(Severity::Major, "a").in_file("real.rs"),
            Issue::new(Severity::Major, "b").in_file("real.rs"),
            Issue::new(Severity::Major, "c").in_file("ghost.rs"),
            Issue::new(Severity::Minor, "d"),
        ];
        let files = collect_issue_files(&issues, dir.path());
        assert_eq!(files, vec![PathBuf::from("real.rs")]);
    }

    #[test]
    fn project_rules_prefer_cursorrules_then_pack_rules() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".cursorrules"), "rule one").unwrap();
        std::fs::create_dir_all(dir.path().join("packs/billing")).unwrap();
        std::fs::create_dir_all(dir.path().join("packs/auth")).unwrap();
        std::fs::write(dir.path().join("packs/auth/CLAUDE.md"), "pack rules").unwrap();

        let rules = load_project_rules(dir.path());
        assert!(rules.starts_with("rule one"));
        assert!(rules.contains("pack rules"));
    }

    #[test]
    fn project_rules_are_capped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".cursorrules"), "x".repeat(200 * 1024)).unwrap();
        let rules = load_project_rules(dir.path());
        assert_eq!(rules.len(), MAX_PROJECT_RULES_BYTES);
    }

    #[test]
    fn missing_rules_yield_empty_string() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_project_rules(dir.path()), "");
    }
}

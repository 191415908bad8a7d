//! Execution and pipeline result types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Result of the executor stage.
///
/// `files_changed` is always recomputed from git state after the subprocess
/// returns; the subprocess's own claims about what it touched are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,

    /// Files changed in the worktree, from `git status --porcelain`
    pub files_changed: Vec<PathBuf>,

    /// Executor's own summary of what it did
    pub summary: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a test-runner stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub passed: bool,

    /// Detected framework, e.g. "cargo", "go", "jest", "pytest", "rspec"
    pub framework: Option<String>,

    /// Tail of the runner output, for diagnostics and issue injection
    pub output: String,

    /// Coverage percentage when the runner reported one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
}

impl TestResult {
    /// A pass with nothing to run counts as green.
    pub fn no_tests() -> Self {
        Self {
            passed: true,
            framework: None,
            output: String::new(),
            coverage: None,
        }
    }
}

/// How a pipeline run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOutcome {
    /// Review passed, push and PR creation succeeded
    Success,
    /// The review-refactor loop exhausted its budget without passing
    MaxIterations,
    /// A stage returned a non-recoverable error
    Fatal,
}

/// Final result of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkResult {
    pub outcome: WorkOutcome,

    pub pr_created: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,

    pub message: String,

    /// Review-refactor iterations consumed
    pub iterations: u32,

    pub tests_passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_coverage: Option<f64>,
}

impl WorkResult {
    pub fn max_iterations(iterations: u32, tests_passed: bool) -> Self {
        Self {
            outcome: WorkOutcome::MaxIterations,
            pr_created: false,
            pr_url: None,
            message: "Review did not pass after max iterations".to_string(),
            iterations,
            tests_passed,
            test_coverage: None,
        }
    }
}

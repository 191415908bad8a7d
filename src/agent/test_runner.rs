//! Test runner stage
//!
//! Unlike the other stage agents this one runs the repository's own test
//! command, auto-detected from the worktree layout.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::CancelSignal;
use crate::domain::TestResult;

/// Lines of runner output kept for diagnostics
const OUTPUT_TAIL_LINES: usize = 80;

/// Detects and runs the repository's test suite
pub struct TestRunner;

impl TestRunner {
    /// Detect the test framework from the worktree layout.
    /// Returns the command line to run, or None when nothing looks testable.
    pub fn detect(worktree: &Path) -> Option<(&'static str, Vec<&'static str>)> {
        if worktree.join("Cargo.toml").exists() {
            return Some(("cargo", vec!["test", "--quiet"]));
        }
        if worktree.join("go.mod").exists() {
            return Some(("go", vec!["test", "./..."]));
        }
        if worktree.join("pytest.ini").exists()
            || worktree.join("pyproject.toml").exists()
            || worktree.join("setup.py").exists()
        {
            return Some(("pytest", vec!["-q"]));
        }
        if worktree.join("Gemfile").exists() {
            return Some(("bundle", vec!["exec", "rspec"]));
        }
        if worktree.join("package.json").exists() {
            return Some(("npm", vec!["test", "--silent"]));
        }
        None
    }

    /// Framework label for reporting.
    fn framework_name(command: &str) -> &'static str {
        match command {
            "cargo" => "cargo",
            "go" => "go",
            "pytest" => "pytest",
            "bundle" => "rspec",
            "npm" => "npm",
            _ => "unknown",
        }
    }

    /// Run the detected suite in the worktree. A repository with no
    /// recognizable test setup counts as green.
    pub async fn run(worktree: &Path, cancel: &CancelSignal) -> Result<TestResult> {
        let Some((command, args)) = Self::detect(worktree) else {
            tracing::debug!("No test framework detected in {}", worktree.display());
            return Ok(TestResult::no_tests());
        };

        let child = Command::new(command)
            .args(&args)
            .current_dir(worktree)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn test runner: {}", command))?;

        // kill_on_drop reaps the child if cancellation abandons the wait.
        let wait = child.wait_with_output();
        tokio::pin!(wait);

        let mut cancel = cancel.clone();
        let mut cancel_live = true;
        let output = loop {
            tokio::select! {
                output = &mut wait => {
                    break output.context("Failed to wait for test runner")?;
                }
                changed = cancel.changed(), if cancel_live => {
                    match changed {
                        Ok(()) if *cancel.borrow() => anyhow::bail!("test run cancelled"),
                        Ok(()) => {}
                        Err(_) => cancel_live = false,
                    }
                }
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(TestResult {
            passed: output.status.success(),
            framework: Some(Self::framework_name(command).to_string()),
            output: tail(&text, OUTPUT_TAIL_LINES),
            coverage: parse_coverage(&text),
        })
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

/// Best-effort coverage extraction across framework output styles.
fn parse_coverage(output: &str) -> Option<f64> {
    static COVERAGE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)coverage[:\s]+(\d+(?:\.\d+)?)\s*%|(\d+(?:\.\d+)?)\s*%\s+coverage").unwrap());
    let caps = COVERAGE.captures(output)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_framework_from_layout() {
        let dir = tempfile::tempdir().unwrap();
        assert!(TestRunner::detect(dir.path()).is_none());

        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(TestRunner::detect(dir.path()).unwrap().0, "npm");

        // Cargo takes precedence over npm when both exist.
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        assert_eq!(TestRunner::detect(dir.path()).unwrap().0, "cargo");
    }

    #[test]
    fn coverage_parsing_variants() {
        assert_eq!(parse_coverage("total coverage: 84.2% of statements"), Some(84.2));
        assert_eq!(parse_coverage("lines ...... 91% coverage"), Some(91.0));
        assert_eq!(parse_coverage("no numbers here"), None);
    }

    #[tokio::test]
    async fn empty_repo_counts_as_green() {
        let dir = tempfile::tempdir().unwrap();
        let (_tx, cancel) = crate::agent::cancel_pair();
        let result = TestRunner::run(dir.path(), &cancel).await.unwrap();
        assert!(result.passed);
        assert!(result.framework.is_none());
    }

    #[test]
    fn tail_keeps_the_end() {
        let text = (0..200).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let tailed = tail(&text, 10);
        assert!(tailed.starts_with("line 190"));
        assert!(tailed.ends_with("line 199"));
    }
}

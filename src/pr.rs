//! Pull-request creation
//!
//! Thin wrapper over the `gh` CLI, invoked in the worktree so it picks up
//! the pushed branch. Only the printed URL is parsed out.

use anyhow::{Context, Result, bail};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tokio::process::Command;

/// Creates the pull request for a finished change
pub struct PrCreator {
    command: String,
}

impl Default for PrCreator {
    fn default() -> Self {
        Self::new("gh")
    }
}

impl PrCreator {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Run `gh pr create` in the worktree and return the PR URL.
    pub async fn create(
        &self,
        worktree: &Path,
        title: &str,
        body: &str,
        base_branch: &str,
    ) -> Result<String> {
        let output = Command::new(&self.command)
            .args(["pr", "create", "--title", title, "--body", body, "--base", base_branch])
            .current_dir(worktree)
            .output()
            .await
            .with_context(|| format!("Failed to run {} pr create", self.command))?;

        if !output.status.success() {
            bail!(
                "pr creation failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_pr_url(&stdout)
            .with_context(|| format!("No PR URL in output: {}", stdout.trim()))
    }
}

/// The URL the CLI prints, wherever it appears in the output.
fn parse_pr_url(output: &str) -> Option<String> {
    static URL: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"https://\S+/pull/\d+").unwrap());
    URL.find(output).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_url_from_noisy_output() {
        let output = "\
Creating pull request for eng-42-fix-login into main

https://github.com/acme/api/pull/123
";
        assert_eq!(
            parse_pr_url(output).as_deref(),
            Some("https://github.com/acme/api/pull/123")
        );
    }

    #[test]
    fn no_url_is_none() {
        assert_eq!(parse_pr_url("something went sideways"), None);
    }

    #[tokio::test]
    async fn create_parses_url_from_stub_cli() {
        let dir = tempfile::tempdir().unwrap();
        let stub = dir.path().join("fake-gh");
        std::fs::write(
            &stub,
            "#!/bin/sh\necho 'https://github.com/acme/api/pull/7'\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let creator = PrCreator::new(stub.display().to_string());
        let url = creator
            .create(dir.path(), "title", "body", "main")
            .await
            .unwrap();
        assert_eq!(url, "https://github.com/acme/api/pull/7");
    }
}

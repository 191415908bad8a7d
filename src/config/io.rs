//! Configuration file I/O operations

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;

use super::Config;

impl Config {
    /// Default global config file path (`~/.boatman.yaml`)
    pub fn global_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".boatman.yaml")
    }

    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration to a file with atomic write and file locking.
    ///
    /// An exclusive lock on a sibling `.lock` file keeps concurrent boatman
    /// processes from interleaving writes; the temp-file-then-rename pattern
    /// keeps a crash from leaving a truncated config behind.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content =
            serde_yaml::to_string(self).with_context(|| "Failed to serialize config")?;

        let lock_path = path.with_extension("yaml.lock");
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;

        lock_file
            .lock_exclusive()
            .with_context(|| "Failed to acquire config lock")?;

        let temp_path = path.with_extension("yaml.tmp");
        let mut temp_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;

        temp_file
            .write_all(content.as_bytes())
            .with_context(|| "Failed to write config content")?;

        temp_file
            .sync_all()
            .with_context(|| "Failed to sync config file")?;

        std::fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to rename config file: {}", path.display()))?;

        // Lock is released when lock_file is dropped
        Ok(())
    }

    /// Apply `BOATMAN_`-prefixed environment overrides, plus `LINEAR_API_KEY`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("LINEAR_API_KEY") {
            if !key.is_empty() {
                self.linear_key = Some(key);
            }
        }
        if let Ok(key) = std::env::var("BOATMAN_LINEAR_KEY") {
            if !key.is_empty() {
                self.linear_key = Some(key);
            }
        }
        if let Some(v) = env_parse("BOATMAN_MAX_ITERATIONS") {
            self.max_iterations = v;
        }
        if let Ok(v) = std::env::var("BOATMAN_BASE_BRANCH") {
            if !v.is_empty() {
                self.base_branch = v;
            }
        }
        if let Ok(v) = std::env::var("BOATMAN_REVIEW_SKILL") {
            if !v.is_empty() {
                self.review_skill = v;
            }
        }
        if let Some(v) = env_bool("BOATMAN_ENABLE_TOOLS") {
            self.enable_tools = v;
        }
        if let Some(v) = env_parse("BOATMAN_REVIEW_MAX_CRITICAL_ISSUES") {
            self.review.max_critical_issues = v;
        }
        if let Some(v) = env_parse("BOATMAN_REVIEW_MAX_MAJOR_ISSUES") {
            self.review.max_major_issues = v;
        }
        if let Some(v) = env_parse("BOATMAN_REVIEW_MIN_VERIFICATION_CONFIDENCE") {
            self.review.min_verification_confidence = v;
        }
        if let Some(v) = env_bool("BOATMAN_REVIEW_STRICT_PARSING") {
            self.review.strict_parsing = v;
        }
        if let Some(v) = env_parse("BOATMAN_COORDINATOR_MESSAGE_BUFFER_SIZE") {
            self.coordinator.message_buffer_size = v;
        }
        if let Some(v) = env_parse("BOATMAN_COORDINATOR_SUBSCRIBER_BUFFER_SIZE") {
            self.coordinator.subscriber_buffer_size = v;
        }
        if let Some(v) = env_parse("BOATMAN_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = v;
        }
        if let Some(v) = env_parse("BOATMAN_RETRY_INITIAL_DELAY_MS") {
            self.retry.initial_delay_ms = v;
        }
        if let Some(v) = env_parse("BOATMAN_RETRY_MAX_DELAY_MS") {
            self.retry.max_delay_ms = v;
        }
        if let Ok(v) = std::env::var("BOATMAN_CLAUDE_COMMAND") {
            if !v.is_empty() {
                self.claude.command = v;
            }
        }
        if let Some(v) = env_parse("BOATMAN_CLAUDE_TIMEOUT") {
            self.claude.timeout_secs = v;
        }
        if let Some(v) = env_bool("BOATMAN_CLAUDE_ENABLE_PROMPT_CACHING") {
            self.claude.enable_prompt_caching = v;
        }
        if let Some(v) = env_parse("BOATMAN_TOKEN_BUDGET_CONTEXT") {
            self.token_budget.context = v;
        }
        if let Some(v) = env_parse("BOATMAN_TOKEN_BUDGET_PLAN") {
            self.token_budget.plan = v;
        }
        if let Some(v) = env_parse("BOATMAN_TOKEN_BUDGET_REVIEW") {
            self.token_budget.review = v;
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring unparsable env override {}={}", name, raw);
            None
        }
    }
}

/// Booleans from the environment accept `1`/`0` as well as `true`/`false`.
fn env_bool(name: &str) -> Option<bool> {
    match std::env::var(name).ok()?.as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        other => {
            tracing::warn!("Ignoring unparsable env override {}={}", name, other);
            None
        }
    }
}

/// Load the effective configuration: explicit path or `~/.boatman.yaml`
/// when present, defaults otherwise, then environment overrides.
///
/// When no config file exists and no explicit path was given, a default
/// file is written so the user has something to edit.
pub fn load_config(explicit_path: Option<&Path>) -> Result<Config> {
    let mut config = match explicit_path {
        Some(path) => Config::from_file(path)?,
        None => {
            let global = Config::global_config_path();
            if global.exists() {
                Config::from_file(&global)?
            } else {
                let config = Config::default();
                if let Err(e) = config.save_to_file(&global) {
                    tracing::warn!("Failed to write default config: {}", e);
                } else {
                    eprintln!("Created {}", global.display());
                }
                config
            }
        }
    };

    config.apply_env_overrides();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.base_branch, "main");
        assert_eq!(config.review_skill, "peer-review");
        assert_eq!(config.review.max_critical_issues, 1);
        assert_eq!(config.review.max_major_issues, 3);
        assert_eq!(config.review.min_verification_confidence, 50);
        assert!(!config.review.strict_parsing);
        assert_eq!(config.coordinator.message_buffer_size, 1000);
        assert_eq!(config.coordinator.subscriber_buffer_size, 100);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay_ms, 500);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.claude.command, "claude");
        assert_eq!(config.claude.timeout(), None);
        assert_eq!(config.token_budget.context, 8000);
        assert_eq!(config.token_budget.plan, 2000);
        assert_eq!(config.token_budget.review, 4000);
        assert!(!config.enable_tools);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "max_iterations: 5\nreview:\n  strict_parsing: true\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.max_iterations, 5);
        assert!(config.review.strict_parsing);
        assert_eq!(config.review.max_major_issues, 3);
        assert_eq!(config.base_branch, "main");
    }

    #[test]
    fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boatman.yaml");

        let mut config = Config::default();
        config.linear_key = Some("lin_api_test".to_string());
        config.max_iterations = 7;
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.linear_key.as_deref(), Some("lin_api_test"));
        assert_eq!(loaded.max_iterations, 7);
    }
}

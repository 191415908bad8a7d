//! Configuration types
//!
//! Boatman reads `~/.boatman.yaml` (or a `--config` path), then applies
//! `BOATMAN_`-prefixed environment overrides on top. `LINEAR_API_KEY` is
//! honored as the ticket-tracker key when the file does not set one.

mod io;

pub use io::load_config;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::ReviewThresholds;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Ticket-tracker API key. Required before the pipeline starts when the
    /// task is ticket-sourced.
    #[serde(default)]
    pub linear_key: Option<String>,

    /// Review-refactor loop bound
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Branch worktrees are created from
    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    /// LLM agent/skill name used for reviews
    #[serde(default = "default_review_skill")]
    pub review_skill: String,

    /// Allow the LLM subprocess to execute tools unattended
    #[serde(default)]
    pub enable_tools: bool,

    #[serde(default)]
    pub review: ReviewSettings,

    #[serde(default)]
    pub coordinator: CoordinatorSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub claude: ClaudeSettings,

    #[serde(default)]
    pub token_budget: TokenBudgetSettings,
}

/// Review pass/fail tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewSettings {
    #[serde(default = "default_max_critical_issues")]
    pub max_critical_issues: usize,

    #[serde(default = "default_max_major_issues")]
    pub max_major_issues: usize,

    /// Minimum diff-verifier confidence before a refactor claim is trusted
    #[serde(default = "default_min_verification_confidence")]
    pub min_verification_confidence: u8,

    #[serde(default)]
    pub strict_parsing: bool,
}

/// Coordinator channel depths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSettings {
    #[serde(default = "default_message_buffer_size")]
    pub message_buffer_size: usize,

    #[serde(default = "default_subscriber_buffer_size")]
    pub subscriber_buffer_size: usize,
}

/// Retry/backoff tuning for LLM and upstream calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff base, milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Backoff cap, milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl RetrySettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// LLM subprocess settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeSettings {
    /// Binary invoked for every LLM call
    #[serde(default = "default_claude_command")]
    pub command: String,

    /// Per-call timeout in seconds; 0 means no timeout
    #[serde(default)]
    pub timeout_secs: u64,

    #[serde(default)]
    pub enable_prompt_caching: bool,
}

impl ClaudeSettings {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Token budgets for stage handoffs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudgetSettings {
    #[serde(default = "default_context_budget")]
    pub context: usize,

    #[serde(default = "default_plan_budget")]
    pub plan: usize,

    #[serde(default = "default_review_budget")]
    pub review: usize,
}

fn default_max_iterations() -> u32 {
    3
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_review_skill() -> String {
    "peer-review".to_string()
}

fn default_max_critical_issues() -> usize {
    1
}

fn default_max_major_issues() -> usize {
    3
}

fn default_min_verification_confidence() -> u8 {
    50
}

fn default_message_buffer_size() -> usize {
    1000
}

fn default_subscriber_buffer_size() -> usize {
    100
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_claude_command() -> String {
    "claude".to_string()
}

fn default_context_budget() -> usize {
    8000
}

fn default_plan_budget() -> usize {
    2000
}

fn default_review_budget() -> usize {
    4000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            linear_key: None,
            max_iterations: default_max_iterations(),
            base_branch: default_base_branch(),
            review_skill: default_review_skill(),
            enable_tools: false,
            review: ReviewSettings::default(),
            coordinator: CoordinatorSettings::default(),
            retry: RetrySettings::default(),
            claude: ClaudeSettings::default(),
            token_budget: TokenBudgetSettings::default(),
        }
    }
}

impl Default for ReviewSettings {
    fn default() -> Self {
        Self {
            max_critical_issues: default_max_critical_issues(),
            max_major_issues: default_max_major_issues(),
            min_verification_confidence: default_min_verification_confidence(),
            strict_parsing: false,
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            message_buffer_size: default_message_buffer_size(),
            subscriber_buffer_size: default_subscriber_buffer_size(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for ClaudeSettings {
    fn default() -> Self {
        Self {
            command: default_claude_command(),
            timeout_secs: 0,
            enable_prompt_caching: false,
        }
    }
}

impl Default for TokenBudgetSettings {
    fn default() -> Self {
        Self {
            context: default_context_budget(),
            plan: default_plan_budget(),
            review: default_review_budget(),
        }
    }
}

impl Config {
    /// Thresholds handed to the review parser.
    pub fn review_thresholds(&self) -> ReviewThresholds {
        ReviewThresholds {
            max_critical_issues: self.review.max_critical_issues,
            max_major_issues: self.review.max_major_issues,
            strict_parsing: self.review.strict_parsing,
        }
    }
}

//! Stage agents and subprocess supervision
//!
//! Each pipeline stage that needs an LLM wraps one subprocess invocation;
//! the test runner wraps the repository's own test command. All of them
//! share the retry, cancellation, and cost-accounting machinery here.

mod claude;
mod cost;
mod executor;
mod planner;
mod preflight;
mod refactor;
mod retry;
mod reviewer;
mod test_runner;

pub use claude::{ClaudeAdapter, LlmRequest, LlmResponse, OutputFormat, format_tool_call};
pub use cost::{CostSample, CostTracker};
pub use executor::Executor;
pub use planner::Planner;
pub use preflight::{Preflight, PreflightReport};
pub use refactor::Refactor;
pub use retry::{Permanent, backoff_delay, is_permanent, is_retryable_message, permanent, with_retry};
pub use reviewer::Reviewer;
pub use test_runner::TestRunner;

use tokio::sync::watch;

/// Receiving side of the root cancellation signal. Cancellation is level-
/// triggered: once the value turns true it stays true.
pub type CancelSignal = watch::Receiver<bool>;

/// Create a cancellation pair. Dropping the sender without cancelling
/// leaves every receiver running to completion.
pub fn cancel_pair() -> (watch::Sender<bool>, CancelSignal) {
    watch::channel(false)
}

/// True when the signal has already fired.
pub fn is_cancelled(cancel: &CancelSignal) -> bool {
    *cancel.borrow()
}

/// Errors that must stay distinguishable through the anyhow chain
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The root cancellation handle fired
    #[error("operation cancelled")]
    Cancelled,
}

/// True when an error chain bottoms out in a cancellation.
pub fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<AgentError>(), Some(AgentError::Cancelled)))
}

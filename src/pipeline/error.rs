//! Pipeline error taxonomy
//!
//! Stage plumbing uses anyhow internally; these kinds exist so callers and
//! logs can tell a config problem from a flaky upstream from a subprocess
//! crash. Review-not-passed is deliberately not here: exhausting the
//! iteration budget is a terminal state, not an error.

use crate::agent::{is_cancellation, is_permanent};

/// Category of a pipeline failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// Missing or invalid configuration; fatal before the pipeline starts
    #[error("configuration error")]
    Config,

    /// Upstream reachable but failing (5xx, network); retried, then fatal
    #[error("upstream unavailable")]
    UpstreamUnavailable,

    /// Upstream said no (4xx, auth, not found); permanent
    #[error("upstream rejected")]
    UpstreamRejected,

    /// LLM or git subprocess exited non-zero past retry
    #[error("subprocess failure")]
    Subprocess,

    /// Preflight found problems; surfaced as warnings, never fatal
    #[error("validation failure")]
    Validation,

    /// Root cancellation fired
    #[error("cancelled")]
    Cancelled,

    /// A context pin went stale mid-edit
    #[error("integrity violation")]
    Integrity,
}

/// Best-effort classification of a stage error for reporting.
pub fn classify(err: &anyhow::Error) -> ErrorKind {
    if is_cancellation(err) {
        return ErrorKind::Cancelled;
    }
    let text = format!("{:#}", err).to_lowercase();
    if text.contains("config") && text.contains("missing") {
        return ErrorKind::Config;
    }
    if text.contains("ticket tracker") || text.contains("pr creation") {
        if is_permanent(err) {
            return ErrorKind::UpstreamRejected;
        }
        return ErrorKind::UpstreamUnavailable;
    }
    ErrorKind::Subprocess
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentError, permanent};

    #[test]
    fn cancellation_wins_over_everything() {
        let err = permanent(anyhow::anyhow!(AgentError::Cancelled));
        assert_eq!(classify(&err), ErrorKind::Cancelled);
    }

    #[test]
    fn upstream_classification_follows_permanence() {
        let rejected =
            permanent(anyhow::anyhow!("ticket tracker returned HTTP 404: nope"));
        assert_eq!(classify(&rejected), ErrorKind::UpstreamRejected);

        let flaky = anyhow::anyhow!("boom").context("ticket tracker unreachable");
        assert_eq!(classify(&flaky), ErrorKind::UpstreamUnavailable);
    }

    #[test]
    fn default_is_subprocess() {
        let err = anyhow::anyhow!("llm subprocess exited with signal 9");
        assert_eq!(classify(&err), ErrorKind::Subprocess);
    }
}

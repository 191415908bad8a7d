//! Retry with exponential backoff
//!
//! LLM and upstream calls share one retry discipline: exponential backoff
//! with jitter, capped delay, and a `Permanent` marker that lets a callee
//! opt an error out of retry entirely (HTTP 4xx, argument-parse failures).

use anyhow::Result;
use std::future::Future;
use std::time::Duration;

use crate::config::RetrySettings;

/// Wrapper marking an error as not worth retrying.
#[derive(Debug)]
pub struct Permanent(pub anyhow::Error);

impl std::fmt::Display for Permanent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for Permanent {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref())
    }
}

/// Mark an error permanent.
pub fn permanent(err: anyhow::Error) -> anyhow::Error {
    anyhow::Error::new(Permanent(err))
}

/// True when the error carries the permanent marker anywhere in its chain.
pub fn is_permanent(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Permanent>())
}

/// Classify a raw error message: network timeouts, 5xx, and known transient
/// server phrases are retryable; 4xx is permanent.
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    let transient = [
        "timeout",
        "timed out",
        "connection refused",
        "connection reset",
        "rate limit",
        "temporarily unavailable",
        "overloaded",
        "server error",
        "502",
        "503",
        "504",
        "500",
    ];
    if transient.iter().any(|p| lower.contains(p)) {
        return true;
    }
    false
}

/// Delay before the next attempt: `initial * 2^(attempt-1)` capped at
/// `max_delay`, with up to 25% additive jitter.
pub fn backoff_delay(settings: &RetrySettings, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let base = settings
        .initial_delay()
        .saturating_mul(2u32.saturating_pow(exponent));
    let capped = base.min(settings.max_delay());

    let jitter_budget = capped.as_millis() as u64 / 4;
    let jitter = if jitter_budget == 0 {
        0
    } else {
        // Cheap jitter without a PRNG dependency.
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64)
            .unwrap_or(0);
        now % jitter_budget
    };

    capped + Duration::from_millis(jitter)
}

/// Run an async operation with retry. The operation is retried until it
/// succeeds, exhausts `max_attempts`, or fails with a permanent error.
pub async fn with_retry<T, F, Fut>(settings: &RetrySettings, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = settings.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_permanent(&err) => {
                return Err(err.context(format!("{} failed permanently", label)));
            }
            Err(err) if attempt >= max_attempts => {
                return Err(err.context(format!(
                    "{} failed after {} attempts",
                    label, max_attempts
                )));
            }
            Err(err) => {
                let delay = backoff_delay(settings, attempt);
                tracing::warn!(
                    "{} attempt {}/{} failed, retrying in {:?}: {}",
                    label,
                    attempt,
                    max_attempts,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_settings() -> RetrySettings {
        RetrySettings {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result = with_retry(&fast_settings(), "op", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    anyhow::bail!("temporarily unavailable")
                }
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_stop_immediately() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_settings(), "op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(permanent(anyhow::anyhow!("HTTP 404"))) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(is_permanent(&result.unwrap_err()));
    }

    #[tokio::test]
    async fn exhausts_attempts_and_reports() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_settings(), "flaky", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("connection reset")) }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(format!("{}", err).contains("after 3 attempts"));
    }

    #[test]
    fn permanent_marker_survives_context() {
        let err = permanent(anyhow::anyhow!("bad request")).context("calling tracker");
        assert!(is_permanent(&err));
        let plain = anyhow::anyhow!("boom").context("calling tracker");
        assert!(!is_permanent(&plain));
    }

    #[test]
    fn message_classification() {
        assert!(is_retryable_message("error: rate limit exceeded"));
        assert!(is_retryable_message("upstream 503 Service Unavailable"));
        assert!(is_retryable_message("request timed out"));
        assert!(!is_retryable_message("HTTP 404 not found"));
        assert!(!is_retryable_message("invalid argument: --frobnicate"));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let settings = RetrySettings {
            max_attempts: 5,
            initial_delay_ms: 100,
            max_delay_ms: 300,
        };
        let d1 = backoff_delay(&settings, 1);
        let d3 = backoff_delay(&settings, 3);
        assert!(d1 >= Duration::from_millis(100));
        assert!(d1 <= Duration::from_millis(125 + 1));
        // 100 * 2^2 = 400, capped at 300 (+ jitter up to 75ms).
        assert!(d3 >= Duration::from_millis(300));
        assert!(d3 <= Duration::from_millis(375 + 1));
    }
}

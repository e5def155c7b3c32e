//! Bounded retry with exponential backoff for external calls.
//!
//! Every call into the vector store or the embedding provider made during
//! sync and matching goes through [`with_retry`]. Each attempt is bounded by
//! [`RetryPolicy::call_timeout`]; between attempts the delay doubles,
//! starting at `base_delay` and capped at `base_delay * 2^5`.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub call_timeout: Duration,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            call_timeout: Duration::from_secs(30),
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Delay slept before retry number `retry` (1-based).
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(5);
        self.base_delay * (1u32 << exp)
    }
}

/// Run `call` until it succeeds or the retry budget is spent.
///
/// Returns the last error, annotated with `op` and the attempt count.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_retries + 1;
    let mut last_err = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            tokio::time::sleep(policy.backoff_delay(attempt)).await;
        }

        match tokio::time::timeout(policy.call_timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                tracing::debug!(op, attempt = attempt + 1, error = %e, "call failed");
                last_err = Some(e);
            }
            Err(_) => {
                tracing::debug!(op, attempt = attempt + 1, "call timed out");
                last_err = Some(anyhow!(
                    "timed out after {:.1}s",
                    policy.call_timeout.as_secs_f64()
                ));
            }
        }
    }

    let err = last_err.unwrap_or_else(|| anyhow!("no attempts made"));
    Err(err.context(format!("{} failed after {} attempt(s)", op, attempts)))
}

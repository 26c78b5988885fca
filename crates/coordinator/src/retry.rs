//! Bounded retry around capability calls.

use scanue_common::{CapabilityError, CapabilityResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total invocations, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Per-call deadline; an elapsed call counts as a transient failure
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
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

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-based).
    pub fn compute_delay(&self, retry: u32) -> Duration {
        let base = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(retry as i32);
        let jitter = (base * 0.1 * rand_jitter(retry)) as u64;
        let delay = (base as u64).saturating_add(jitter);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Deterministic jitter in `[0, 1)` derived from the retry number.
fn rand_jitter(retry: u32) -> f64 {
    let x = retry.wrapping_add(1).wrapping_mul(2654435761);
    (x % 100) as f64 / 100.0
}

/// Invoke `call` until it succeeds, fails permanently, or runs out of attempts.
///
/// Each attempt is bounded by the policy's call timeout. Exhausting the
/// attempts on transient failures escalates to a permanent error.
pub async fn invoke_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut call: F,
) -> CapabilityResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CapabilityResult<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        let result = match tokio::time::timeout(policy.call_timeout(), call()).await {
            Ok(result) => result,
            Err(_) => Err(CapabilityError::transient(format!(
                "{label} timed out after {}ms",
                policy.call_timeout_ms
            ))),
        };

        match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(capability = %label, attempt, "Capability succeeded after retry");
                }
                return Ok(value);
            }
            Err(CapabilityError::Permanent(message)) => {
                return Err(CapabilityError::Permanent(message));
            }
            Err(CapabilityError::Transient(message)) => {
                if attempt < attempts {
                    let delay = policy.compute_delay(attempt - 1);
                    warn!(
                        capability = %label,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Retrying capability"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_error = message;
            }
        }
    }

    Err(CapabilityError::permanent(format!(
        "{label} failed after {attempts} attempts: {last_error}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
            call_timeout_ms: 200,
        }
    }

    #[test]
    fn default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay_ms, 500);
        assert_eq!(policy.max_delay_ms, 30_000);
        assert!((policy.backoff_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(policy.call_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn delay_grows_and_is_capped() {
        let policy = RetryPolicy::default();
        let d0 = policy.compute_delay(0);
        let d1 = policy.compute_delay(1);
        assert!(d0 >= Duration::from_millis(500) && d0 <= Duration::from_millis(550));
        assert!(d1 >= Duration::from_millis(1000) && d1 <= Duration::from_millis(1100));
        assert_eq!(policy.compute_delay(20), Duration::from_millis(30_000));
    }

    #[tokio::test]
    async fn always_transient_makes_exactly_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: CapabilityResult<()> = invoke_with_retry(&fast_policy(4), "flaky", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CapabilityError::transient("503"))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let error = result.unwrap_err();
        assert!(!error.is_transient());
        assert!(error.message().contains("after 4 attempts"));
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: CapabilityResult<()> = invoke_with_retry(&fast_policy(5), "strict", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CapabilityError::permanent("bad request"))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err(), CapabilityError::permanent("bad request"));
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = invoke_with_retry(&fast_policy(3), "recovering", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CapabilityError::transient("429"))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn timeout_counts_as_transient() {
        let mut policy = fast_policy(2);
        policy.call_timeout_ms = 20;
        let calls = AtomicU32::new(0);

        let result: CapabilityResult<()> = invoke_with_retry(&policy, "slow", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(result.unwrap_err().message().contains("timed out"));
    }

    #[tokio::test]
    async fn zero_attempts_still_calls_once() {
        let calls = AtomicU32::new(0);
        let _ = invoke_with_retry(&fast_policy(0), "once", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, CapabilityError>(())
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

//! Bounded, cancellable retry for chunk fetches.
//!
//! [`fetch_with_retry`] drives one job's attempts: a throttled response waits
//! out the upstream's hint (clamped to the policy window), a transient error
//! waits an exponentially growing jittered delay, and a fatal error returns
//! immediately. This is the only place in the engine that sleeps, and every
//! wait wakes early when the run's cancellation signal fires.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{FetchClass, InsightsError};

const MAX_BACKOFF_MS: u64 = 60_000;

/// Retry policy for one job: total attempt budget and wait bounds.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first; at least 1.
    pub max_attempts: u32,
    /// Base delay for exponential backoff on transient errors.
    pub backoff_base_ms: u64,
    /// Clamp applied to upstream throttle hints.
    pub throttle_wait_min: Duration,
    pub throttle_wait_max: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_app_config(config: &adsink_core::AppConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base_ms: config.backoff_base_ms,
            throttle_wait_min: Duration::from_secs(config.throttle_wait_min_secs),
            throttle_wait_max: Duration::from_secs(config.throttle_wait_max_secs),
        }
    }

    /// Wait before the next attempt, given the error class of attempt `n`
    /// (1-based). `None` means do not retry.
    fn wait_for(&self, class: FetchClass, attempt: u32) -> Option<Duration> {
        match class {
            FetchClass::Fatal => None,
            FetchClass::Throttled(hint) => {
                let base = hint.unwrap_or(Duration::from_millis(self.backoff_base_ms));
                Some(base.clamp(self.throttle_wait_min, self.throttle_wait_max))
            }
            FetchClass::Transient => {
                let computed = self
                    .backoff_base_ms
                    .saturating_mul(1u64 << (attempt - 1).min(10));
                let capped = computed.min(MAX_BACKOFF_MS);
                #[allow(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    clippy::cast_precision_loss
                )]
                let jittered = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
                Some(Duration::from_millis(jittered))
            }
        }
    }
}

/// Runs `operation` until it succeeds, fails fatally, exhausts the attempt
/// budget, or the run is cancelled. Returns the final result and how many
/// attempts were made (for the job ledger).
pub async fn fetch_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &watch::Receiver<bool>,
    mut operation: F,
) -> (Result<T, InsightsError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, InsightsError>>,
{
    let mut attempt = 0u32;

    loop {
        if *cancel.borrow() {
            return (Err(InsightsError::Cancelled), attempt);
        }
        attempt += 1;

        match operation().await {
            Ok(value) => return (Ok(value), attempt),
            Err(err) => {
                if attempt >= policy.max_attempts {
                    return (Err(err), attempt);
                }
                let Some(wait) = policy.wait_for(err.class(), attempt) else {
                    return (Err(err), attempt);
                };
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "insights fetch failed — waiting before retry"
                );
                if !wait_or_cancelled(wait, cancel).await {
                    return (Err(InsightsError::Cancelled), attempt);
                }
            }
        }
    }
}

/// Sleeps for `wait`, returning `false` early if the cancellation signal
/// fires first.
async fn wait_or_cancelled(wait: Duration, cancel: &watch::Receiver<bool>) -> bool {
    let mut rx = cancel.clone();
    if *rx.borrow() {
        return false;
    }

    let sleep = tokio::time::sleep(wait);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            () = &mut sleep => return true,
            changed = rx.changed() => {
                if changed.is_err() {
                    // Sender dropped; no cancellation can arrive any more.
                    (&mut sleep).await;
                    return true;
                }
                if *rx.borrow() {
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_attempts: u32, backoff_base_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_base_ms,
            throttle_wait_min: Duration::ZERO,
            throttle_wait_max: Duration::from_secs(900),
        }
    }

    fn throttled(retry_after_secs: Option<u64>) -> InsightsError {
        InsightsError::Throttled {
            scope: "act_1".to_string(),
            retry_after_secs,
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (result, attempts) = fetch_with_retry(&policy(3, 0), &cancel_rx, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, InsightsError>(7)
            }
        })
        .await;

        assert_eq!(result.expect("should succeed"), 7);
        assert_eq!(attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_hint_is_waited_out_then_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let started = tokio::time::Instant::now();

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (result, attempts) = fetch_with_retry(&policy(3, 0), &cancel_rx, || {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(throttled(Some(30)))
                } else {
                    Ok::<u32, InsightsError>(9)
                }
            }
        })
        .await;

        assert_eq!(result.expect("should succeed"), 9);
        assert_eq!(attempts, 2);
        assert!(
            started.elapsed() >= Duration::from_secs(30),
            "observed wait must cover the 30s hint, got {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (result, attempts) = fetch_with_retry(&policy(3, 0), &cancel_rx, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(InsightsError::PermissionDenied {
                    status: 403,
                    reason: "token expired".to_string(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(InsightsError::PermissionDenied { .. })));
        assert_eq!(attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempt_budget_on_persistent_throttling() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (result, attempts) = fetch_with_retry(&policy(3, 0), &cancel_rx, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(throttled(Some(0)))
            }
        })
        .await;

        assert!(matches!(result, Err(InsightsError::Throttled { .. })));
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_wakes_the_wait_early() {
        let (cancel_tx, cancel_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = cancel_tx.send(true);
        });

        let started = tokio::time::Instant::now();
        let (result, attempts) = fetch_with_retry(&policy(3, 0), &cancel_rx, || async {
            // One-hour hint; only cancellation can end the wait promptly.
            Err::<u32, _>(throttled(Some(3600)))
        })
        .await;

        assert!(matches!(result, Err(InsightsError::Cancelled)));
        assert_eq!(attempts, 1);
        assert!(
            started.elapsed() < Duration::from_secs(3600),
            "cancellation must cut the wait short"
        );
    }

    #[tokio::test]
    async fn already_cancelled_returns_without_attempting() {
        let (cancel_tx, cancel_rx) = watch::channel(true);
        drop(cancel_tx);

        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);

        let (result, attempts) = fetch_with_retry(&policy(3, 0), &cancel_rx, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, InsightsError>(1)
            }
        })
        .await;

        assert!(matches!(result, Err(InsightsError::Cancelled)));
        assert_eq!(attempts, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}

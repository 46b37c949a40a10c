//! Bounded retries with exponential backoff around blob fetches.

use std::{collections::BTreeSet, future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    blob::{BlobError, BlobErrorKind},
    config::duration_ms,
    observability::log_debug,
};

/// Retry configuration for blob fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// When `false` every fetch is attempted exactly once.
    pub enabled: bool,
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    /// Error kinds worth another attempt. Permanent kinds are ignored here.
    pub retryable_error_kinds: BTreeSet<BlobErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            retryable_error_kinds: BTreeSet::from([
                BlobErrorKind::Timeout,
                BlobErrorKind::Throttled,
                BlobErrorKind::Transport,
                BlobErrorKind::Io,
            ]),
        }
    }
}

impl RetryConfig {
    /// Set the attempt budget.
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the initial and maximum delays.
    #[must_use]
    pub fn delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    /// Turn retries off.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Observation of one fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Delay scheduled after this attempt; zero on success.
    pub delay: Duration,
    /// Whether this attempt produced a value.
    pub succeeded: bool,
}

/// Terminal failure of a retried operation.
#[derive(Debug, Error)]
pub enum RetryError {
    /// The error kind is not retryable; no further attempt was made.
    #[error("non-retryable blob error on attempt {attempt}: {source}")]
    NonRetryable {
        /// Attempt that failed.
        attempt: u32,
        /// Underlying error.
        #[source]
        source: BlobError,
    },
    /// Every attempt in the budget failed.
    #[error("blob fetch failed after {attempts} attempts: {source}")]
    Exhausted {
        /// Attempts performed.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        source: BlobError,
    },
}

impl RetryError {
    /// Number of attempts that were made.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::NonRetryable { attempt, .. } => *attempt,
            RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// Error returned by the last attempt.
    pub fn last_error(&self) -> &BlobError {
        match self {
            RetryError::NonRetryable { source, .. } | RetryError::Exhausted { source, .. } => {
                source
            }
        }
    }
}

/// Stateless retry driver. All attempt state lives in each [`run`] call.
///
/// [`run`]: RetryPolicy::run
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Policy driven by `config`.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Single-attempt policy.
    pub fn disabled() -> Self {
        Self::new(RetryConfig::default().disabled())
    }

    /// Configuration backing this policy.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Effective attempt budget.
    pub fn max_attempts(&self) -> u32 {
        if self.config.enabled {
            self.config.max_attempts.max(1)
        } else {
            1
        }
    }

    /// Whether `err` may be retried under this policy.
    pub fn is_retryable(&self, err: &BlobError) -> bool {
        let kind = err.kind();
        !kind.is_permanent() && self.config.retryable_error_kinds.contains(&kind)
    }

    /// Un-jittered delay after `attempt`: `min(max, initial * 2^(attempt-1))`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(31);
        self.config
            .initial_delay
            .checked_mul(factor)
            .map_or(self.config.max_delay, |delay| delay.min(self.config.max_delay))
    }

    /// Run `op` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// `observe` sees one [`RetryAttempt`] per scheduled retry and one for
    /// the successful attempt.
    pub async fn run<T, F, Fut, O>(&self, mut op: F, mut observe: O) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BlobError>>,
        O: FnMut(RetryAttempt),
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    observe(RetryAttempt {
                        attempt,
                        delay: Duration::ZERO,
                        succeeded: true,
                    });
                    return Ok(value);
                }
                Err(source) if !self.is_retryable(&source) => {
                    return Err(RetryError::NonRetryable { attempt, source });
                }
                Err(source) if attempt >= max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        source,
                    });
                }
                Err(source) => {
                    let delay = apply_jitter(self.backoff_delay(attempt), fastrand::u64(..))
                        .min(self.config.max_delay);
                    log_debug!(
                        component = "retry",
                        event = "retry_scheduled",
                        attempt,
                        delay_ms = duration_ms::as_millis(delay),
                        error = %source,
                    );
                    observe(RetryAttempt {
                        attempt,
                        delay,
                        succeeded: false,
                    });
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Add up to `base / 2` of jitter derived from `seed`.
pub fn apply_jitter(base: Duration, seed: u64) -> Duration {
    let base_ms = duration_ms::as_millis(base);
    let max_jitter = base_ms.saturating_div(2).saturating_add(1);
    base.saturating_add(Duration::from_millis(seed % max_jitter))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig::default()
            .max_attempts(max_attempts)
            .delays(Duration::from_millis(1), Duration::from_millis(4))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(RetryConfig::default());
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(800));
        assert_eq!(policy.backoff_delay(6), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn jitter_stays_within_half_the_base() {
        let base = Duration::from_millis(100);
        assert_eq!(apply_jitter(base, 0), base);
        for seed in [1, 49, 50, 51, u64::MAX] {
            let delay = apply_jitter(base, seed);
            assert!(delay >= base && delay <= Duration::from_millis(150));
        }
        assert_eq!(apply_jitter(Duration::ZERO, u64::MAX), Duration::ZERO);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let mut observed = Vec::new();
        let value = RetryPolicy::new(fast_config(3))
            .run(
                || {
                    let call = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if call < 2 {
                            Err(BlobError::Timeout("slow".into()))
                        } else {
                            Ok(7)
                        }
                    }
                },
                |attempt| observed.push(attempt),
            )
            .await
            .expect("third attempt succeeds");

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(observed.len(), 3);
        assert!(!observed[0].succeeded && !observed[1].succeeded);
        assert_eq!(
            observed[2],
            RetryAttempt {
                attempt: 3,
                delay: Duration::ZERO,
                succeeded: true
            }
        );
        assert!(observed[0].delay <= Duration::from_millis(4));
    }

    #[tokio::test]
    async fn exhausts_the_budget() {
        let calls = AtomicU32::new(0);
        let err = RetryPolicy::new(fast_config(2))
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(BlobError::Throttled("busy".into())) }
                },
                |_| {},
            )
            .await
            .expect_err("always failing");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(err, RetryError::Exhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let mut config = fast_config(5);
        config.retryable_error_kinds.insert(BlobErrorKind::NotFound);
        let err = RetryPolicy::new(config)
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        Err::<(), _>(BlobError::NotFound {
                            bucket: "b".into(),
                            key: "k".into(),
                        })
                    }
                },
                |_| {},
            )
            .await
            .expect_err("not found");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, RetryError::NonRetryable { attempt: 1, .. }));
        assert!(err.last_error().is_permanent());
    }

    #[tokio::test]
    async fn kinds_outside_the_set_fail_immediately() {
        let calls = AtomicU32::new(0);
        let mut config = fast_config(3);
        config.retryable_error_kinds = BTreeSet::from([BlobErrorKind::Timeout]);
        let err = RetryPolicy::new(config)
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(BlobError::Transport("reset".into())) }
                },
                |_| {},
            )
            .await
            .expect_err("transport not retryable");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.attempts(), 1);
        assert!(matches!(err, RetryError::NonRetryable { .. }));
    }

    #[tokio::test]
    async fn disabled_policy_makes_one_attempt() {
        let calls = AtomicU32::new(0);
        let err = RetryPolicy::disabled()
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(BlobError::Timeout("slow".into())) }
                },
                |_| panic!("no retry may be scheduled"),
            )
            .await
            .expect_err("single failure");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, RetryError::Exhausted { attempts: 1, .. }));
    }
}

//! Retry delay growth for backend calls: plain doubling for transient
//! failures, doubling plus uniform jitter for "too many requests".

use std::future::Future;
use std::time::Duration;

use campaign_core::config::BackoffConfig;
use rand::Rng;
use tracing::warn;

use crate::backend::BackendError;

/// Computes retry delays. Holds only the jitter bounds; the delay itself is
/// owned by the caller and mutated in place.
#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    lower_bound_ms: i32,
    upper_bound_ms: i32,
}

impl BackoffCalculator {
    /// Bounds are given in seconds, as configured.
    pub fn new(lower_bound_secs: u32, upper_bound_secs: u32) -> Self {
        Self::from_millis(secs_to_ms(lower_bound_secs), secs_to_ms(upper_bound_secs))
    }

    pub fn from_millis(lower_bound_ms: i32, upper_bound_ms: i32) -> Self {
        let lower_bound_ms = lower_bound_ms.max(0);
        Self {
            lower_bound_ms,
            upper_bound_ms: upper_bound_ms.max(lower_bound_ms),
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            config.too_many_requests_lower_bound_secs,
            config.too_many_requests_upper_bound_secs,
        )
    }

    pub fn lower_bound_ms(&self) -> i32 {
        self.lower_bound_ms
    }

    pub fn upper_bound_ms(&self) -> i32 {
        self.upper_bound_ms
    }

    /// `delay *= 2`, saturating at `i32::MAX`.
    pub fn increase_backoff(&self, retry_delay_ms: &mut i32) {
        *retry_delay_ms = retry_delay_ms.saturating_mul(2);
    }

    /// `delay = delay * 2 + uniform(lower, upper)`, saturating at `i32::MAX`.
    pub fn increase_randomized_backoff(&self, retry_delay_ms: &mut i32) {
        let jitter = rand::thread_rng().gen_range(self.lower_bound_ms..=self.upper_bound_ms);
        *retry_delay_ms = retry_delay_ms.saturating_mul(2).saturating_add(jitter);
    }
}

impl Default for BackoffCalculator {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}

fn secs_to_ms(secs: u32) -> i32 {
    i32::try_from(u64::from(secs) * 1_000).unwrap_or(i32::MAX)
}

/// How many times a backend call is attempted and where its delay starts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_delay_ms: i32,
    /// Total attempts, the first one included. Zero behaves like one.
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            initial_delay_ms: config.initial_delay_ms,
            max_attempts: config.max_attempts,
        }
    }
}

/// Runs `call` until it succeeds, fails fatally, or runs out of attempts.
///
/// Before each retry the delay grows (randomized for 429, doubled otherwise)
/// and the task sleeps for the grown delay. The sleep is a timer await, so
/// only the calling task is suspended.
pub async fn retry_with_backoff<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    calculator: &BackoffCalculator,
    mut call: F,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut retry_delay_ms = policy.initial_delay_ms;
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                if err.is_rate_limited() {
                    calculator.increase_randomized_backoff(&mut retry_delay_ms);
                } else {
                    calculator.increase_backoff(&mut retry_delay_ms);
                }
                warn!(
                    operation,
                    attempt,
                    retry_delay_ms,
                    error = %err,
                    "Backend call failed, scheduling retry"
                );
                metrics::counter!("inapp.backend.retries").increment(1);
                tokio::time::sleep(Duration::from_millis(retry_delay_ms.max(0) as u64)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

//! Bounded retry with exponential backoff and jitter.
//!
//! Sits inside the circuit breaker: transient provider errors are absorbed
//! here so the breaker counts one failure per exhausted sequence, not one per
//! attempt. Non-retryable errors (malformed responses, permanent rejections)
//! abort immediately.

use crate::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first call.
    pub max_retries: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
    /// Deadline applied to every attempt, retries included.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter: true,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_delays(mut self, min: Duration, max: Duration) -> Self {
        self.min_delay = min;
        self.max_delay = max;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Backoff before retry number `attempt` (0-based): `min * 2^attempt`
    /// capped at `max`, with ±25% jitter so synchronized clients spread out.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.min_delay.as_millis() as u64;
        let cap = self.max_delay.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempt.min(16)).min(cap);
        let millis = if self.jitter && exp > 0 {
            let spread = (exp / 4).max(1);
            let offset = rand::thread_rng().gen_range(0..=spread * 2);
            (exp + offset).saturating_sub(spread)
        } else {
            exp
        };
        Duration::from_millis(millis)
    }

    /// Run `f` until it succeeds, fails permanently, or the retry budget is
    /// spent. Each attempt runs under `attempt_timeout`; a timeout is a
    /// transient failure.
    pub async fn run<F, Fut, T>(&self, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            let outcome = match tokio::time::timeout(self.attempt_timeout, f()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::Timeout {
                    elapsed: self.attempt_timeout,
                }),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.backoff(attempt);
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying transient failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

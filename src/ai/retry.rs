//! Bounded retry with exponential backoff
//!
//! Generic over the operation and the retry predicate. Delay for attempt `n`
//! (0-based) is `base * 2^n`, jittered by ±`jitter`, capped at `max_delay`.

use crate::error::GatewayError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fractional jitter applied to each delay (0.25 = ±25%)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = 2u32.saturating_pow(attempt.min(16));
        let raw = self.base_delay.saturating_mul(exp).min(self.max_delay);

        if self.jitter <= 0.0 {
            return raw;
        }

        let spread = self.jitter.min(1.0);
        let factor = 1.0 + rand::thread_rng().gen_range(-spread..=spread);
        raw.mul_f64(factor).min(self.max_delay)
    }

    /// Run `operation` until it succeeds, the predicate declines the error,
    /// or attempts run out. The last error is returned unchanged.
    pub async fn run<T, E, F, Fut, P>(&self, mut operation: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let attempts_made = attempt + 1;
                    if attempts_made >= max_attempts || !should_retry(&err) {
                        if attempts_made > 1 {
                            tracing::warn!(
                                "[Retry] Giving up after {} attempt(s): {}",
                                attempts_made,
                                err
                            );
                        }
                        return Err(err);
                    }

                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        "[Retry] Attempt {}/{} failed: {} - retrying in {:?}",
                        attempts_made,
                        max_attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Default predicate for model calls: retry rate limits, timeouts, network
/// and availability failures; never credentials, not-found or bad requests;
/// retry anything unrecognized.
pub fn is_transient(err: &GatewayError) -> bool {
    err.effective_kind().is_retryable()
}

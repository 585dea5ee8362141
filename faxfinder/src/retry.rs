//! Retry controller for remote calls
//!
//! Every attempt, the first included, is preceded by a pacing sleep of
//! `base_delay * 2^retry`. Rate-limit failures add a longer penalty of
//! `base_delay * 2^(retry + 2)` before the next attempt, other transient
//! failures add `base_delay * 2^retry`. Permanent failures are returned at
//! once. Sleeping goes through [`Sleeper`] so tests can record the schedule
//! without waiting for it.

use crate::events::EventSender;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// How a failed call should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transience {
    RateLimited,
    Transient,
    Permanent,
}

pub trait Retryable {
    fn transience(&self) -> Transience;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// `base_delay * 2^retry_count`, or `base_delay * 2^(retry_count + 2)` when
    /// escalated for a rate limit. Saturates instead of overflowing.
    pub fn delay(&self, retry_count: u32, escalated: bool) -> Duration {
        let exponent = if escalated { retry_count + 2 } else { retry_count };
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    #[error("still rate limited after {attempts} attempts: {last}")]
    RateLimitExhausted { attempts: u32, last: E },

    #[error("network error persisted after {attempts} attempts: {last}")]
    NetworkExhausted { attempts: u32, last: E },

    #[error("{0}")]
    Permanent(E),
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested sleeps and returns immediately.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    slept: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn durations(&self) -> Vec<Duration> {
        self.slept.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.durations().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
    }
}

#[derive(Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for RetryController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryController").field("policy", &self.policy).finish()
    }
}

impl RetryController {
    pub fn new(policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn sleeper(&self) -> &Arc<dyn Sleeper> {
        &self.sleeper
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of
    /// retries. At most `max_retries + 1` attempts are made.
    pub async fn call<T, E, F, Fut>(
        &self,
        what: &str,
        events: &EventSender,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        let mut retry_count = 0;

        loop {
            let pacing = self.policy.delay(retry_count, false);
            debug!("Waiting {:?} before {} (retry {})", pacing, what, retry_count);
            self.sleeper.sleep(pacing).await;

            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            let attempts = retry_count + 1;

            match error.transience() {
                Transience::Permanent => return Err(RetryError::Permanent(error)),
                Transience::RateLimited => {
                    if retry_count >= self.policy.max_retries {
                        warn!("{} still rate limited after {} attempts", what, attempts);
                        return Err(RetryError::RateLimitExhausted { attempts, last: error });
                    }
                    let penalty = self.policy.delay(retry_count, true);
                    events.log(format!(
                        "Rate limited during {}, waiting {}s ({}/{})",
                        what,
                        penalty.as_secs_f64(),
                        attempts,
                        self.policy.max_retries
                    ));
                    self.sleeper.sleep(penalty).await;
                }
                Transience::Transient => {
                    if retry_count >= self.policy.max_retries {
                        warn!("{} failed after {} attempts: {}", what, attempts, error);
                        return Err(RetryError::NetworkExhausted { attempts, last: error });
                    }
                    let backoff = self.policy.delay(retry_count, false);
                    events.log(format!(
                        "{} failed ({}), retrying in {}s ({}/{})",
                        what,
                        error,
                        backoff.as_secs_f64(),
                        attempts,
                        self.policy.max_retries
                    ));
                    self.sleeper.sleep(backoff).await;
                }
            }
            retry_count += 1;
        }
    }
}

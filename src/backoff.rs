use std::sync::Arc;
use std::time::Duration;

/// Maps a delivery attempt to the visibility timeout before the next one.
///
/// `attempt` is the backend's receive count for the message, starting at 1.
pub trait BackoffStrategy: Send + Sync {
    fn backoff(&self, attempt: u32) -> Duration;
}

/// Same timeout for every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    pub timeout: Duration,
}

impl FixedBackoff {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl BackoffStrategy for FixedBackoff {
    fn backoff(&self, _attempt: u32) -> Duration {
        self.timeout
    }
}

/// `base * 2^(attempt - 1)`, capped at `max`, plus up to `jitter` of random spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
    pub jitter: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn backoff(&self, attempt: u32) -> Duration {
        let base = (self.base.as_millis() as u64).max(1);
        let max = (self.max.as_millis() as u64).max(base);
        let pow = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let exp = base.saturating_mul(pow).min(max);
        Duration::from_millis(exp) + jitter_delay(self.jitter.as_millis() as u64)
    }
}

fn jitter_delay(jitter_ms: u64) -> Duration {
    if jitter_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(fastrand::u64(0..=jitter_ms))
}

/// What to do with a message whose pipeline did not handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffDecision {
    /// Whether the dispatcher should reset the message's visibility itself.
    ///
    /// `false` once retries are exhausted: the message is left untouched for
    /// the queue's own redrive policy.
    pub retry_locally: bool,

    pub next_visibility_timeout: Duration,
}

/// A strategy together with the retry budget it applies to.
#[derive(Clone)]
pub struct BackoffPolicy {
    strategy: Arc<dyn BackoffStrategy>,
    max_retries: u32,
}

impl BackoffPolicy {
    pub fn new(strategy: Arc<dyn BackoffStrategy>, max_retries: u32) -> Self {
        Self {
            strategy,
            max_retries,
        }
    }

    /// Fixed backoff at `timeout` for up to `max_retries` receives.
    pub fn fixed(timeout: Duration, max_retries: u32) -> Self {
        Self::new(Arc::new(FixedBackoff::new(timeout)), max_retries)
    }

    pub fn decide(&self, attempt: u32) -> BackoffDecision {
        let attempt = attempt.max(1);
        BackoffDecision {
            retry_locally: attempt < self.max_retries,
            next_visibility_timeout: self.strategy.backoff(attempt),
        }
    }
}

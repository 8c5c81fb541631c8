use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Handlers run per core when the worker count is not set explicitly.
pub const WORKERS_PER_CORE: usize = 8;

/// Largest batch a single fetch may request.
pub const MAX_BATCH_SIZE: usize = 10;

/// Immutable configuration shared by the receive buffers, the pool and the dispatcher.
///
/// Built once before the bus starts and handed to every component by value
/// or behind an `Arc`. There is no process-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerPoolConfig {
    /// Number of concurrent workers. `None` derives it from the core count.
    pub worker_count: Option<usize>,

    /// Upper bound on the derived worker count.
    pub max_in_flight: usize,

    /// Messages requested per fetch.
    pub batch_size: usize,

    /// Capacity of each receive buffer's channel.
    pub buffer_capacity: usize,

    /// Capacity of the multiplexer's output channel.
    pub multiplexer_capacity: usize,

    /// Long-poll wait passed to every fetch.
    pub poll_wait: Duration,

    /// Visibility timeout applied to failed messages by the default backoff.
    pub default_visibility_timeout: Duration,

    /// Receives after which a failing message is left to the queue's redrive policy.
    pub max_retries: u32,

    /// Pause after a failed fetch before trying again.
    pub fetch_error_delay: Duration,
}

impl Default for ConsumerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: None,
            max_in_flight: 100,
            batch_size: MAX_BATCH_SIZE,
            buffer_capacity: 10,
            multiplexer_capacity: 100,
            poll_wait: Duration::from_secs(20),
            default_visibility_timeout: Duration::from_secs(30),
            max_retries: 5,
            fetch_error_delay: Duration::from_secs(1),
        }
    }
}

impl ConsumerPoolConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == Some(0) {
            return Err(ConfigError::Invalid {
                field: "worker_count",
                reason: "must be at least 1",
            });
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::Invalid {
                field: "max_in_flight",
                reason: "must be at least 1",
            });
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::Invalid {
                field: "batch_size",
                reason: "must be between 1 and 10",
            });
        }
        if self.buffer_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "buffer_capacity",
                reason: "must be at least 1",
            });
        }
        if self.multiplexer_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "multiplexer_capacity",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }

    /// Worker count actually used by the pool.
    ///
    /// An explicit `worker_count` wins. Otherwise cores × [`WORKERS_PER_CORE`],
    /// capped at `max_in_flight`.
    pub fn effective_worker_count(&self) -> usize {
        if let Some(count) = self.worker_count {
            return count.max(1);
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        (cores * WORKERS_PER_CORE).min(self.max_in_flight).max(1)
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = Some(worker_count);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_multiplexer_capacity(mut self, capacity: usize) -> Self {
        self.multiplexer_capacity = capacity;
        self
    }

    pub fn with_poll_wait(mut self, wait: Duration) -> Self {
        self.poll_wait = wait;
        self
    }

    pub fn with_default_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.default_visibility_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_fetch_error_delay(mut self, delay: Duration) -> Self {
        self.fetch_error_delay = delay;
        self
    }
}

/// Exactly-once settings for a single handler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExactlyOnceOptions {
    /// Lock TTL. `None` holds the lock until it is released.
    pub timeout: Option<Duration>,
}

/// Per-handler options used when building the default pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerOptions {
    pub exactly_once: Option<ExactlyOnceOptions>,
}

impl HandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guard the handler with a message lock.
    pub fn exactly_once(mut self, timeout: Option<Duration>) -> Self {
        self.exactly_once = Some(ExactlyOnceOptions { timeout });
        self
    }
}

use std::time::Duration;

use snafu::ensure;

use crate::error::{InvalidConfigSnafu, Result};

/// Options for an ingestion session.
///
/// Every bound used by the flow controller, the batch assembler and the
/// dispatcher is read from here when the session is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// The smallest batch the flow controller may ask for.
    pub min_batch_size: usize,
    /// Hard maximum batch size. No batch is ever larger than this.
    pub max_batch_size: usize,
    /// Maximum time between the first record of a batch and its flush.
    pub max_batch_age: Duration,
    /// EMA smoothing factor, in `(0, 1]`.
    pub ema_alpha: f64,
    /// The lowest in-flight concurrency budget.
    pub min_concurrency: usize,
    /// The highest in-flight concurrency budget.
    pub max_concurrency: usize,
    /// How many times a batch is resubmitted after a transient failure.
    pub retry_limit: u32,
    /// Backoff before the first retry. Doubles on every following retry.
    pub retry_backoff_base: Duration,
    /// Upper bound for the retry backoff.
    pub retry_backoff_max: Duration,
    /// Timeout for a single submission attempt.
    pub per_attempt_timeout: Duration,
    /// Fraction of the `[min, max]` range a new target must move by before it
    /// is published.
    pub hysteresis: f64,
    /// Load value (milliseconds of latency or queue depth) at which the
    /// default policy sits halfway between min and max.
    pub reference_load: f64,
    /// Capacity of the queue between the caller and the batch assembler.
    pub record_queue_capacity: usize,
    /// Capacity of the queue between the batch assembler and the dispatcher.
    pub batch_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_batch_size: 1,
            max_batch_size: 500,
            max_batch_age: Duration::from_secs(1),
            ema_alpha: 0.2,
            min_concurrency: 1,
            max_concurrency: 4,
            retry_limit: 3,
            retry_backoff_base: Duration::from_millis(100),
            retry_backoff_max: Duration::from_secs(10),
            per_attempt_timeout: Duration::from_secs(30),
            hysteresis: 0.1,
            reference_load: 100.0,
            record_queue_capacity: 1024,
            batch_queue_capacity: 4,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Change the batch size bounds.
    pub fn with_batch_size(mut self, min: usize, max: usize) -> Self {
        self.min_batch_size = min;
        self.max_batch_size = max;
        self
    }

    /// Change the maximum age of an open batch.
    pub fn with_max_batch_age(mut self, max_batch_age: Duration) -> Self {
        self.max_batch_age = max_batch_age;
        self
    }

    pub fn with_ema_alpha(mut self, ema_alpha: f64) -> Self {
        self.ema_alpha = ema_alpha;
        self
    }

    /// Change the in-flight concurrency bounds.
    pub fn with_concurrency(mut self, min: usize, max: usize) -> Self {
        self.min_concurrency = min;
        self.max_concurrency = max;
        self
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    /// Change the exponential backoff used between retries.
    pub fn with_retry_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry_backoff_base = base;
        self.retry_backoff_max = max;
        self
    }

    pub fn with_per_attempt_timeout(mut self, per_attempt_timeout: Duration) -> Self {
        self.per_attempt_timeout = per_attempt_timeout;
        self
    }

    pub fn with_hysteresis(mut self, hysteresis: f64) -> Self {
        self.hysteresis = hysteresis;
        self
    }

    pub fn with_reference_load(mut self, reference_load: f64) -> Self {
        self.reference_load = reference_load;
        self
    }

    /// Change the capacity of the record and batch queues.
    pub fn with_queue_capacity(mut self, records: usize, batches: usize) -> Self {
        self.record_queue_capacity = records;
        self.batch_queue_capacity = batches;
        self
    }

    /// Checks that all bounds are consistent.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.min_batch_size > 0,
            InvalidConfigSnafu {
                message: "min_batch_size must be greater than zero",
            }
        );
        ensure!(
            self.min_batch_size <= self.max_batch_size,
            InvalidConfigSnafu {
                message: format!(
                    "min_batch_size {} is greater than max_batch_size {}",
                    self.min_batch_size, self.max_batch_size
                ),
            }
        );
        ensure!(
            self.min_concurrency > 0,
            InvalidConfigSnafu {
                message: "min_concurrency must be greater than zero",
            }
        );
        ensure!(
            self.min_concurrency <= self.max_concurrency,
            InvalidConfigSnafu {
                message: format!(
                    "min_concurrency {} is greater than max_concurrency {}",
                    self.min_concurrency, self.max_concurrency
                ),
            }
        );
        ensure!(
            self.ema_alpha > 0.0 && self.ema_alpha <= 1.0,
            InvalidConfigSnafu {
                message: format!("ema_alpha {} must be in (0, 1]", self.ema_alpha),
            }
        );
        ensure!(
            (0.0..1.0).contains(&self.hysteresis),
            InvalidConfigSnafu {
                message: format!("hysteresis {} must be in [0, 1)", self.hysteresis),
            }
        );
        ensure!(
            self.reference_load.is_finite() && self.reference_load > 0.0,
            InvalidConfigSnafu {
                message: format!("reference_load {} must be positive", self.reference_load),
            }
        );
        ensure!(
            !self.max_batch_age.is_zero() && !self.per_attempt_timeout.is_zero(),
            InvalidConfigSnafu {
                message: "max_batch_age and per_attempt_timeout must be non-zero",
            }
        );
        ensure!(
            self.retry_backoff_base <= self.retry_backoff_max,
            InvalidConfigSnafu {
                message: "retry_backoff_base is greater than retry_backoff_max",
            }
        );
        ensure!(
            self.record_queue_capacity > 0 && self.batch_queue_capacity > 0,
            InvalidConfigSnafu {
                message: "queue capacities must be greater than zero",
            }
        );

        Ok(())
    }
}

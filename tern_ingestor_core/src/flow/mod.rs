//! Flow control.
//!
//! The [`FlowController`] keeps an exponential moving average of the load
//! reported by the dispatcher and turns it into a target batch size and an
//! in-flight concurrency budget.
//!
//! ```text
//!  Dispatcher ──observe(LoadSample)──> FlowController
//!                                          │ store
//!                                          v
//!                                   ArcSwap<FlowState>
//!                                          │ load
//!                          ┌───────────────┴──────────────┐
//!                          v                              v
//!                 BatchAssembler (size)        Dispatcher (budget)
//! ```
//!
//! The controller is the only writer. Readers get a [`FlowReader`] and see a
//! consistent snapshot of the whole state.
use std::{sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use tokio::time::Instant;
use tracing::debug;

use crate::config::SessionConfig;

pub use self::policy::{FlowPolicy, InverseLoadPolicy, PressureLevel, SteppedLoadPolicy};

mod policy;

/// A load observation reported after each batch completes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSample {
    pub at: Instant,
    pub value: f64,
}

/// The batch size and concurrency budget currently in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowTarget {
    pub batch_size: usize,
    pub concurrency_budget: usize,
}

/// A snapshot of the flow controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowState {
    /// Smoothed load. `None` until the first sample.
    pub ema: Option<f64>,
    pub batch_size: usize,
    pub concurrency_budget: usize,
    /// Number of samples observed so far.
    pub samples: u64,
}

/// Inclusive bounds for the flow target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowBounds {
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    pub min_concurrency: usize,
    pub max_concurrency: usize,
}

pub struct FlowController {
    alpha: f64,
    hysteresis: f64,
    bounds: FlowBounds,
    policy: Arc<dyn FlowPolicy>,
    state: Arc<ArcSwap<FlowState>>,
}

/// Read-only handle to the flow controller's state.
#[derive(Clone)]
pub struct FlowReader {
    state: Arc<ArcSwap<FlowState>>,
}

impl LoadSample {
    pub fn new(value: f64) -> Self {
        Self {
            at: Instant::now(),
            value,
        }
    }

    /// A latency sample, in milliseconds.
    pub fn from_latency(latency: Duration) -> Self {
        Self::new(latency.as_secs_f64() * 1_000.0)
    }

    /// A queue depth hint returned by the target.
    pub fn from_queue_depth(depth: f64) -> Self {
        Self::new(depth)
    }
}

impl FlowState {
    pub fn target(&self) -> FlowTarget {
        FlowTarget {
            batch_size: self.batch_size,
            concurrency_budget: self.concurrency_budget,
        }
    }
}

impl FlowBounds {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            min_batch_size: config.min_batch_size,
            max_batch_size: config.max_batch_size,
            min_concurrency: config.min_concurrency,
            max_concurrency: config.max_concurrency,
        }
    }

    pub fn clamp(&self, target: FlowTarget) -> FlowTarget {
        FlowTarget {
            batch_size: target
                .batch_size
                .clamp(self.min_batch_size, self.max_batch_size),
            concurrency_budget: target
                .concurrency_budget
                .clamp(self.min_concurrency, self.max_concurrency),
        }
    }
}

impl FlowController {
    /// Creates a controller using [`InverseLoadPolicy`].
    pub fn new(config: &SessionConfig) -> Self {
        Self::with_policy(config, Arc::new(InverseLoadPolicy::new(config.reference_load)))
    }

    /// Creates a controller with a custom policy.
    ///
    /// The initial state is the upper bound for both batch size and
    /// concurrency, with no EMA.
    pub fn with_policy(config: &SessionConfig, policy: Arc<dyn FlowPolicy>) -> Self {
        let bounds = FlowBounds::from_config(config);
        let initial = FlowState {
            ema: None,
            batch_size: bounds.max_batch_size,
            concurrency_budget: bounds.max_concurrency,
            samples: 0,
        };

        Self {
            alpha: config.ema_alpha,
            hysteresis: config.hysteresis,
            bounds,
            policy,
            state: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    pub fn reader(&self) -> FlowReader {
        FlowReader {
            state: self.state.clone(),
        }
    }

    pub fn bounds(&self) -> &FlowBounds {
        &self.bounds
    }

    pub fn current_target(&self) -> FlowTarget {
        self.state.load().target()
    }

    pub fn state(&self) -> FlowState {
        **self.state.load()
    }

    /// Folds a sample into the EMA and publishes the new target.
    ///
    /// `in_flight` is the number of batches still running. The published
    /// budget never drops below it, so it steps down as those batches drain.
    pub fn observe(&mut self, sample: LoadSample, in_flight: usize) {
        let current = self.state();
        let value = sanitize(sample.value);

        let ema = match current.ema {
            None => value,
            Some(prev) => self.alpha * value + (1.0 - self.alpha) * prev,
        };
        let ema = if ema.is_finite() { ema } else { f64::MAX };

        let proposed = self.bounds.clamp(self.policy.target(ema, &self.bounds));

        let batch_size = with_hysteresis(
            current.batch_size,
            proposed.batch_size,
            self.bounds.min_batch_size,
            self.bounds.max_batch_size,
            self.hysteresis,
        );
        let concurrency_budget = with_hysteresis(
            current.concurrency_budget,
            proposed.concurrency_budget,
            self.bounds.min_concurrency,
            self.bounds.max_concurrency,
            self.hysteresis,
        )
        .max(in_flight.min(self.bounds.max_concurrency));

        if batch_size != current.batch_size || concurrency_budget != current.concurrency_budget {
            debug!(
                ema,
                batch_size,
                concurrency_budget,
                previous_batch_size = current.batch_size,
                previous_concurrency_budget = current.concurrency_budget,
                "flow target changed"
            );
        }

        self.state.store(Arc::new(FlowState {
            ema: Some(ema),
            batch_size,
            concurrency_budget,
            samples: current.samples + 1,
        }));
    }
}

impl FlowReader {
    pub fn current_target(&self) -> FlowTarget {
        self.state.load().target()
    }

    pub fn state(&self) -> FlowState {
        **self.state.load()
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Only move to `proposed` if it is far enough from `current`, or if it is
/// one of the bounds.
fn with_hysteresis(
    current: usize,
    proposed: usize,
    min: usize,
    max: usize,
    hysteresis: f64,
) -> usize {
    if proposed == current {
        return current;
    }

    let threshold = hysteresis * (max - min) as f64;
    let delta = (proposed as f64 - current as f64).abs();

    if delta > threshold || proposed == min || proposed == max {
        proposed
    } else {
        current
    }
}

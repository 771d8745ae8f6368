//! Mapping from smoothed load to a flow target.
use super::{FlowBounds, FlowTarget};

/// Maps the smoothed load to a target batch size and concurrency budget.
///
/// The controller clamps the result to the configured bounds, so a policy
/// is free to return anything.
pub trait FlowPolicy: Send + Sync + 'static {
    fn target(&self, ema: f64, bounds: &FlowBounds) -> FlowTarget;
}

/// Shrinks the target smoothly as the load grows.
///
/// At zero load the target is the upper bound, at `reference` load it sits
/// halfway, and it approaches the lower bound as the load keeps growing.
#[derive(Debug, Clone, Copy)]
pub struct InverseLoadPolicy {
    reference: f64,
}

/// Pressure levels, as a multiple of the reference load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureLevel {
    /// Below half the reference load.
    Normal,
    /// Below the reference load.
    Elevated,
    /// Below twice the reference load.
    High,
    /// Anything above.
    Overloaded,
}

/// Moves the target in discrete steps based on the pressure level.
#[derive(Debug, Clone, Copy)]
pub struct SteppedLoadPolicy {
    reference: f64,
}

impl InverseLoadPolicy {
    pub fn new(reference: f64) -> Self {
        Self { reference }
    }
}

impl FlowPolicy for InverseLoadPolicy {
    fn target(&self, ema: f64, bounds: &FlowBounds) -> FlowTarget {
        let fraction = self.reference / (self.reference + ema.max(0.0));

        FlowTarget {
            batch_size: interpolate(bounds.min_batch_size, bounds.max_batch_size, fraction),
            concurrency_budget: interpolate(
                bounds.min_concurrency,
                bounds.max_concurrency,
                fraction,
            ),
        }
    }
}

impl PressureLevel {
    pub fn from_pressure(pressure: f64) -> Self {
        match pressure {
            p if p < 0.5 => Self::Normal,
            p if p < 1.0 => Self::Elevated,
            p if p < 2.0 => Self::High,
            _ => Self::Overloaded,
        }
    }

    /// Fraction of the `[min, max]` range to use at this level.
    pub fn fraction(self) -> f64 {
        match self {
            Self::Normal => 1.0,
            Self::Elevated => 0.66,
            Self::High => 0.33,
            Self::Overloaded => 0.0,
        }
    }
}

impl SteppedLoadPolicy {
    pub fn new(reference: f64) -> Self {
        Self { reference }
    }
}

impl FlowPolicy for SteppedLoadPolicy {
    fn target(&self, ema: f64, bounds: &FlowBounds) -> FlowTarget {
        let fraction = PressureLevel::from_pressure(ema / self.reference).fraction();

        FlowTarget {
            batch_size: interpolate(bounds.min_batch_size, bounds.max_batch_size, fraction),
            concurrency_budget: interpolate(
                bounds.min_concurrency,
                bounds.max_concurrency,
                fraction,
            ),
        }
    }
}

fn interpolate(min: usize, max: usize, fraction: f64) -> usize {
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let span = max.saturating_sub(min) as f64;
    min + (span * fraction).round() as usize
}

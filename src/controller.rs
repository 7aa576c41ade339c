//! Batch-size feedback controller.
//!
//! The controller keeps the number of operations per submission inside
//! `[n_min, n_max]` and steers it so the account's CPU quota sits just under
//! saturation.  Far from the target band it doubles; above the red line it
//! halves; inside the band it takes unit steps against the trend of the fast
//! average relative to the slow one, with a small dead zone so a converged
//! system stays put.

use crate::ema::{EmaPair, Utilization};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Smallest batch ever submitted.
pub const N_MIN: usize = 2;
/// Largest batch ever submitted.
pub const N_MAX: usize = 256;
/// Utilization the controller aims to hold.
pub const EXPECT: f64 = 0.95;
/// Utilization above which the account is considered overheated.
pub const RED: f64 = 0.99;
/// Relative fast/slow divergence below which no unit step is taken.
pub const TREND_THRESHOLD: f64 = 0.001;

/// Tuning knobs for [`BatchSizeController`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerParams {
    /// Lower bound on the batch size.
    pub n_min: usize,
    /// Upper bound on the batch size.
    pub n_max: usize,
    /// Start of the target utilization band.
    pub expect: f64,
    /// End of the target band; above it the batch is cut.
    pub red: f64,
    /// Dead-zone width for the unit-step rule, relative to the slow average.
    pub trend_threshold: f64,
}

impl Default for ControllerParams {
    fn default() -> Self {
        Self {
            n_min: N_MIN,
            n_max: N_MAX,
            expect: EXPECT,
            red: RED,
            trend_threshold: TREND_THRESHOLD,
        }
    }
}

/// Which rule fired on an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Adjustment {
    /// Far below the band: size doubled.
    Doubled,
    /// Above the red line: size halved.
    Halved,
    /// Inside the band and trending up: size reduced by one.
    Decremented,
    /// Inside the band and trending down: size raised by one.
    Incremented,
    /// Converged, or already at the relevant bound.
    Unchanged,
    /// Safety clamp: size forced to the minimum.
    Clamped,
}

impl fmt::Display for Adjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Doubled => "doubled",
            Self::Halved => "halved",
            Self::Decremented => "decreased by 1",
            Self::Incremented => "increased by 1",
            Self::Unchanged => "unchanged",
            Self::Clamped => "clamped to minimum",
        };
        f.write_str(label)
    }
}

/// Bounded integer state machine over the batch size.
#[derive(Debug, Clone)]
pub struct BatchSizeController {
    params: ControllerParams,
    size: usize,
}

impl BatchSizeController {
    /// New controller starting at `params.n_min`.
    pub fn new(params: ControllerParams) -> Self {
        Self {
            size: params.n_min,
            params,
        }
    }

    /// Starts from an explicit size, clamped into bounds.
    pub fn with_size(params: ControllerParams, size: usize) -> Self {
        Self {
            size: size.clamp(params.n_min, params.n_max),
            params,
        }
    }

    /// Current batch size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Parameters in effect.
    pub fn params(&self) -> &ControllerParams {
        &self.params
    }

    /// Periodic tuning step driven by the fast/slow averages.
    pub fn adjust(&mut self, pair: EmaPair) -> Adjustment {
        let p = self.params;
        if pair.fast < p.expect {
            let next = self.size.saturating_mul(2).min(p.n_max);
            return self.set(next, Adjustment::Doubled);
        }
        if pair.fast > p.red {
            let next = self.size.div_ceil(2).max(p.n_min);
            return self.set(next, Adjustment::Halved);
        }
        // slow is only zero before the tracker is seeded
        if pair.slow == 0.0 {
            return Adjustment::Unchanged;
        }
        let divergence = (pair.fast - pair.slow).abs() / pair.slow;
        if divergence <= p.trend_threshold {
            return Adjustment::Unchanged;
        }
        if pair.fast > pair.slow {
            if self.size > p.n_min {
                return self.set(self.size - 1, Adjustment::Decremented);
            }
        } else if self.size < p.n_max {
            return self.set(self.size + 1, Adjustment::Incremented);
        }
        Adjustment::Unchanged
    }

    /// Returns true when the sample or either average is above the red line.
    pub fn is_overheated(&self, sample: Utilization, pair: EmaPair) -> bool {
        let red = self.params.red;
        sample.ratio() > red || pair.fast > red || pair.slow > red
    }

    /// Safety clamp, applied on every mining cycle independent of the tuning
    /// cadence. Returns `Some(Adjustment::Clamped)` when it fired.
    pub fn enforce_ceiling(&mut self, sample: Utilization, pair: EmaPair) -> Option<Adjustment> {
        if !self.is_overheated(sample, pair) {
            return None;
        }
        self.size = self.params.n_min;
        Some(Adjustment::Clamped)
    }

    fn set(&mut self, next: usize, rule: Adjustment) -> Adjustment {
        if next == self.size {
            return Adjustment::Unchanged;
        }
        self.size = next;
        rule
    }
}

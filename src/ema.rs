//! Exponential moving averages of the account's CPU utilization.
//!
//! Two averages are tracked side by side: a fast one that reacts within a
//! couple of samples and a slow one spanning roughly the last thousand.  The
//! batch-size controller reads their level and their divergence.

use serde::Serialize;
use std::fmt;

/// Weight kept by the fast average on every update.
pub const FAST_DECAY: f64 = 0.5;
/// Weight kept by the slow average on every update.
pub const SLOW_DECAY: f64 = 0.999;

/// Consumed-versus-allotted ratio of the resource quota, always in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct Utilization(f64);

impl Utilization {
    /// Wraps a ratio, clamping it into `[0, 1]`; NaN is treated as saturated.
    pub fn new(ratio: f64) -> Self {
        if ratio.is_nan() {
            return Self(1.0);
        }
        Self(ratio.clamp(0.0, 1.0))
    }

    /// Builds a sample from raw usage counters. A zero allotment is saturated.
    pub fn from_usage(used: u64, max: u64) -> Self {
        if max == 0 {
            return Self(1.0);
        }
        Self::new(used as f64 / max as f64)
    }

    /// The ratio.
    pub fn ratio(self) -> f64 {
        self.0
    }
}

impl fmt::Display for Utilization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_percent(self.0))
    }
}

/// Renders a ratio as a percentage truncated to two decimals, e.g. `95.37%`.
pub fn format_percent(ratio: f64) -> String {
    format!("{:.2}%", (ratio * 10_000.0).floor() / 100.0)
}

/// Current values of both averages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EmaPair {
    /// Short-horizon average (decay 0.5).
    pub fast: f64,
    /// Long-horizon average (decay 0.999).
    pub slow: f64,
}

impl EmaPair {
    /// Both averages at the same value.
    pub fn uniform(value: f64) -> Self {
        Self {
            fast: value,
            slow: value,
        }
    }
}

/// Tracker holding the fast/slow pair.
///
/// The first sample seeds both averages so a cold start is not biased
/// toward zero.
#[derive(Debug, Clone, Default)]
pub struct UtilizationEma {
    pair: Option<EmaPair>,
    last_sample: Option<Utilization>,
}

impl UtilizationEma {
    /// Empty tracker; the first `update` seeds it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a sample into both averages and returns the new pair.
    pub fn update(&mut self, sample: Utilization) -> EmaPair {
        let x = sample.ratio();
        let next = match self.pair {
            None => EmaPair::uniform(x),
            Some(prev) => EmaPair {
                fast: FAST_DECAY * prev.fast + (1.0 - FAST_DECAY) * x,
                slow: SLOW_DECAY * prev.slow + (1.0 - SLOW_DECAY) * x,
            },
        };
        self.pair = Some(next);
        self.last_sample = Some(sample);
        next
    }

    /// Current pair, if seeded.
    pub fn current(&self) -> Option<EmaPair> {
        self.pair
    }

    /// Most recent raw sample.
    pub fn last_sample(&self) -> Option<Utilization> {
        self.last_sample
    }
}

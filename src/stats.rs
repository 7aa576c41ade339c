//! Run counters shared by every worker.

use crate::quantity::Quantity;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Lock-free counters updated from the mining, adjustment and donation paths.
#[derive(Debug, Default)]
pub struct MinerStats {
    cycles_total: AtomicU64,
    batches_submitted_total: AtomicU64,
    operations_sent_total: AtomicU64,
    overuse_skips_total: AtomicU64,
    busy_skips_total: AtomicU64,
    duplicates_total: AtomicU64,
    overuse_rejections_total: AtomicU64,
    failures_total: AtomicU64,
    mined_units_total: AtomicI64,
    donated_units_total: AtomicI64,
}

/// Point-in-time copy of [`MinerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Mining cycles started.
    pub cycles: u64,
    /// Batches accepted by the ledger.
    pub batches_submitted: u64,
    /// Operations inside accepted batches.
    pub operations_sent: u64,
    /// Attempts skipped by the overuse backoff.
    pub overuse_skips: u64,
    /// Cycles skipped because the account was overheated.
    pub busy_skips: u64,
    /// Duplicate rejections.
    pub duplicates: u64,
    /// Overuse rejections.
    pub overuse_rejections: u64,
    /// Failed cycles and donations.
    pub failures: u64,
    /// Sum of positive per-cycle yields.
    pub mined: Quantity,
    /// Sum of successful donations.
    pub donated: Quantity,
}

impl MinerStats {
    pub(crate) fn inc_cycles(&self) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_submitted(&self, operations: usize) {
        self.batches_submitted_total.fetch_add(1, Ordering::Relaxed);
        self.operations_sent_total
            .fetch_add(operations as u64, Ordering::Relaxed);
    }

    pub(crate) fn inc_overuse_skips(&self) {
        self.overuse_skips_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_busy_skips(&self) {
        self.busy_skips_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_duplicates(&self) {
        self.duplicates_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_overuse_rejections(&self) {
        self.overuse_rejections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_failures(&self) {
        self.failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_mined(&self, amount: Quantity) {
        self.mined_units_total
            .fetch_add(amount.units(), Ordering::Relaxed);
    }

    pub(crate) fn add_donated(&self, amount: Quantity) {
        self.donated_units_total
            .fetch_add(amount.units(), Ordering::Relaxed);
    }

    /// Reads every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles: self.cycles_total.load(Ordering::Relaxed),
            batches_submitted: self.batches_submitted_total.load(Ordering::Relaxed),
            operations_sent: self.operations_sent_total.load(Ordering::Relaxed),
            overuse_skips: self.overuse_skips_total.load(Ordering::Relaxed),
            busy_skips: self.busy_skips_total.load(Ordering::Relaxed),
            duplicates: self.duplicates_total.load(Ordering::Relaxed),
            overuse_rejections: self.overuse_rejections_total.load(Ordering::Relaxed),
            failures: self.failures_total.load(Ordering::Relaxed),
            mined: Quantity::from_units(self.mined_units_total.load(Ordering::Relaxed)),
            donated: Quantity::from_units(self.donated_units_total.load(Ordering::Relaxed)),
        }
    }

    /// One-line summary for logs.
    pub fn render(&self) -> String {
        let s = self.snapshot();
        format!(
            "cycles={} batches={} ops={} skipped_overuse={} skipped_busy={} duplicates={} overuse={} failures={} mined={} donated={}",
            s.cycles,
            s.batches_submitted,
            s.operations_sent,
            s.overuse_skips,
            s.busy_skips,
            s.duplicates,
            s.overuse_rejections,
            s.failures,
            s.mined,
            s.donated,
        )
    }
}

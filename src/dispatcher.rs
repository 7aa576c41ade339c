//! Builds batches, submits them and classifies what came back.

use crate::ledger::{LedgerClient, Operation, Receipt, SubmitOutcome};
use crate::quantity::{Asset, Quantity};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// One-shot backoff flag raised by a CPU overuse rejection.
///
/// The next submission attempt consumes it and is skipped, so one rejection
/// costs exactly one cycle instead of a burst of retries against the same
/// quota window.
#[derive(Debug, Default)]
pub struct OveruseLatch(AtomicBool);

impl OveruseLatch {
    /// Unset latch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag.
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clears the flag and reports whether it was raised.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    /// Reads the flag without consuming it.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Lowers the flag.
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Shape shared by every operation in a batch.
#[derive(Debug, Clone)]
pub struct BatchTemplate {
    /// Token spent by each operation.
    pub asset: Asset,
    /// Account receiving every operation.
    pub sink: String,
    /// Smallest amount step.
    pub increment: Quantity,
    /// Amounts are drawn uniformly from `1..=steps` increments.
    pub steps: u32,
    /// Memo attached to each operation.
    pub memo: String,
}

impl BatchTemplate {
    /// Draws one amount; varying amounts keep consecutive batches from being
    /// byte-identical.
    pub fn random_amount<R: Rng + ?Sized>(&self, rng: &mut R) -> Quantity {
        let step = rng.gen_range(1..=self.steps.max(1)) as i64;
        Quantity::from_units(self.increment.units().saturating_mul(step))
    }
}

/// Result of one dispatch attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Batch accepted.
    Submitted {
        /// Ledger acknowledgement.
        receipt: Receipt,
        /// Operations in the batch.
        operations: usize,
    },
    /// Pending overuse flag consumed; nothing was sent.
    Skipped,
    /// Ledger had already seen an identical transaction.
    Duplicate,
    /// Rejected for CPU overuse; the next attempt will be skipped.
    Overuse,
}

/// Reportable dispatch failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("submission of {operations} operations failed: {detail}")]
pub struct DispatchError {
    /// Operations in the failed batch.
    pub operations: usize,
    /// Error text from the ledger or transport.
    pub detail: String,
}

/// Submits batches through a [`LedgerClient`].
pub struct BatchDispatcher {
    ledger: Arc<dyn LedgerClient>,
    template: BatchTemplate,
    overuse: Arc<OveruseLatch>,
}

impl BatchDispatcher {
    /// New dispatcher sharing `overuse` with any sibling workers.
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        template: BatchTemplate,
        overuse: Arc<OveruseLatch>,
    ) -> Self {
        Self {
            ledger,
            template,
            overuse,
        }
    }

    /// The overuse flag this dispatcher raises and consumes.
    pub fn overuse(&self) -> &Arc<OveruseLatch> {
        &self.overuse
    }

    /// Builds `size` transfers from `account` with randomized amounts.
    pub fn build_batch<R: Rng + ?Sized>(
        &self,
        size: usize,
        account: &str,
        rng: &mut R,
    ) -> Vec<Operation> {
        (0..size)
            .map(|_| Operation {
                asset: self.template.asset.clone(),
                from: account.to_string(),
                to: self.template.sink.clone(),
                amount: self.template.random_amount(rng),
                memo: self.template.memo.clone(),
            })
            .collect()
    }

    /// Submits one batch of `size` operations for `account`.
    pub async fn submit(
        &self,
        size: usize,
        account: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        if self.overuse.take() {
            debug!(batch_size = size, "overuse backoff: skipping this submission");
            return Ok(DispatchOutcome::Skipped);
        }
        let operations = {
            let mut rng = rand::thread_rng();
            self.build_batch(size, account, &mut rng)
        };
        match self.ledger.submit_batch(&operations).await {
            SubmitOutcome::Success(receipt) => {
                self.overuse.clear();
                Ok(DispatchOutcome::Submitted {
                    receipt,
                    operations: operations.len(),
                })
            }
            SubmitOutcome::DuplicateRejected => {
                debug!(batch_size = size, "duplicate transaction ignored");
                Ok(DispatchOutcome::Duplicate)
            }
            SubmitOutcome::OveruseRejected => {
                warn!(
                    batch_size = size,
                    "transaction exceeded billable CPU time; backing off one cycle"
                );
                self.overuse.set();
                Ok(DispatchOutcome::Overuse)
            }
            SubmitOutcome::OtherError(detail) => Err(DispatchError {
                operations: operations.len(),
                detail,
            }),
        }
    }
}

//! Proportional donation of newly accrued balance.
//!
//! Every check compares the current balance of the mined asset with the last
//! one observed.  Growth small enough to be mining yield is shared with a
//! fixed recipient at a fixed ratio; growth above the deposit threshold is
//! taken to be a manual deposit and left alone.

use crate::ledger::{LedgerClient, LedgerError, SubmitOutcome};
use crate::quantity::{Asset, Quantity};
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Parameters of the donation rule.
#[derive(Debug, Clone)]
pub struct DonationPolicy {
    /// Asset whose growth is shared.
    pub asset: Asset,
    /// Account receiving donations.
    pub recipient: String,
    /// Share of each delta donated, in basis points.
    pub ratio_bps: u32,
    /// Deltas above this are treated as deposits.
    pub deposit_threshold: Quantity,
    /// Donations at or below this are skipped.
    pub min_donation: Quantity,
}

/// What a single check decided for a given delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DonationDecision {
    /// Transfer this amount.
    Donate(Quantity),
    /// Delta looked like an external deposit.
    Deposit(Quantity),
    /// Share of the delta too small to be worth a transaction.
    Negligible(Quantity),
}

impl DonationPolicy {
    /// Pure decision for a balance delta.
    pub fn decide(&self, delta: Quantity) -> DonationDecision {
        if delta > self.deposit_threshold {
            return DonationDecision::Deposit(delta);
        }
        if !delta.scaled_exceeds(self.ratio_bps, self.min_donation) {
            return DonationDecision::Negligible(delta);
        }
        DonationDecision::Donate(delta.scale_bps(self.ratio_bps))
    }
}

/// Outcome of one donation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DonationReport {
    /// Delta against the previous observation.
    pub delta: Quantity,
    /// Rule applied.
    pub decision: DonationDecision,
    /// Ledger answer when a transfer was attempted.
    pub outcome: Option<SubmitOutcome>,
}

/// Policy plus the last observed balance.
#[derive(Debug, Clone)]
pub struct DonationModule {
    policy: DonationPolicy,
    last_observed: Quantity,
}

impl DonationModule {
    /// New module anchored at `baseline`.
    pub fn new(policy: DonationPolicy, baseline: Quantity) -> Self {
        Self {
            policy,
            last_observed: baseline,
        }
    }

    /// Policy in effect.
    pub fn policy(&self) -> &DonationPolicy {
        &self.policy
    }

    /// Balance the next delta is measured against.
    pub fn last_observed(&self) -> Quantity {
        self.last_observed
    }

    /// Re-anchors the baseline.
    pub fn rebase(&mut self, balance: Quantity) {
        self.last_observed = balance;
    }

    /// Runs one check for `account`.
    ///
    /// The baseline is re-anchored on every check. After a transfer it is
    /// refreshed from a fresh query so the donation itself and any yield
    /// mined meanwhile are both accounted for.
    pub async fn check(
        &mut self,
        ledger: &dyn LedgerClient,
        account: &str,
    ) -> Result<DonationReport, LedgerError> {
        let current = ledger.get_balance(account, &self.policy.asset).await?.amount;
        let delta = current - self.last_observed;
        let decision = self.policy.decide(delta);
        let amount = match decision {
            DonationDecision::Donate(amount) => amount,
            DonationDecision::Deposit(delta) => {
                info!(%delta, symbol = %self.policy.asset.symbol, "balance jump treated as deposit; not donating");
                self.last_observed = current;
                return Ok(DonationReport {
                    delta,
                    decision,
                    outcome: None,
                });
            }
            DonationDecision::Negligible(_) => {
                debug!(%delta, "donation below minimum; skipped");
                self.last_observed = current;
                return Ok(DonationReport {
                    delta,
                    decision,
                    outcome: None,
                });
            }
        };

        let memo = format!("donated from {account}");
        let outcome = ledger
            .transfer(account, &self.policy.recipient, &self.policy.asset, amount, &memo)
            .await;
        match &outcome {
            SubmitOutcome::Success(_) => info!(
                %amount,
                symbol = %self.policy.asset.symbol,
                recipient = %self.policy.recipient,
                "donated"
            ),
            SubmitOutcome::DuplicateRejected => debug!("duplicate donation transfer ignored"),
            SubmitOutcome::OveruseRejected => {
                warn!(%amount, "donation rejected for CPU overuse")
            }
            SubmitOutcome::OtherError(detail) => {
                error!(%amount, %detail, "donation transfer failed")
            }
        }

        match ledger.get_balance(account, &self.policy.asset).await {
            Ok(fresh) => self.last_observed = fresh.amount,
            Err(err) => {
                warn!(%err, "balance refresh after donation failed; anchoring on pre-donation balance");
                self.last_observed = current;
            }
        }
        Ok(DonationReport {
            delta,
            decision,
            outcome: Some(outcome),
        })
    }
}

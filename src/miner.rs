//! Cycle orchestration: startup checks, the periodic jobs and shutdown.
//!
//! Three jobs run on their own intervals: mining (EMA update, safety clamp,
//! bracketed balance reads around one dispatch), batch-size adjustment and
//! the donation check.  With one worker they share a single task, so a cycle
//! never overlaps another job.  With several workers each runs its own mining
//! ticker against the shared state while adjustment and donation stay on the
//! control task.  Shutdown is observed between cycles only; an in-flight
//! cycle always completes.

use crate::config::{MinerConfig, Schedule};
use crate::controller::{Adjustment, BatchSizeController};
use crate::dispatcher::{BatchDispatcher, DispatchError, DispatchOutcome, OveruseLatch};
use crate::donation::{DonationDecision, DonationModule, DonationReport};
use crate::ema::{format_percent, Utilization, UtilizationEma};
use crate::ledger::{LedgerClient, LedgerError, SubmitOutcome};
use crate::quantity::{Asset, Quantity};
use crate::stats::MinerStats;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Mutable state shared by every worker and job.
#[derive(Debug)]
pub struct MinerState {
    /// Fast/slow utilization averages.
    pub ema: Mutex<UtilizationEma>,
    /// Batch-size state machine.
    pub controller: Mutex<BatchSizeController>,
    /// Donation baseline.
    pub donation: Mutex<DonationModule>,
    /// One-shot overuse backoff.
    pub overuse: Arc<OveruseLatch>,
    /// Run counters.
    pub stats: MinerStats,
}

/// Balances observed by [`Miner::preflight`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Funding {
    /// Primary asset balance.
    pub primary: Quantity,
    /// Mined asset balance.
    pub mined: Quantity,
}

/// What one mining cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Account overheated; batch size clamped and nothing sent.
    Busy,
    /// Dispatch completed with a non-error outcome.
    Dispatched(DispatchOutcome),
    /// Dispatch failed; reported and retried next cycle.
    Failed(DispatchError),
}

/// Report of one mining cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Instantaneous utilization sample.
    pub sample: Utilization,
    /// Batch size used (or that would have been used).
    pub batch_size: usize,
    /// Result of the cycle.
    pub outcome: CycleOutcome,
    /// Balance growth across the submission; zero when nothing was sent.
    pub mined: Quantity,
}

/// Errors surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum MinerError {
    #[error("insufficient funds to operate: balance {balance} {symbol} is below the minimum {minimum}")]
    /// Startup balance check failed.
    InsufficientFunds {
        /// Observed balance.
        balance: Quantity,
        /// Required minimum.
        minimum: Quantity,
        /// Asset symbol.
        symbol: String,
    },
    #[error("ledger error: {0}")]
    /// A read-only ledger query failed.
    Ledger(#[from] LedgerError),
    #[error("worker task failed: {0}")]
    /// A worker task panicked or was aborted.
    Worker(String),
}

/// Orchestrates the mining, adjustment and donation jobs for one account.
pub struct Miner {
    ledger: Arc<dyn LedgerClient>,
    account: String,
    primary_asset: Asset,
    mined_asset: Asset,
    dispatcher: BatchDispatcher,
    state: Arc<MinerState>,
    fixed_batch: Option<usize>,
    donation_enabled: bool,
    min_balance: Quantity,
    funds_cooldown: Duration,
    schedule: Schedule,
    workers: usize,
}

impl Miner {
    /// Builds a miner from validated configuration.
    pub fn new(config: &MinerConfig, ledger: Arc<dyn LedgerClient>) -> Self {
        let overuse = Arc::new(OveruseLatch::new());
        let state = Arc::new(MinerState {
            ema: Mutex::new(UtilizationEma::new()),
            controller: Mutex::new(BatchSizeController::new(config.controller)),
            donation: Mutex::new(DonationModule::new(
                config.donation_policy(),
                Quantity::ZERO,
            )),
            overuse: overuse.clone(),
            stats: MinerStats::default(),
        });
        let dispatcher = BatchDispatcher::new(ledger.clone(), config.batch_template(), overuse);
        Self {
            ledger,
            account: config.account.clone(),
            primary_asset: config.primary_asset.clone(),
            mined_asset: config.mined_asset.clone(),
            dispatcher,
            state,
            fixed_batch: config.fixed_batch_size(),
            donation_enabled: config.donation,
            min_balance: config.min_balance,
            funds_cooldown: Duration::from_millis(config.insufficient_funds_cooldown_ms),
            schedule: config.schedule(),
            workers: config.workers.max(1),
        }
    }

    /// Shared state handle.
    pub fn state(&self) -> &Arc<MinerState> {
        &self.state
    }

    /// Mining account.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Batch size the next cycle would use.
    pub async fn batch_size(&self) -> usize {
        match self.fixed_batch {
            Some(size) => size,
            None => self.state.controller.lock().await.size(),
        }
    }

    /// Startup checks: reads both balances, seeds the donation baseline and
    /// the EMA pair, and enforces the minimum primary balance.
    ///
    /// When the balance is too low this waits out the cooldown before
    /// returning [`MinerError::InsufficientFunds`], so a supervisor that
    /// restarts on failure does not spin against an unfunded account.
    pub async fn preflight(&self) -> Result<Funding, MinerError> {
        let primary = self
            .ledger
            .get_balance(&self.account, &self.primary_asset)
            .await?;
        info!(balance = %primary, "primary balance");
        let mined = self
            .ledger
            .get_balance(&self.account, &self.mined_asset)
            .await?;
        info!(balance = %mined, "mined balance");
        self.state.donation.lock().await.rebase(mined.amount);

        let sample = self.ledger.get_resource_usage(&self.account).await?;
        self.state.ema.lock().await.update(sample);
        info!(cpu = %sample, "seeded utilization averages");

        if primary.amount < self.min_balance {
            error!(
                balance = %primary.amount,
                minimum = %self.min_balance,
                symbol = %self.primary_asset.symbol,
                cooldown_ms = self.funds_cooldown.as_millis() as u64,
                "balance too low to operate; deposit more before restarting"
            );
            time::sleep(self.funds_cooldown).await;
            return Err(MinerError::InsufficientFunds {
                balance: primary.amount,
                minimum: self.min_balance,
                symbol: self.primary_asset.symbol.clone(),
            });
        }
        Ok(Funding {
            primary: primary.amount,
            mined: mined.amount,
        })
    }

    /// One mining cycle.
    ///
    /// Errors are limited to the utilization read and the pre-submission
    /// balance read; dispatch failures are classified into the report, and a
    /// failed post-submission read only leaves `mined` at zero.
    ///
    /// With several workers the bracketing reads of concurrent cycles
    /// overlap, so the measured growth can include sibling yield. It is still
    /// reported per cycle but only added to [`MinerStats`] with one worker.
    pub async fn mine_once(&self) -> Result<CycleReport, MinerError> {
        let stats = &self.state.stats;
        stats.inc_cycles();
        let sample = self.ledger.get_resource_usage(&self.account).await?;
        let pair = self.state.ema.lock().await.update(sample);

        let clamped = self
            .state
            .controller
            .lock()
            .await
            .enforce_ceiling(sample, pair);
        if clamped.is_some() {
            warn!(
                cpu = %sample,
                fast = %format_percent(pair.fast),
                slow = %format_percent(pair.slow),
                "CPU is too busy; not sending a transaction this cycle"
            );
            stats.inc_busy_skips();
            return Ok(CycleReport {
                sample,
                batch_size: self.batch_size().await,
                outcome: CycleOutcome::Busy,
                mined: Quantity::ZERO,
            });
        }

        let batch_size = self.batch_size().await;
        let before = self
            .ledger
            .get_balance(&self.account, &self.mined_asset)
            .await?;
        let dispatched = self.dispatcher.submit(batch_size, &self.account).await;
        let outcome = match dispatched {
            Ok(outcome) => {
                match &outcome {
                    DispatchOutcome::Submitted { operations, .. } => {
                        stats.record_submitted(*operations)
                    }
                    DispatchOutcome::Skipped => stats.inc_overuse_skips(),
                    DispatchOutcome::Duplicate => stats.inc_duplicates(),
                    DispatchOutcome::Overuse => stats.inc_overuse_rejections(),
                }
                CycleOutcome::Dispatched(outcome)
            }
            Err(err) => {
                error!(%err, batch_size, "dispatch failed");
                stats.inc_failures();
                CycleOutcome::Failed(err)
            }
        };
        let mined = match self
            .ledger
            .get_balance(&self.account, &self.mined_asset)
            .await
        {
            Ok(after) => (after.amount - before.amount).max(Quantity::ZERO),
            Err(err) => {
                warn!(%err, "balance read after submission failed; yield not measured");
                Quantity::ZERO
            }
        };
        if mined.is_positive() {
            if self.workers == 1 {
                info!(amount = %mined, symbol = %self.mined_asset.symbol, "mined");
                stats.add_mined(mined);
            } else {
                debug!(growth = %mined, symbol = %self.mined_asset.symbol, "balance grew across submission");
            }
        }
        Ok(CycleReport {
            sample,
            batch_size,
            outcome,
            mined,
        })
    }

    /// One adjustment of the batch size. Returns `None` for a fixed size or
    /// before the averages are seeded.
    pub async fn adjust_once(&self) -> Option<Adjustment> {
        info!(stats = %self.state.stats.render(), "progress");
        if self.fixed_batch.is_some() {
            return None;
        }
        let pair = self.state.ema.lock().await.current()?;
        let mut controller = self.state.controller.lock().await;
        let before = controller.size();
        let adjustment = controller.adjust(pair);
        info!(
            fast = %format_percent(pair.fast),
            slow = %format_percent(pair.slow),
            from = before,
            to = controller.size(),
            %adjustment,
            "batch size evaluated"
        );
        Some(adjustment)
    }

    /// One donation check.
    pub async fn donate_once(&self) -> Result<DonationReport, MinerError> {
        let mut donation = self.state.donation.lock().await;
        let report = donation.check(self.ledger.as_ref(), &self.account).await?;
        match (&report.decision, &report.outcome) {
            (DonationDecision::Donate(amount), Some(SubmitOutcome::Success(_))) => {
                self.state.stats.add_donated(*amount)
            }
            (DonationDecision::Donate(_), Some(SubmitOutcome::OtherError(_))) => {
                self.state.stats.inc_failures()
            }
            _ => {}
        }
        Ok(report)
    }

    /// Runs startup checks, then the periodic jobs until `shutdown` flips to
    /// `true` or its sender is dropped.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<(), MinerError> {
        let funding = self.preflight().await?;
        info!(
            account = %self.account,
            primary = %funding.primary,
            workers = self.workers,
            fixed_batch = ?self.fixed_batch,
            donation = self.donation_enabled,
            "miner started"
        );
        let result = if self.workers > 1 {
            self.clone().run_pool(shutdown).await
        } else {
            self.run_single(shutdown).await;
            Ok(())
        };
        info!(stats = %self.state.stats.render(), "miner stopped");
        result
    }

    async fn run_single(&self, mut shutdown: watch::Receiver<bool>) {
        let mut mine = ticker(self.schedule.dispatch);
        let mut adjust = ticker(self.schedule.adjust);
        let mut donate = ticker(self.schedule.donate);
        // interval() fires immediately; periodic jobs wait one full period
        adjust.reset();
        donate.reset();
        while !*shutdown.borrow() {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = adjust.tick() => {
                    self.adjust_once().await;
                }
                _ = donate.tick(), if self.donation_enabled => {
                    self.donate_logged().await;
                }
                _ = mine.tick() => {
                    self.mine_logged().await;
                }
            }
        }
    }

    async fn run_pool(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<(), MinerError> {
        let mut handles = Vec::with_capacity(self.workers);
        for worker in 0..self.workers {
            let miner = self.clone();
            let mut shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut mine = ticker(miner.schedule.dispatch);
                debug!(worker, "worker started");
                while !*shutdown.borrow() {
                    tokio::select! {
                        biased;
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = mine.tick() => {
                            miner.mine_logged().await;
                        }
                    }
                }
                debug!(worker, "worker stopped");
            }));
        }

        let mut shutdown = shutdown;
        let mut adjust = ticker(self.schedule.adjust);
        let mut donate = ticker(self.schedule.donate);
        adjust.reset();
        donate.reset();
        while !*shutdown.borrow() {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = adjust.tick() => {
                    self.adjust_once().await;
                }
                _ = donate.tick(), if self.donation_enabled => {
                    self.donate_logged().await;
                }
            }
        }

        let mut failure = None;
        for joined in futures::future::join_all(handles).await {
            if let Err(err) = joined {
                failure.get_or_insert_with(|| MinerError::Worker(err.to_string()));
            }
        }
        failure.map_or(Ok(()), Err)
    }

    async fn mine_logged(&self) {
        if let Err(err) = self.mine_once().await {
            self.state.stats.inc_failures();
            error!(%err, "mining cycle failed");
        }
    }

    async fn donate_logged(&self) {
        if let Err(err) = self.donate_once().await {
            warn!(%err, "donation check failed");
        }
    }
}

fn ticker(period: Duration) -> time::Interval {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

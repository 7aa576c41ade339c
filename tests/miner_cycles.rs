mod common;

use common::{config, qty, ScriptedLedger, ACCOUNT};
use quota_miner::{
    Adjustment, BatchSizeController, ControllerParams, CycleOutcome, DispatchOutcome,
    DonationDecision, LedgerClient, Miner, MinerError, SubmitOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn miner_with(ledger: &Arc<ScriptedLedger>, cfg: quota_miner::MinerConfig) -> Arc<Miner> {
    let client: Arc<dyn LedgerClient> = ledger.clone();
    Arc::new(Miner::new(&cfg, client))
}

#[tokio::test]
async fn overheated_cycle_clamps_and_sends_nothing() {
    let ledger = Arc::new(ScriptedLedger::new(0.5).with_balance("EOS", "5"));
    ledger.push_usage(&[0.995]);
    let miner = miner_with(&ledger, config());
    *miner.state().controller.lock().await =
        BatchSizeController::with_size(ControllerParams::default(), 64);

    let report = miner.mine_once().await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::Busy);
    assert_eq!(report.batch_size, 2);
    assert_eq!(miner.batch_size().await, 2);
    assert!(ledger.submissions().is_empty());
    assert_eq!(miner.state().stats.snapshot().busy_skips, 1);
}

#[tokio::test]
async fn cycle_reports_balance_growth_across_submission() {
    let ledger = Arc::new(
        ScriptedLedger::new(0.5)
            .with_balance("EOS", "5")
            .with_balance("EIDOS", "1")
            .with_reward("EIDOS", "0.0100"),
    );
    let miner = miner_with(&ledger, config());

    let report = miner.mine_once().await.unwrap();
    match &report.outcome {
        CycleOutcome::Dispatched(DispatchOutcome::Submitted { operations, .. }) => {
            assert_eq!(*operations, 2)
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(report.mined, qty("0.0100"));

    let batch = &ledger.submissions()[0];
    assert_eq!(batch.len(), 2);
    for op in batch {
        assert_eq!(op.from, ACCOUNT);
        assert_eq!(op.to, "eidosonecoin");
        assert_eq!(op.asset.symbol, "EOS");
        assert!((1..=3).contains(&op.amount.units()));
    }
    let stats = miner.state().stats.snapshot();
    assert_eq!(stats.batches_submitted, 1);
    assert_eq!(stats.operations_sent, 2);
    assert_eq!(stats.mined, qty("0.0100"));
}

#[tokio::test]
async fn overuse_rejection_skips_exactly_one_cycle() {
    let ledger = Arc::new(ScriptedLedger::new(0.5).with_balance("EOS", "5"));
    ledger.push_outcome(SubmitOutcome::OveruseRejected);
    let miner = miner_with(&ledger, config());

    let first = miner.mine_once().await.unwrap();
    assert_eq!(first.outcome, CycleOutcome::Dispatched(DispatchOutcome::Overuse));
    let second = miner.mine_once().await.unwrap();
    assert_eq!(second.outcome, CycleOutcome::Dispatched(DispatchOutcome::Skipped));
    let third = miner.mine_once().await.unwrap();
    assert!(matches!(
        third.outcome,
        CycleOutcome::Dispatched(DispatchOutcome::Submitted { .. })
    ));
    assert_eq!(ledger.submissions().len(), 2);

    let stats = miner.state().stats.snapshot();
    assert_eq!(stats.overuse_rejections, 1);
    assert_eq!(stats.overuse_skips, 1);
}

#[tokio::test]
async fn failed_submission_is_reported_and_mining_continues() {
    let ledger = Arc::new(ScriptedLedger::new(0.5).with_balance("EOS", "5"));
    ledger.push_outcome(SubmitOutcome::OtherError("assertion failure".into()));
    ledger.push_outcome(SubmitOutcome::DuplicateRejected);
    let miner = miner_with(&ledger, config());

    let failed = miner.mine_once().await.unwrap();
    match failed.outcome {
        CycleOutcome::Failed(err) => {
            assert_eq!(err.operations, 2);
            assert_eq!(err.detail, "assertion failure");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    let duplicate = miner.mine_once().await.unwrap();
    assert_eq!(
        duplicate.outcome,
        CycleOutcome::Dispatched(DispatchOutcome::Duplicate)
    );
    let stats = miner.state().stats.snapshot();
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.cycles, 2);
}

#[tokio::test(start_paused = true)]
async fn preflight_waits_out_cooldown_when_underfunded() {
    let ledger = Arc::new(ScriptedLedger::new(0.5).with_balance("EOS", "0.0005"));
    let miner = miner_with(&ledger, config());

    let started = tokio::time::Instant::now();
    let err = miner.preflight().await.unwrap_err();
    assert!(started.elapsed() >= Duration::from_secs(60));
    match err {
        MinerError::InsufficientFunds {
            balance, minimum, ..
        } => {
            assert_eq!(balance, qty("0.0005"));
            assert_eq!(minimum, qty("0.001"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn preflight_seeds_averages_and_donation_baseline() {
    let ledger = Arc::new(
        ScriptedLedger::new(0.42)
            .with_balance("EOS", "5")
            .with_balance("EIDOS", "7.5"),
    );
    let miner = miner_with(&ledger, config());

    let funding = miner.preflight().await.unwrap();
    assert_eq!(funding.primary, qty("5"));
    assert_eq!(funding.mined, qty("7.5"));
    assert_eq!(
        miner.state().donation.lock().await.last_observed(),
        qty("7.5")
    );
    let pair = miner.state().ema.lock().await.current().unwrap();
    assert_eq!(pair.fast, 0.42);
    assert_eq!(pair.slow, 0.42);
}

#[tokio::test]
async fn adjust_respects_fixed_batch_size() {
    let ledger = Arc::new(ScriptedLedger::new(0.4).with_balance("EOS", "5"));
    let mut cfg = config();
    cfg.batch_size = 16;
    let miner = miner_with(&ledger, cfg);

    miner.mine_once().await.unwrap();
    assert_eq!(miner.adjust_once().await, None);
    assert_eq!(miner.batch_size().await, 16);
    assert_eq!(ledger.submissions()[0].len(), 16);
}

#[tokio::test]
async fn adjust_waits_for_seeded_averages() {
    let ledger = Arc::new(ScriptedLedger::new(0.4).with_balance("EOS", "5"));
    let miner = miner_with(&ledger, config());

    assert_eq!(miner.adjust_once().await, None);
    miner.mine_once().await.unwrap();
    assert_eq!(miner.adjust_once().await, Some(Adjustment::Doubled));
    assert_eq!(miner.batch_size().await, 4);
}

#[tokio::test]
async fn donation_shares_yield_and_rebases() {
    let ledger = Arc::new(
        ScriptedLedger::new(0.5)
            .with_balance("EOS", "5")
            .with_balance("EIDOS", "10"),
    );
    let miner = miner_with(&ledger, config());
    miner.preflight().await.unwrap();

    ledger.set_balance("EIDOS", "10.1");
    let report = miner.donate_once().await.unwrap();
    assert_eq!(report.delta, qty("0.1"));
    assert_eq!(report.decision, DonationDecision::Donate(qty("0.005")));

    let transfer = ledger.submissions().pop().unwrap();
    assert_eq!(transfer.len(), 1);
    assert_eq!(transfer[0].to, "thinkmachine");
    assert_eq!(transfer[0].memo, format!("donated from {ACCOUNT}"));
    assert_eq!(transfer[0].asset.symbol, "EIDOS");
    assert_eq!(transfer[0].amount, qty("0.005"));

    assert_eq!(ledger.balance("EIDOS"), qty("10.095"));
    assert_eq!(
        miner.state().donation.lock().await.last_observed(),
        qty("10.095")
    );
    assert_eq!(miner.state().stats.snapshot().donated, qty("0.005"));
}

#[tokio::test]
async fn deposits_are_left_alone() {
    let ledger = Arc::new(
        ScriptedLedger::new(0.5)
            .with_balance("EOS", "5")
            .with_balance("EIDOS", "10"),
    );
    let miner = miner_with(&ledger, config());
    miner.preflight().await.unwrap();

    ledger.set_balance("EIDOS", "110");
    let report = miner.donate_once().await.unwrap();
    assert_eq!(report.decision, DonationDecision::Deposit(qty("100")));
    assert!(report.outcome.is_none());
    assert!(ledger.submissions().is_empty());
    assert_eq!(
        miner.state().donation.lock().await.last_observed(),
        qty("110")
    );
}

#[tokio::test(start_paused = true)]
async fn run_stops_between_cycles_on_shutdown() {
    let ledger = Arc::new(
        ScriptedLedger::new(0.5)
            .with_balance("EOS", "5")
            .with_reward("EIDOS", "0.0001"),
    );
    let miner = miner_with(&ledger, config());
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(miner.clone().run(stop_rx));

    tokio::time::sleep(Duration::from_millis(4_500)).await;
    stop_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let stats = miner.state().stats.snapshot();
    assert!(stats.cycles >= 4, "only {} cycles ran", stats.cycles);
    assert_eq!(stats.batches_submitted, stats.cycles);
    let submitted = ledger.submissions().len() as u64;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(ledger.submissions().len() as u64, submitted);
}

#[tokio::test(start_paused = true)]
async fn run_returns_when_shutdown_sender_drops() {
    let ledger = Arc::new(ScriptedLedger::new(0.5).with_balance("EOS", "5"));
    let mut cfg = config();
    cfg.donation = false;
    let miner = miner_with(&ledger, cfg);
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(miner.clone().run(stop_rx));

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    drop(stop_tx);
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn worker_pool_shares_state() {
    let ledger = Arc::new(
        ScriptedLedger::new(0.5)
            .with_balance("EOS", "5")
            .with_reward("EIDOS", "0.0001"),
    );
    let mut cfg = config();
    cfg.workers = 3;
    let miner = miner_with(&ledger, cfg);
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(miner.clone().run(stop_rx));

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    stop_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let stats = miner.state().stats.snapshot();
    assert!(stats.cycles >= 6, "only {} cycles ran", stats.cycles);
    assert_eq!(ledger.submissions().len() as u64, stats.batches_submitted);
    // overlapping brackets cannot attribute yield to one worker
    assert_eq!(stats.mined, qty("0"));
}

#[tokio::test(start_paused = true)]
async fn overuse_seen_by_one_worker_skips_the_next_attempt_of_any() {
    let ledger = Arc::new(ScriptedLedger::new(0.5).with_balance("EOS", "5"));
    ledger.push_outcome(SubmitOutcome::OveruseRejected);
    let mut cfg = config();
    cfg.workers = 3;
    let miner = miner_with(&ledger, cfg);
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(miner.clone().run(stop_rx));

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    stop_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let stats = miner.state().stats.snapshot();
    assert_eq!(stats.overuse_rejections, 1);
    assert_eq!(stats.overuse_skips, 1);
    assert_eq!(
        stats.cycles,
        stats.batches_submitted + stats.overuse_rejections + stats.overuse_skips
    );
    // the skipped attempt sent nothing
    assert_eq!(
        ledger.submissions().len() as u64,
        stats.batches_submitted + stats.overuse_rejections
    );
}

#[tokio::test(start_paused = true)]
async fn clamp_seen_by_one_worker_shrinks_every_batch() {
    let ledger = Arc::new(ScriptedLedger::new(0.5).with_balance("EOS", "5"));
    // first sample seeds the averages in preflight, the second overheats
    ledger.push_usage(&[0.5, 0.995]);
    let mut cfg = config();
    cfg.workers = 3;
    let miner = miner_with(&ledger, cfg);
    *miner.state().controller.lock().await =
        BatchSizeController::with_size(ControllerParams::default(), 64);
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(miner.clone().run(stop_rx));

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    stop_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let stats = miner.state().stats.snapshot();
    assert_eq!(stats.busy_skips, 1);
    let submissions = ledger.submissions();
    assert!(submissions.len() >= 3);
    assert!(submissions.iter().all(|batch| batch.len() == 2));
    assert_eq!(miner.batch_size().await, 2);
}

#[tokio::test]
async fn failed_post_submission_read_keeps_the_dispatch_outcome() {
    let ledger = Arc::new(
        ScriptedLedger::new(0.5)
            .with_balance("EOS", "5")
            .with_reward("EIDOS", "0.01"),
    );
    // read 0 brackets before the submission, read 1 after it
    ledger.fail_balance_reads_from(1);
    let miner = miner_with(&ledger, config());

    let report = miner.mine_once().await.unwrap();
    assert!(matches!(
        report.outcome,
        CycleOutcome::Dispatched(DispatchOutcome::Submitted { .. })
    ));
    assert_eq!(report.mined, qty("0"));
    let stats = miner.state().stats.snapshot();
    assert_eq!(stats.batches_submitted, 1);
    assert_eq!(stats.failures, 0);
}

#[tokio::test]
async fn failed_donation_transfer_counts_a_failure() {
    let ledger = Arc::new(
        ScriptedLedger::new(0.5)
            .with_balance("EOS", "5")
            .with_balance("EIDOS", "10"),
    );
    let miner = miner_with(&ledger, config());
    miner.preflight().await.unwrap();

    ledger.set_balance("EIDOS", "10.1");
    ledger.push_outcome(SubmitOutcome::OtherError("expired transaction".into()));
    let report = miner.donate_once().await.unwrap();
    assert_eq!(
        report.outcome,
        Some(SubmitOutcome::OtherError("expired transaction".into()))
    );
    let stats = miner.state().stats.snapshot();
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.donated, qty("0"));
    assert_eq!(
        miner.state().donation.lock().await.last_observed(),
        qty("10.1")
    );
}

#[tokio::test]
async fn run_refuses_underfunded_account() {
    let ledger = Arc::new(ScriptedLedger::new(0.5).with_balance("EOS", "0"));
    let mut cfg = config();
    cfg.insufficient_funds_cooldown_ms = 1;
    let miner = miner_with(&ledger, cfg);
    let (_stop_tx, stop_rx) = watch::channel(false);
    let err = miner.run(stop_rx).await.unwrap_err();
    assert!(matches!(err, MinerError::InsufficientFunds { .. }));
    assert!(ledger.submissions().is_empty());
}

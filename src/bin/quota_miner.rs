//! Command-line entry point for the quota miner.
//!
//! Loads the JSON config (when given), applies flag and `QM_*` environment
//! overrides, validates the result and runs the miner until Ctrl-C.

use clap::Parser;
use quota_miner::{HttpLedgerClient, LedgerClient, Miner, MinerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "quota-miner", version, about = "Keeps an account's CPU quota busy mining")]
struct Cli {
    /// JSON config file; flags and environment override its values.
    #[arg(long, env = "QM_CONFIG")]
    config: Option<PathBuf>,
    /// Mining account name.
    #[arg(long, env = "QM_ACCOUNT")]
    account: Option<String>,
    /// Handle the signing relay resolves to the account key.
    #[arg(long, env = "QM_CREDENTIAL", hide_env_values = true)]
    credential: Option<String>,
    /// Chain API base URL; repeat to build the random pool.
    #[arg(long = "endpoint", env = "QM_ENDPOINTS", value_delimiter = ',')]
    endpoints: Vec<String>,
    /// Signing relay base URL.
    #[arg(long, env = "QM_RELAY")]
    relay: Option<String>,
    /// Fixed batch size; 0 lets the controller decide.
    #[arg(long, env = "QM_BATCH_SIZE")]
    batch_size: Option<usize>,
    /// Disables the donation job.
    #[arg(long, env = "QM_NO_DONATION")]
    no_donation: bool,
    /// Concurrent mining workers.
    #[arg(long, env = "QM_WORKERS")]
    workers: Option<usize>,
    /// Mining cycle period in milliseconds.
    #[arg(long, env = "QM_DISPATCH_MS")]
    dispatch_ms: Option<u64>,
    /// Batch-size adjustment period in milliseconds.
    #[arg(long, env = "QM_ADJUST_MS")]
    adjust_ms: Option<u64>,
    /// Donation check period in milliseconds.
    #[arg(long, env = "QM_DONATE_MS")]
    donate_ms: Option<u64>,
    /// Emit logs as JSON lines.
    #[arg(long, env = "QM_LOG_JSON")]
    log_json: bool,
}

impl Cli {
    fn apply(self, cfg: &mut MinerConfig) {
        if let Some(account) = self.account {
            cfg.account = account;
        }
        if let Some(credential) = self.credential {
            cfg.credential = quota_miner::Credential::new(credential);
        }
        if !self.endpoints.is_empty() {
            cfg.endpoints = self.endpoints;
        }
        if let Some(relay) = self.relay {
            cfg.relay = relay;
        }
        if let Some(size) = self.batch_size {
            cfg.batch_size = size;
        }
        if self.no_donation {
            cfg.donation = false;
        }
        if let Some(workers) = self.workers {
            cfg.workers = workers;
        }
        if let Some(ms) = self.dispatch_ms {
            cfg.dispatch_period_ms = ms;
        }
        if let Some(ms) = self.adjust_ms {
            cfg.adjust_period_ms = ms;
        }
        if let Some(ms) = self.donate_ms {
            cfg.donation_period_ms = ms;
        }
    }
}

fn fatal(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let mut cfg = match &cli.config {
        Some(path) => MinerConfig::load(path).unwrap_or_else(|err| fatal(&err.to_string())),
        None => MinerConfig::default(),
    };
    cli.apply(&mut cfg);
    if let Err(err) = cfg.validate() {
        fatal(&err.to_string());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|err| fatal(&format!("failed to start runtime: {err}")));

    let result = runtime.block_on(async {
        let client = HttpLedgerClient::from_config(&cfg)
            .unwrap_or_else(|err| fatal(&format!("ledger client error: {err}")));
        let ledger: Arc<dyn LedgerClient> = Arc::new(client);
        let miner = Arc::new(Miner::new(&cfg, ledger));

        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown requested; finishing current cycle"),
                Err(err) => warn!(%err, "failed to listen for ctrl-c; stopping"),
            }
            let _ = stop_tx.send(true);
        });
        miner.run(stop_rx).await
    });
    if let Err(err) = result {
        fatal(&format!("miner error: {err}"));
    }
}

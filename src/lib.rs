#![deny(missing_docs)]

//! # quota_miner
//!
//! `quota_miner` keeps a ledger account's renewable CPU quota busy without
//! tripping the ledger's overuse penalty.  Each mining cycle submits a batch
//! of small transfers to a reward contract; the batch size follows a pair of
//! exponential moving averages of the account's utilization, and a share of
//! whatever the account earns is periodically donated to a fixed recipient.
//!
//! ## Components
//!
//! * [`ema`]: fast and slow utilization averages.
//! * [`controller`]: the batch-size state machine and its safety clamp.
//! * [`dispatcher`]: batch construction, submission and the one-shot
//!   overuse backoff.
//! * [`donation`]: the proportional donation rule.
//! * [`miner`]: startup checks and the periodic job scheduler.
//! * [`ledger`]: the [`LedgerClient`] capability every ledger access goes
//!   through; [`http`] provides the networked implementation behind the
//!   `net` feature.
//!
//! ## Usage
//!
//! ```rust
//! use quota_miner::{BatchSizeController, ControllerParams, UtilizationEma, Utilization};
//!
//! let mut ema = UtilizationEma::new();
//! let mut controller = BatchSizeController::new(ControllerParams::default());
//! let pair = ema.update(Utilization::new(0.40));
//! controller.adjust(pair);
//! assert_eq!(controller.size(), 4);
//! ```

pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod donation;
pub mod ema;
pub mod endpoint;
#[cfg(feature = "net")]
pub mod http;
pub mod ledger;
pub mod miner;
pub mod quantity;
pub mod stats;

pub use config::{ConfigError, Credential, MinerConfig, Schedule};
pub use controller::{Adjustment, BatchSizeController, ControllerParams};
pub use dispatcher::{BatchDispatcher, BatchTemplate, DispatchError, DispatchOutcome, OveruseLatch};
pub use donation::{DonationDecision, DonationModule, DonationPolicy, DonationReport};
pub use ema::{EmaPair, Utilization, UtilizationEma};
pub use endpoint::{Endpoint, EndpointError, EndpointSelector, RandomEndpointPool};
#[cfg(feature = "net")]
pub use http::HttpLedgerClient;
pub use ledger::{LedgerClient, LedgerError, Operation, Receipt, SubmitOutcome};
pub use miner::{CycleOutcome, CycleReport, Funding, Miner, MinerError, MinerState};
pub use quantity::{Asset, BalanceSnapshot, Quantity, QuantityError};
pub use stats::{MinerStats, StatsSnapshot};

//! Miner configuration: JSON file, then CLI/env overrides, then validation.

use crate::controller::ControllerParams;
use crate::dispatcher::BatchTemplate;
use crate::donation::DonationPolicy;
use crate::quantity::{Asset, Quantity, BPS_DENOMINATOR};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Public chain API nodes used when none are configured.
pub const DEFAULT_ENDPOINTS: [&str; 4] = [
    "https://mainnet.meet.one",
    "https://eos.newdex.one",
    "https://eospush.tokenpocket.pro",
    "https://node.betdice.one",
];

/// Opaque handle the signing relay resolves to a key. Never printed.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wraps a handle.
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Raw handle, for the relay request only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// True when no handle was supplied.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Intervals of the three periodic jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Between mining cycles.
    pub dispatch: Duration,
    /// Between batch-size adjustments.
    pub adjust: Duration,
    /// Between donation checks.
    pub donate: Duration,
}

/// Full miner configuration. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    /// Mining account name.
    pub account: String,
    /// Handle passed to the signing relay.
    pub credential: Credential,
    /// Chain API base URLs; one is picked at random per call.
    pub endpoints: Vec<String>,
    /// Base URL of the signing relay that pushes transactions.
    pub relay: String,
    /// `0` lets the controller size batches; anything else is a fixed size,
    /// at most `controller.n_max`.
    pub batch_size: usize,
    /// Controller tuning.
    pub controller: ControllerParams,
    /// Whether the donation job runs.
    pub donation: bool,
    /// Account receiving donations.
    pub donation_recipient: String,
    /// Share of mined growth donated, in `(0, 1)` and whole basis points.
    pub donation_ratio: f64,
    /// Balance jumps above this are treated as deposits.
    pub deposit_threshold: Quantity,
    /// Donations at or below this are skipped.
    pub min_donation: Quantity,
    /// Asset spent by mining operations and checked at startup.
    pub primary_asset: Asset,
    /// Asset whose balance growth is the mining yield.
    pub mined_asset: Asset,
    /// Account every mining operation pays into.
    pub sink_account: String,
    /// Amount step of mining operations.
    pub operation_increment: Quantity,
    /// Mining amounts are `1..=operation_steps` increments.
    pub operation_steps: u32,
    /// Minimum primary balance needed to start.
    pub min_balance: Quantity,
    /// Wait before giving up when the balance is too low.
    pub insufficient_funds_cooldown_ms: u64,
    /// Mining cycle period.
    pub dispatch_period_ms: u64,
    /// Batch-size adjustment period.
    pub adjust_period_ms: u64,
    /// Donation check period.
    pub donation_period_ms: u64,
    /// Concurrent mining workers; `1` runs the single-cycle model.
    pub workers: usize,
    /// Reference block distance used by the relay for TaPoS.
    pub blocks_behind: u32,
    /// Transaction expiry window.
    pub expire_seconds: u32,
    /// Per-request HTTP timeout.
    pub request_timeout_ms: u64,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            credential: Credential::default(),
            endpoints: DEFAULT_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            relay: "http://127.0.0.1:8900".to_string(),
            batch_size: 0,
            controller: ControllerParams::default(),
            donation: true,
            donation_recipient: "thinkmachine".to_string(),
            donation_ratio: 0.05,
            deposit_threshold: Quantity::from_units(50 * crate::quantity::SCALE),
            min_donation: Quantity::from_units(1),
            primary_asset: Asset::new("eosio.token", "EOS"),
            mined_asset: Asset::new("eidosonecoin", "EIDOS"),
            sink_account: "eidosonecoin".to_string(),
            operation_increment: Quantity::from_units(1),
            operation_steps: 3,
            min_balance: Quantity::from_units(10),
            insufficient_funds_cooldown_ms: 60_000,
            dispatch_period_ms: 1_000,
            adjust_period_ms: 30_000,
            donation_period_ms: 30_000,
            workers: 1,
            blocks_behind: 3,
            expire_seconds: 300,
            request_timeout_ms: 10_000,
        }
    }
}

impl MinerConfig {
    /// Loads a JSON config file; omitted fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(format!("{}: {err}", path.display())))?;
        serde_json::from_str(&contents).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks every field; the first problem found is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_account_name("account", &self.account)?;
        validate_account_name("sink_account", &self.sink_account)?;
        if self.donation {
            validate_account_name("donation_recipient", &self.donation_recipient)?;
        }
        if self.credential.is_empty() {
            return Err(ConfigError::Invalid("credential handle is required".into()));
        }
        if self.endpoints.is_empty() {
            return Err(ConfigError::Invalid("at least one endpoint is required".into()));
        }
        let c = &self.controller;
        if c.n_min == 0 || c.n_min > c.n_max {
            return Err(ConfigError::Invalid(format!(
                "controller bounds must satisfy 1 <= n_min <= n_max (got {}..{})",
                c.n_min, c.n_max
            )));
        }
        if !(0.0..=1.0).contains(&c.expect) || !(0.0..=1.0).contains(&c.red) || c.expect > c.red {
            return Err(ConfigError::Invalid(
                "controller thresholds must satisfy 0 <= expect <= red <= 1".into(),
            ));
        }
        if !(self.donation_ratio > 0.0 && self.donation_ratio < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "donation_ratio must be within (0, 1), got {}",
                self.donation_ratio
            )));
        }
        let bps = self.ratio_bps();
        let representable = f64::from(bps) / f64::from(BPS_DENOMINATOR);
        if bps == 0 || (representable - self.donation_ratio).abs() > 1e-9 {
            return Err(ConfigError::Invalid(format!(
                "donation_ratio must be a whole number of basis points (0.0001 steps), got {}",
                self.donation_ratio
            )));
        }
        if self.batch_size > c.n_max {
            return Err(ConfigError::Invalid(format!(
                "batch_size {} exceeds controller.n_max {}",
                self.batch_size, c.n_max
            )));
        }
        if self.operation_steps == 0 || !self.operation_increment.is_positive() {
            return Err(ConfigError::Invalid(
                "operation amounts must be positive".into(),
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        for (name, value) in [
            ("dispatch_period_ms", self.dispatch_period_ms),
            ("adjust_period_ms", self.adjust_period_ms),
            ("donation_period_ms", self.donation_period_ms),
            ("request_timeout_ms", self.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }

    /// Fixed batch size, or `None` when the controller decides.
    pub fn fixed_batch_size(&self) -> Option<usize> {
        (self.batch_size > 0).then_some(self.batch_size)
    }

    /// Donation ratio in basis points.
    pub fn ratio_bps(&self) -> u32 {
        (self.donation_ratio * BPS_DENOMINATOR as f64).round() as u32
    }

    /// Job intervals.
    pub fn schedule(&self) -> Schedule {
        Schedule {
            dispatch: Duration::from_millis(self.dispatch_period_ms),
            adjust: Duration::from_millis(self.adjust_period_ms),
            donate: Duration::from_millis(self.donation_period_ms),
        }
    }

    /// Donation rule derived from the config.
    pub fn donation_policy(&self) -> DonationPolicy {
        DonationPolicy {
            asset: self.mined_asset.clone(),
            recipient: self.donation_recipient.clone(),
            ratio_bps: self.ratio_bps(),
            deposit_threshold: self.deposit_threshold,
            min_donation: self.min_donation,
        }
    }

    /// Shape of mining operations.
    pub fn batch_template(&self) -> BatchTemplate {
        BatchTemplate {
            asset: self.primary_asset.clone(),
            sink: self.sink_account.clone(),
            increment: self.operation_increment,
            steps: self.operation_steps,
            memo: String::new(),
        }
    }
}

/// Checks a chain account name: 1–12 chars of `a-z`, `1-5`, `.`, not ending in `.`.
pub fn validate_account_name(field: &str, name: &str) -> Result<(), ConfigError> {
    let valid = !name.is_empty()
        && name.len() <= 12
        && !name.ends_with('.')
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || (b'1'..=b'5').contains(&b) || b == b'.');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{field} must be 1-12 characters of a-z, 1-5 and '.', got {name:?}"
        )))
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    /// Config file could not be read.
    Io(String),
    #[error("config parse error: {0}")]
    /// Config file was not valid JSON for this schema.
    Parse(String),
    #[error("invalid config: {0}")]
    /// A field failed validation.
    Invalid(String),
}

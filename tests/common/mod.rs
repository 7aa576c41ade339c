//! Scripted in-memory ledger shared by the integration tests.

use async_trait::async_trait;
use quota_miner::{
    Asset, BalanceSnapshot, Credential, LedgerClient, LedgerError, MinerConfig, Operation,
    Quantity, Receipt, SubmitOutcome, Utilization,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

pub const ACCOUNT: &str = "miner1234512";

pub fn config() -> MinerConfig {
    MinerConfig {
        account: ACCOUNT.into(),
        credential: Credential::new("relay-key"),
        ..MinerConfig::default()
    }
}

pub fn qty(text: &str) -> Quantity {
    text.parse().unwrap()
}

/// Ledger double: utilization and submit outcomes are queued, balances are
/// kept per symbol and every accepted batch credits a fixed reward.
pub struct ScriptedLedger {
    usage: Mutex<VecDeque<f64>>,
    idle_usage: f64,
    outcomes: Mutex<VecDeque<SubmitOutcome>>,
    balances: Mutex<HashMap<String, Quantity>>,
    reward: Mutex<Option<(String, Quantity)>>,
    submissions: Mutex<Vec<Vec<Operation>>>,
    balance_reads: Mutex<usize>,
    fail_reads_from: Mutex<Option<usize>>,
}

impl ScriptedLedger {
    pub fn new(idle_usage: f64) -> Self {
        Self {
            usage: Mutex::new(VecDeque::new()),
            idle_usage,
            outcomes: Mutex::new(VecDeque::new()),
            balances: Mutex::new(HashMap::new()),
            reward: Mutex::new(None),
            submissions: Mutex::new(Vec::new()),
            balance_reads: Mutex::new(0),
            fail_reads_from: Mutex::new(None),
        }
    }

    pub fn with_balance(self, symbol: &str, amount: &str) -> Self {
        self.set_balance(symbol, amount);
        self
    }

    pub fn with_reward(self, symbol: &str, amount: &str) -> Self {
        *self.reward.lock().unwrap() = Some((symbol.to_string(), qty(amount)));
        self
    }

    pub fn set_balance(&self, symbol: &str, amount: &str) {
        self.balances
            .lock()
            .unwrap()
            .insert(symbol.to_string(), qty(amount));
    }

    pub fn balance(&self, symbol: &str) -> Quantity {
        self.balances
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .unwrap_or(Quantity::ZERO)
    }

    /// Balance reads with a zero-based index of `first` or later fail.
    pub fn fail_balance_reads_from(&self, first: usize) {
        *self.fail_reads_from.lock().unwrap() = Some(first);
    }

    pub fn push_usage(&self, samples: &[f64]) {
        self.usage.lock().unwrap().extend(samples.iter().copied());
    }

    pub fn push_outcome(&self, outcome: SubmitOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn submissions(&self) -> Vec<Vec<Operation>> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    async fn get_resource_usage(&self, _account: &str) -> Result<Utilization, LedgerError> {
        let next = self.usage.lock().unwrap().pop_front();
        Ok(Utilization::new(next.unwrap_or(self.idle_usage)))
    }

    async fn get_balance(
        &self,
        _account: &str,
        asset: &Asset,
    ) -> Result<BalanceSnapshot, LedgerError> {
        let index = {
            let mut reads = self.balance_reads.lock().unwrap();
            *reads += 1;
            *reads - 1
        };
        if matches!(*self.fail_reads_from.lock().unwrap(), Some(first) if index >= first) {
            return Err(LedgerError::Transport("balance node timed out".into()));
        }
        Ok(BalanceSnapshot {
            symbol: asset.symbol.clone(),
            amount: self.balance(&asset.symbol),
        })
    }

    async fn submit_batch(&self, operations: &[Operation]) -> SubmitOutcome {
        self.submissions.lock().unwrap().push(operations.to_vec());
        let outcome = self.outcomes.lock().unwrap().pop_front().unwrap_or_else(|| {
            SubmitOutcome::Success(Receipt {
                transaction_id: format!("tx{}", operations.len()),
                cpu_usage_us: Some(200),
            })
        });
        if let SubmitOutcome::Success(_) = outcome {
            let mut balances = self.balances.lock().unwrap();
            for op in operations {
                let entry = balances.entry(op.asset.symbol.clone()).or_insert(Quantity::ZERO);
                *entry = *entry - op.amount;
            }
            if let Some((symbol, amount)) = self.reward.lock().unwrap().clone() {
                let entry = balances.entry(symbol).or_insert(Quantity::ZERO);
                *entry = *entry + amount;
            }
        }
        outcome
    }
}

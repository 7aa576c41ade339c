//! Ledger client capability consumed by the miner.
//!
//! Signing, transaction packing and transport live behind [`LedgerClient`].
//! Submissions never fail with an unclassified error: every result, including
//! transport failures, arrives as a [`SubmitOutcome`].

use crate::ema::Utilization;
use crate::endpoint::EndpointError;
use crate::quantity::{Asset, BalanceSnapshot, Quantity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Permission level used to authorize operations.
pub const ACTIVE_PERMISSION: &str = "active";

/// One token transfer inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Token the transfer moves.
    pub asset: Asset,
    /// Sending account; also the authorizing actor.
    pub from: String,
    /// Receiving account.
    pub to: String,
    /// Amount moved.
    pub amount: Quantity,
    /// Free-form memo.
    pub memo: String,
}

impl Operation {
    /// Transfer action in the chain's JSON action shape.
    pub fn to_action(&self) -> Value {
        json!({
            "account": self.asset.contract,
            "name": "transfer",
            "authorization": [{
                "actor": self.from,
                "permission": ACTIVE_PERMISSION,
            }],
            "data": {
                "from": self.from,
                "to": self.to,
                "quantity": format!("{} {}", self.amount, self.asset.symbol),
                "memo": self.memo,
            },
        })
    }
}

/// Acknowledgement for an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Transaction id assigned by the ledger.
    pub transaction_id: String,
    /// CPU billed for the transaction, when reported.
    pub cpu_usage_us: Option<u64>,
}

/// Classified result of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Accepted by the ledger.
    Success(Receipt),
    /// Identical transaction already seen; harmless.
    DuplicateRejected,
    /// Rejected for exceeding the billable CPU ceiling.
    OveruseRejected,
    /// Any other rejection or transport failure.
    OtherError(String),
}

/// Failures of read-only ledger queries.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("transport error: {0}")]
    /// Request could not be delivered or timed out.
    Transport(String),
    #[error("endpoint returned status {status}: {body}")]
    /// Non-success HTTP status.
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    #[error("decode error: {0}")]
    /// Response body did not have the expected shape.
    Decode(String),
    #[error(transparent)]
    /// Endpoint configuration problem.
    Endpoint(#[from] EndpointError),
}

/// Remote ledger capability.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current consumed/allotted ratio of the account's CPU quota.
    async fn get_resource_usage(&self, account: &str) -> Result<Utilization, LedgerError>;

    /// Balance of `asset` held by `account`.
    async fn get_balance(&self, account: &str, asset: &Asset)
        -> Result<BalanceSnapshot, LedgerError>;

    /// Submits `operations` as one atomic transaction.
    async fn submit_batch(&self, operations: &[Operation]) -> SubmitOutcome;

    /// Single transfer of `amount` of `asset`.
    async fn transfer(
        &self,
        from: &str,
        to: &str,
        asset: &Asset,
        amount: Quantity,
        memo: &str,
    ) -> SubmitOutcome {
        let op = Operation {
            asset: asset.clone(),
            from: from.to_string(),
            to: to.to_string(),
            amount,
            memo: memo.to_string(),
        };
        self.submit_batch(std::slice::from_ref(&op)).await
    }
}

/// Classifies a ledger rejection from its error body.
///
/// Nodes report duplicates as `tx_duplicate` / "duplicate transaction" and
/// CPU overuse as `tx_cpu_usage_exceeded` or with a "maximum billable CPU
/// time" detail; everything else is an ordinary failure.
pub fn classify_rejection(body: &str) -> SubmitOutcome {
    let lower = body.to_ascii_lowercase();
    if lower.contains("tx_duplicate") || lower.contains("duplicate transaction") {
        return SubmitOutcome::DuplicateRejected;
    }
    if lower.contains("tx_cpu_usage_exceeded")
        || lower.contains("maximum billable cpu time")
        || lower.contains("exceeded the current cpu usage limit")
    {
        return SubmitOutcome::OveruseRejected;
    }
    SubmitOutcome::OtherError(body.to_string())
}

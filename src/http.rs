//! HTTP ledger client.
//!
//! Reads go straight to the chain API of a randomly picked node; submissions
//! go to a signing relay that holds the key behind the configured credential
//! handle, signs the action list and pushes it to the chain.

use crate::config::{Credential, MinerConfig};
use crate::ema::Utilization;
use crate::endpoint::{Endpoint, EndpointSelector, RandomEndpointPool};
use crate::ledger::{classify_rejection, LedgerClient, LedgerError, Operation, Receipt, SubmitOutcome};
use crate::quantity::{Asset, BalanceSnapshot};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const GET_ACCOUNT_PATH: &str = "/v1/chain/get_account";
const GET_BALANCE_PATH: &str = "/v1/chain/get_currency_balance";
const PUSH_ACTIONS_PATH: &str = "/v1/relay/push_actions";

/// [`LedgerClient`] over the chain HTTP API plus a signing relay.
pub struct HttpLedgerClient {
    client: Client,
    chain: Arc<dyn EndpointSelector>,
    relay: Endpoint,
    credential: Credential,
    blocks_behind: u32,
    expire_seconds: u32,
}

impl HttpLedgerClient {
    /// Builds a client with the given request timeout.
    pub fn new(
        chain: Arc<dyn EndpointSelector>,
        relay: Endpoint,
        credential: Credential,
        timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Transport(format!("http client error: {e}")))?;
        Ok(Self {
            client,
            chain,
            relay,
            credential,
            blocks_behind: 3,
            expire_seconds: 300,
        })
    }

    /// Builds a client from miner configuration.
    pub fn from_config(cfg: &MinerConfig) -> Result<Self, LedgerError> {
        let pool = RandomEndpointPool::from_urls(cfg.endpoints.iter().cloned())?;
        let relay = Endpoint::new(cfg.relay.clone())?;
        Ok(Self::new(
            Arc::new(pool),
            relay,
            cfg.credential.clone(),
            Duration::from_millis(cfg.request_timeout_ms),
        )?
        .with_tapos(cfg.blocks_behind, cfg.expire_seconds))
    }

    /// Sets the reference-block distance and expiry forwarded to the relay.
    pub fn with_tapos(mut self, blocks_behind: u32, expire_seconds: u32) -> Self {
        self.blocks_behind = blocks_behind;
        self.expire_seconds = expire_seconds;
        self
    }

    /// Relay request for one batch. The relay pushes through `endpoint`, so
    /// submissions spread over the pool the same way reads do.
    fn push_body(&self, endpoint: &Endpoint, operations: &[Operation]) -> Value {
        let actions: Vec<Value> = operations.iter().map(Operation::to_action).collect();
        json!({
            "credential": self.credential.expose(),
            "endpoint": endpoint.as_str(),
            "actions": actions,
            "blocks_behind": self.blocks_behind,
            "expire_seconds": self.expire_seconds,
        })
    }

    async fn chain_call(&self, path: &str, body: &Value) -> Result<Value, LedgerError> {
        let endpoint = self.chain.select();
        let url = endpoint.join(path);
        debug!(%endpoint, path, "chain request");
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(format!("{url}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LedgerError::Status {
                status: status.as_u16(),
                body,
            });
        }
        resp.json()
            .await
            .map_err(|e| LedgerError::Decode(format!("{url}: {e}")))
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn get_resource_usage(&self, account: &str) -> Result<Utilization, LedgerError> {
        let info = self
            .chain_call(GET_ACCOUNT_PATH, &json!({ "account_name": account }))
            .await?;
        parse_cpu_limit(&info)
    }

    async fn get_balance(
        &self,
        account: &str,
        asset: &Asset,
    ) -> Result<BalanceSnapshot, LedgerError> {
        let rows = self
            .chain_call(
                GET_BALANCE_PATH,
                &json!({
                    "code": asset.contract,
                    "account": account,
                    "symbol": asset.symbol,
                }),
            )
            .await?;
        parse_balance_rows(&rows, &asset.symbol)
    }

    async fn submit_batch(&self, operations: &[Operation]) -> SubmitOutcome {
        let url = self.relay.join(PUSH_ACTIONS_PATH);
        let endpoint = self.chain.select();
        debug!(%endpoint, operations = operations.len(), "relay push");
        let body = self.push_body(endpoint, operations);
        let resp = match self.client.post(&url).json(&body).send().await {
            Ok(resp) => resp,
            Err(e) => return SubmitOutcome::OtherError(format!("relay request failed: {e}")),
        };
        let status = resp.status();
        let text = match resp.text().await {
            Ok(text) => text,
            Err(e) => return SubmitOutcome::OtherError(format!("relay response unreadable: {e}")),
        };
        if !status.is_success() {
            return classify_rejection(&text);
        }
        match parse_receipt(&text) {
            Ok(receipt) => SubmitOutcome::Success(receipt),
            Err(_) => classify_rejection(&text),
        }
    }
}

fn lenient_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|v| v.max(0) as u64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Extracts `cpu_limit.used / cpu_limit.max` from a `get_account` response.
pub fn parse_cpu_limit(info: &Value) -> Result<Utilization, LedgerError> {
    let limit = info
        .get("cpu_limit")
        .ok_or_else(|| LedgerError::Decode("get_account response missing cpu_limit".into()))?;
    let used = limit.get("used").and_then(lenient_u64);
    let max = limit.get("max").and_then(lenient_u64);
    match (used, max) {
        (Some(used), Some(max)) => Ok(Utilization::from_usage(used, max)),
        _ => Err(LedgerError::Decode(format!("unreadable cpu_limit: {limit}"))),
    }
}

/// Reads the first `"<amount> <SYMBOL>"` row; no rows means a zero balance.
pub fn parse_balance_rows(rows: &Value, symbol: &str) -> Result<BalanceSnapshot, LedgerError> {
    let rows = rows
        .as_array()
        .ok_or_else(|| LedgerError::Decode(format!("balance response is not a list: {rows}")))?;
    let Some(first) = rows.first() else {
        return Ok(BalanceSnapshot::zero(symbol));
    };
    let text = first
        .as_str()
        .ok_or_else(|| LedgerError::Decode(format!("balance row is not a string: {first}")))?;
    let snapshot =
        BalanceSnapshot::parse(text).map_err(|e| LedgerError::Decode(e.to_string()))?;
    if snapshot.symbol != symbol {
        return Err(LedgerError::Decode(format!(
            "expected {symbol} balance, got {}",
            snapshot.symbol
        )));
    }
    Ok(snapshot)
}

/// Parses a push response into a [`Receipt`].
pub fn parse_receipt(text: &str) -> Result<Receipt, LedgerError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| LedgerError::Decode(e.to_string()))?;
    if value.get("error").is_some() {
        return Err(LedgerError::Decode("push response carries an error".into()));
    }
    let transaction_id = value
        .get("transaction_id")
        .and_then(Value::as_str)
        .ok_or_else(|| LedgerError::Decode("push response missing transaction_id".into()))?
        .to_string();
    let cpu_usage_us = value
        .pointer("/processed/receipt/cpu_usage_us")
        .and_then(lenient_u64);
    Ok(Receipt {
        transaction_id,
        cpu_usage_us,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::Quantity;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSelector {
        pool: RandomEndpointPool,
        hits: AtomicUsize,
    }

    impl EndpointSelector for CountingSelector {
        fn select(&self) -> &Endpoint {
            self.hits.fetch_add(1, Ordering::SeqCst);
            self.pool.pick()
        }

        fn endpoints(&self) -> &[Endpoint] {
            self.pool.endpoints()
        }
    }

    fn client_with(selector: Arc<CountingSelector>) -> HttpLedgerClient {
        HttpLedgerClient::new(
            selector,
            Endpoint::new("http://127.0.0.1:9").unwrap(),
            Credential::new("relay-key"),
            Duration::from_millis(500),
        )
        .unwrap()
        .with_tapos(6, 120)
    }

    fn counting(urls: &[&str]) -> Arc<CountingSelector> {
        Arc::new(CountingSelector {
            pool: RandomEndpointPool::from_urls(urls.iter().copied()).unwrap(),
            hits: AtomicUsize::new(0),
        })
    }

    #[test]
    fn push_body_names_the_chosen_endpoint() {
        let selector = counting(&["https://a.example"]);
        let client = client_with(selector.clone());
        let op = Operation {
            asset: Asset::new("eosio.token", "EOS"),
            from: "miner1234512".into(),
            to: "eidosonecoin".into(),
            amount: Quantity::from_units(2),
            memo: String::new(),
        };
        let endpoint = selector.select().clone();
        let body = client.push_body(&endpoint, std::slice::from_ref(&op));
        assert_eq!(body["endpoint"], "https://a.example");
        assert_eq!(body["credential"], "relay-key");
        assert_eq!(body["blocks_behind"], 6);
        assert_eq!(body["expire_seconds"], 120);
        assert_eq!(body["actions"][0]["data"]["quantity"], "0.0002 EOS");
    }

    #[tokio::test]
    async fn every_submission_consults_the_selector() {
        let selector = counting(&["https://a.example", "https://b.example"]);
        let client = client_with(selector.clone());
        for _ in 0..3 {
            let outcome = client.submit_batch(&[]).await;
            assert!(matches!(outcome, SubmitOutcome::OtherError(_)));
        }
        assert_eq!(selector.hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn cpu_limit_accepts_numbers_and_strings() {
        let info = json!({ "cpu_limit": { "used": 950, "available": 50, "max": 1000 } });
        assert_eq!(parse_cpu_limit(&info).unwrap().ratio(), 0.95);
        let info = json!({ "cpu_limit": { "used": "250", "max": "1000" } });
        assert_eq!(parse_cpu_limit(&info).unwrap().ratio(), 0.25);
        assert!(parse_cpu_limit(&json!({})).is_err());
        assert!(parse_cpu_limit(&json!({ "cpu_limit": { "used": true } })).is_err());
    }

    #[test]
    fn balance_rows_parse_first_entry() {
        let snap = parse_balance_rows(&json!(["3.1416 EIDOS"]), "EIDOS").unwrap();
        assert_eq!(snap.amount, Quantity::from_units(31_416));
        let empty = parse_balance_rows(&json!([]), "EOS").unwrap();
        assert_eq!(empty, BalanceSnapshot::zero("EOS"));
        assert!(parse_balance_rows(&json!(["1.0000 EOS"]), "EIDOS").is_err());
        assert!(parse_balance_rows(&json!({}), "EOS").is_err());
    }

    #[test]
    fn receipt_reads_id_and_cpu() {
        let text = r#"{"transaction_id":"ab12","processed":{"receipt":{"status":"executed","cpu_usage_us":377}}}"#;
        let receipt = parse_receipt(text).unwrap();
        assert_eq!(receipt.transaction_id, "ab12");
        assert_eq!(receipt.cpu_usage_us, Some(377));
        assert!(parse_receipt(r#"{"error":{"name":"tx_duplicate"}}"#).is_err());
        assert!(parse_receipt("not json").is_err());
    }
}

//! Ethereum JSON-RPC sync status.

use std::time::Duration;

use async_trait::async_trait;
use dnp_common::config::ChainConfig;
use dnp_common::{DnpError, DnpResult};
use dnp_watch::{ChainSyncProvider, SyncStatus};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Queries `eth_syncing` and `eth_blockNumber` over HTTP.
#[derive(Debug, Clone)]
pub struct JsonRpcChainProvider {
    client: reqwest::Client,
}

impl JsonRpcChainProvider {
    /// Create a provider whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> DnpResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DnpError::provider("chain", e))?;
        Ok(Self { client })
    }

    async fn call(&self, url: &str, method: &str) -> DnpResult<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": [],
        });
        let response: RpcResponse = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| DnpError::provider("chain", e))?
            .json()
            .await
            .map_err(|e| DnpError::provider("chain", e))?;

        if let Some(error) = response.error {
            return Err(DnpError::provider(
                "chain",
                format!("{method} failed ({}): {}", error.code, error.message),
            ));
        }
        response
            .result
            .ok_or_else(|| DnpError::provider("chain", format!("{method} returned no result")))
    }
}

#[async_trait]
impl ChainSyncProvider for JsonRpcChainProvider {
    async fn status(&self, chain: &ChainConfig) -> DnpResult<SyncStatus> {
        let syncing = self.call(&chain.rpc_url, "eth_syncing").await?;
        if let Some(status) = parse_syncing(&syncing)? {
            return Ok(status);
        }
        let block = self.call(&chain.rpc_url, "eth_blockNumber").await?;
        Ok(SyncStatus::Synced {
            block: parse_quantity(&block)?,
        })
    }
}

/// Decode an `eth_syncing` result; `None` means the node is not syncing.
fn parse_syncing(result: &Value) -> DnpResult<Option<SyncStatus>> {
    match result {
        Value::Bool(false) => Ok(None),
        Value::Object(fields) => {
            let field = |name: &str| {
                fields
                    .get(name)
                    .ok_or_else(|| DnpError::provider("chain", format!("eth_syncing lacks {name}")))
                    .and_then(parse_quantity)
            };
            Ok(Some(SyncStatus::Syncing {
                current: field("currentBlock")?,
                highest: field("highestBlock")?,
            }))
        }
        other => Err(DnpError::provider(
            "chain",
            format!("Unexpected eth_syncing result: {other}"),
        )),
    }
}

/// Decode a hex encoded JSON-RPC quantity.
fn parse_quantity(value: &Value) -> DnpResult<u64> {
    let invalid = || DnpError::provider("chain", format!("Invalid quantity: {value}"));
    let hex = value.as_str().ok_or_else(invalid)?;
    let digits = hex.strip_prefix("0x").ok_or_else(invalid)?;
    u64::from_str_radix(digits, 16).map_err(|_| invalid())
}

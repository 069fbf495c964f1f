use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Bytes, B256, U256, U64};
use lockdrop_core::types::{Balance, BlockNumber, EthAddress, Timestamp};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::contract::{decode_lock_start_time, lock_start_time_calldata};
use crate::error::RpcError;

/// Log entry as returned by `eth_getLogs`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: EthAddress,
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub log_index: Option<U64>,
    #[serde(default)]
    pub removed: bool,
}

impl RawLog {
    /// (block, log index) chain position; pending logs sort last.
    pub fn position(&self) -> (u64, u64) {
        (
            self.block_number.map_or(u64::MAX, |b| b.to::<u64>()),
            self.log_index.map_or(u64::MAX, |i| i.to::<u64>()),
        )
    }
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

fn block_tag(block: BlockNumber) -> String {
    format!("{block:#x}")
}

/// Minimal Ethereum JSON-RPC 2.0 client over HTTP.
pub struct EthRpcClient {
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl EthRpcClient {
    pub fn new(url: &str) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|source| RpcError::Transport {
                url: url.to_string(),
                source,
            })?;
        Ok(Self {
            url: url.to_string(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call a JSON-RPC method and decode the `result` field.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });
        debug!(method, id, "rpc call");

        let transport = |source| RpcError::Transport {
            url: self.url.clone(),
            source,
        };
        let resp: RpcResponse = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?
            .json()
            .await
            .map_err(transport)?;

        if let Some(err) = resp.error {
            return Err(RpcError::Node {
                code: err.code,
                message: err.message,
            });
        }
        let result = resp.result.unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(|e| RpcError::decode("rpc result", e))
    }

    pub async fn block_number(&self) -> Result<BlockNumber, RpcError> {
        let n: U64 = self.call("eth_blockNumber", json!([])).await?;
        Ok(n.to::<u64>())
    }

    /// Logs emitted by `address` with first topic `topic0` in the inclusive
    /// block range. Callers keep ranges small; see `fetch::LOG_QUERY_CHUNK_SIZE`.
    pub async fn get_logs(
        &self,
        address: EthAddress,
        topic0: B256,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<Vec<RawLog>, RpcError> {
        let filter = json!({
            "address": address,
            "topics": [topic0],
            "fromBlock": block_tag(from),
            "toBlock": block_tag(to),
        });
        self.call("eth_getLogs", json!([filter])).await
    }

    /// Balance of `address` in wei at `block`.
    pub async fn get_balance(&self, address: EthAddress, block: BlockNumber) -> Result<Balance, RpcError> {
        let balance: U256 = self
            .call("eth_getBalance", json!([address, block_tag(block)]))
            .await?;
        Ok(balance)
    }

    /// `LOCK_START_TIME()` of a lockdrop contract as of `block`.
    pub async fn lock_start_time(&self, contract: EthAddress, block: BlockNumber) -> Result<Timestamp, RpcError> {
        let tx = json!({ "to": contract, "data": lock_start_time_calldata() });
        let raw: Bytes = self.call("eth_call", json!([tx, block_tag(block)])).await?;
        decode_lock_start_time(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_tags_are_hex_quantities() {
        assert_eq!(block_tag(0), "0x0");
        assert_eq!(block_tag(8_461_046), "0x811af6");
    }

    #[test]
    fn raw_log_parses_node_json() {
        let json = r#"{
            "address": "0x1b75b90e60070d37cfa9d87affd124bb345bf70a",
            "topics": ["0x0000000000000000000000000000000000000000000000000000000000000001"],
            "data": "0x00ff",
            "blockNumber": "0x811af6",
            "logIndex": "0x1f",
            "transactionHash": "0x0000000000000000000000000000000000000000000000000000000000000002"
        }"#;
        let log: RawLog = serde_json::from_str(json).unwrap();
        assert_eq!(log.position(), (8_461_046, 31));
        assert_eq!(&log.data[..], &[0x00u8, 0xff]);
        assert!(!log.removed);
    }

    #[test]
    fn error_body_parses() {
        let resp: RpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"limit exceeded"}}"#)
                .unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32005);
        assert!(resp.result.is_none());
    }
}

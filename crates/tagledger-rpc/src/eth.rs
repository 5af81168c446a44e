//! Typed EVM provider interface over a JSON-RPC transport.
//!
//! [`EvmRpc`] is the narrow surface the retrieval engine needs: network id,
//! head block, log queries and read-only calls. [`EthClient`] implements it
//! on top of any [`RpcTransport`].

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::TransportError;
use crate::transport::RpcTransport;

/// A log as returned by `eth_getLogs`. Quantities stay hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash", default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<bool>,
}

impl RawLog {
    pub fn block_number_u64(&self) -> Result<u64, TransportError> {
        parse_hex_u64(&self.block_number)
    }

    pub fn log_index_u64(&self) -> Result<u64, TransportError> {
        parse_hex_u64(&self.log_index)
    }

    /// The non-indexed data payload as bytes.
    pub fn data_bytes(&self) -> Result<Vec<u8>, TransportError> {
        decode_hex_bytes(&self.data)
    }

    /// `true` if the node flagged this log as removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

/// Parse a hex quantity (with or without `0x`) into u64.
pub fn parse_hex_u64(s: &str) -> Result<u64, TransportError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Err(TransportError::InvalidResponse(format!("empty hex quantity '{s}'")));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| TransportError::InvalidResponse(format!("bad hex quantity '{s}': {e}")))
}

/// Decode `0x`-prefixed hex data. `"0x"` decodes to an empty vector.
pub fn decode_hex_bytes(s: &str) -> Result<Vec<u8>, TransportError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits)
        .map_err(|e| TransportError::InvalidResponse(format!("bad hex data: {e}")))
}

fn to_hex_quantity(n: u64) -> String {
    format!("0x{n:x}")
}

// ─── Log filter ──────────────────────────────────────────────────────────────

/// Parameters of one `eth_getLogs` query over a closed block range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: String,
    pub from_block: u64,
    pub to_block: u64,
    /// Positional topic filters; `None` matches anything in that slot.
    pub topics: Vec<Option<String>>,
}

impl LogFilter {
    pub fn to_params(&self) -> Value {
        let mut topics = self.topics.clone();
        while matches!(topics.last(), Some(None)) {
            topics.pop();
        }
        json!({
            "address": self.address,
            "fromBlock": to_hex_quantity(self.from_block),
            "toBlock": to_hex_quantity(self.to_block),
            "topics": topics,
        })
    }
}

// ─── Provider trait ──────────────────────────────────────────────────────────

/// What the retrieval engine needs from an EVM node.
#[async_trait]
pub trait EvmRpc: Send + Sync {
    async fn chain_id(&self) -> Result<u64, TransportError>;

    async fn block_number(&self) -> Result<u64, TransportError>;

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, TransportError>;

    /// Read-only `eth_call` against the latest state; returns raw return data.
    async fn call(&self, to: &str, calldata: &[u8]) -> Result<Vec<u8>, TransportError>;

    fn url(&self) -> &str;
}

/// [`EvmRpc`] over a JSON-RPC transport.
pub struct EthClient<T> {
    transport: T,
    next_id: AtomicU64,
}

impl<T: RpcTransport> EthClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    fn id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn quantity(&self, method: &str) -> Result<u64, TransportError> {
        let hex: String = self.transport.call(self.id(), method, vec![]).await?;
        parse_hex_u64(&hex)
    }
}

#[async_trait]
impl<T: RpcTransport> EvmRpc for EthClient<T> {
    async fn chain_id(&self) -> Result<u64, TransportError> {
        self.quantity("eth_chainId").await
    }

    async fn block_number(&self) -> Result<u64, TransportError> {
        self.quantity("eth_blockNumber").await
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, TransportError> {
        self.transport
            .call(self.id(), "eth_getLogs", vec![filter.to_params()])
            .await
    }

    async fn call(&self, to: &str, calldata: &[u8]) -> Result<Vec<u8>, TransportError> {
        let params = vec![
            json!({ "to": to, "data": format!("0x{}", hex::encode(calldata)) }),
            json!("latest"),
        ];
        let hex: String = self.transport.call(self.id(), "eth_call", params).await?;
        decode_hex_bytes(&hex)
    }

    fn url(&self) -> &str {
        self.transport.url()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::request::{JsonRpcRequest, JsonRpcResponse};

    /// Answers every request with a fixed result and records what was sent.
    struct Canned {
        result: Value,
        seen: Mutex<Vec<JsonRpcRequest>>,
    }

    impl Canned {
        fn new(result: Value) -> Self {
            Self {
                result,
                seen: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl RpcTransport for Canned {
        async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
            let id = req.id.clone();
            self.seen.lock().unwrap().push(req);
            Ok(JsonRpcResponse::success(id, self.result.clone()))
        }

        fn url(&self) -> &str {
            "mock://canned"
        }
    }

    #[test]
    fn parse_hex_u64_accepts_quantities() {
        assert_eq!(parse_hex_u64("0x13882").unwrap(), 80002);
        assert_eq!(parse_hex_u64("ff").unwrap(), 255);
        assert!(parse_hex_u64("0x").is_err());
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[test]
    fn raw_log_from_node_json() {
        let raw = json!({
            "address": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "topics": ["0x01"],
            "data": "0x0a0b",
            "blockNumber": "0x1613e14",
            "transactionHash": "0xdead",
            "logIndex": "0x3",
        });
        let log: RawLog = serde_json::from_value(raw).unwrap();
        assert_eq!(log.block_number_u64().unwrap(), 23_150_100);
        assert_eq!(log.log_index_u64().unwrap(), 3);
        assert_eq!(log.data_bytes().unwrap(), vec![0x0a, 0x0b]);
        assert!(!log.is_removed());
        assert!(log.block_hash.is_none());
    }

    #[test]
    fn filter_params_trim_trailing_wildcards() {
        let filter = LogFilter {
            address: "0xabc".into(),
            from_block: 500,
            to_block: 999,
            topics: vec![Some("0xt0".into()), None, Some("0xt2".into()), None],
        };
        let p = filter.to_params();
        assert_eq!(p["fromBlock"], "0x1f4");
        assert_eq!(p["toBlock"], "0x3e7");
        assert_eq!(p["topics"], json!(["0xt0", null, "0xt2"]));
    }

    #[tokio::test]
    async fn chain_id_decodes_hex_result() {
        let client = EthClient::new(Canned::new(json!("0x13882")));
        assert_eq!(client.chain_id().await.unwrap(), 80002);
        assert_eq!(client.url(), "mock://canned");
    }

    #[tokio::test]
    async fn eth_call_targets_latest_with_hex_calldata() {
        let client = EthClient::new(Canned::new(json!("0x00ff")));
        let out = client.call("0xabc", &[0xde, 0xad]).await.unwrap();
        assert_eq!(out, vec![0x00, 0xff]);

        let seen = client.transport.seen.lock().unwrap();
        let req = &seen[0];
        assert_eq!(req.method, "eth_call");
        assert_eq!(req.params[0], json!({"to": "0xabc", "data": "0xdead"}));
        assert_eq!(req.params[1], "latest");
    }

    #[tokio::test]
    async fn request_ids_increase() {
        let client = EthClient::new(Canned::new(json!("0x1")));
        client.block_number().await.unwrap();
        client.block_number().await.unwrap();
        let seen = client.transport.seen.lock().unwrap();
        assert_eq!(seen[0].id.to_string(), "1");
        assert_eq!(seen[1].id.to_string(), "2");
    }
}

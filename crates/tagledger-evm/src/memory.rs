//! In-memory registry chain for tests. Compiled with the `test-util` feature.
//!
//! [`MemoryChain`] implements [`EvmRpc`] by simulating the registry
//! contract: registrations and logged messages produce ABI-encoded logs,
//! and view calls are answered from the same state. Faults can be injected
//! per block range, per message index, per counter, or for the whole node.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use tagledger_core::config::POLYGON_AMOY_CHAIN_ID;
use tagledger_core::ids::{keccak256, word_hex, AssetId, TokenId};
use tagledger_core::types::{iso8601_from_unix, LoggedEvent, RegistrationEvent, RegistryEvent};
use tagledger_rpc::error::TransportError;
use tagledger_rpc::eth::{EvmRpc, LogFilter, RawLog};
use tagledger_rpc::request::JsonRpcError;

use crate::decoder::u256_to_u64;
use crate::descriptor::{ContractDescriptor, EventKind};

/// Unix time of block 0 on the simulated chain; blocks are 2 s apart.
pub const GENESIS_TIMESTAMP: u64 = 1_750_000_000;

pub fn block_timestamp(block: u64) -> u64 {
    GENESIS_TIMESTAMP.saturating_add(block.saturating_mul(2))
}

/// ABI-encode a registry event as the node would return it from `eth_getLogs`.
pub fn encode_registry_log(
    descriptor: &ContractDescriptor,
    address: &str,
    event: &RegistryEvent,
    timestamp: u64,
) -> RawLog {
    let ts = DynSolValue::Uint(U256::from(timestamp), 256);
    let (kind, indexed, data, block, log_index, tx) = match event {
        RegistryEvent::AssetRegistered(r) => (
            EventKind::AssetRegistered,
            [r.token_id.to_topic(), r.asset_id.to_topic()],
            vec![ts],
            r.block_number,
            r.log_index,
            &r.transaction_hash,
        ),
        RegistryEvent::EventLogged(e) => (
            EventKind::EventLogged,
            [e.asset_id.to_topic(), e.token_id.to_topic()],
            vec![
                DynSolValue::Uint(U256::from(e.event_index), 256),
                DynSolValue::String(e.message.clone()),
                ts,
            ],
            e.block_number,
            e.log_index,
            &e.transaction_hash,
        ),
    };
    let mut topics = vec![descriptor.event(kind).topic0().to_string()];
    topics.extend(indexed);
    RawLog {
        address: address.to_lowercase(),
        topics,
        data: format!("0x{}", hex::encode(DynSolValue::Tuple(data).abi_encode_params())),
        block_number: format!("0x{block:x}"),
        block_hash: Some(word_hex(&keccak256(&block.to_be_bytes()))),
        tx_hash: tx.clone(),
        log_index: format!("0x{log_index:x}"),
        removed: None,
    }
}

fn revert(reason: &str) -> TransportError {
    TransportError::Rpc(JsonRpcError {
        code: 3,
        message: format!("execution reverted: {reason}"),
        data: None,
    })
}

fn node_error(message: &str) -> TransportError {
    TransportError::Rpc(JsonRpcError {
        code: -32000,
        message: message.to_string(),
        data: None,
    })
}

fn derived_address(seed: &[u8]) -> Address {
    Address::from_slice(&keccak256(seed)[12..])
}

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct State {
    head: u64,
    tokens: HashMap<TokenId, AssetId>,
    asset_tokens: BTreeMap<AssetId, TokenId>,
    messages: HashMap<AssetId, Vec<String>>,
    next_asset: u64,
    /// Emitted events in insertion order.
    events: Vec<RegistryEvent>,
    extra_logs: Vec<RawLog>,
    logs_per_block: HashMap<u64, u64>,
    failing_ranges: Vec<(u64, u64)>,
    failing_messages: HashSet<(AssetId, u64)>,
    failing_counters: HashSet<AssetId>,
    unreachable: bool,
    max_range: Option<u64>,
}

impl State {
    fn position(&mut self, block: u64) -> (u64, String) {
        let slot = self.logs_per_block.entry(block).or_insert(0);
        let log_index = *slot;
        *slot += 1;
        self.head = self.head.max(block);
        let mut seed = block.to_be_bytes().to_vec();
        seed.extend_from_slice(&log_index.to_be_bytes());
        (log_index, word_hex(&keccak256(&seed)))
    }

    fn token_of(&self, asset: AssetId) -> TokenId {
        self.asset_tokens
            .get(&asset)
            .copied()
            .unwrap_or_else(|| TokenId::from_bytes([0; 32]))
    }
}

/// Simulated registry node. See the module docs.
pub struct MemoryChain {
    address: String,
    url: String,
    chain_id: u64,
    descriptor: ContractDescriptor,
    state: Mutex<State>,
    calls: AtomicUsize,
}

impl MemoryChain {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            url: "mock://memory".into(),
            chain_id: POLYGON_AMOY_CHAIN_ID,
            descriptor: ContractDescriptor::registry(),
            state: Mutex::new(State {
                next_asset: 1,
                ..State::default()
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Reject log queries spanning more than `blocks` blocks.
    pub fn with_max_range(self, blocks: u64) -> Self {
        self.state().max_range = Some(blocks);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─── Chain mutation ──────────────────────────────────────────────────────

    /// Register `token` at `block`, returning its new AssetId.
    pub fn register(&self, token: TokenId, block: u64) -> AssetId {
        let mut st = self.state();
        if let Some(existing) = st.tokens.get(&token) {
            return *existing;
        }
        let asset = AssetId::from(st.next_asset);
        st.next_asset += 1;
        st.tokens.insert(token, asset);
        st.asset_tokens.insert(asset, token);
        let (log_index, tx) = st.position(block);
        let timestamp = iso8601_from_unix(block_timestamp(block)).unwrap_or_default();
        st.events.push(RegistryEvent::AssetRegistered(RegistrationEvent {
            token_id: token,
            asset_id: asset,
            block_number: block,
            log_index,
            transaction_hash: tx,
            timestamp,
        }));
        asset
    }

    /// Append a message to `asset` at `block` and emit its log. Returns the index.
    pub fn log_event(&self, asset: AssetId, message: &str, block: u64) -> u64 {
        let mut st = self.state();
        let token = st.token_of(asset);
        let messages = st.messages.entry(asset).or_default();
        messages.push(message.to_string());
        let event_index = messages.len() as u64 - 1;
        let (log_index, tx) = st.position(block);
        let timestamp = iso8601_from_unix(block_timestamp(block)).unwrap_or_default();
        st.events.push(RegistryEvent::EventLogged(LoggedEvent {
            asset_id: asset,
            token_id: token,
            event_index,
            message: message.to_string(),
            block_number: block,
            log_index,
            transaction_hash: tx,
            timestamp,
        }));
        event_index
    }

    /// Append a message without emitting a log, as if the log fell outside
    /// any scanned range.
    pub fn append_message_unlogged(&self, asset: AssetId, message: &str) -> u64 {
        let mut st = self.state();
        let messages = st.messages.entry(asset).or_default();
        messages.push(message.to_string());
        messages.len() as u64 - 1
    }

    /// Serve an arbitrary log alongside the simulated ones.
    pub fn push_raw_log(&self, log: RawLog) {
        self.state().extra_logs.push(log);
    }

    pub fn set_head(&self, block: u64) {
        self.state().head = block;
    }

    pub fn head(&self) -> u64 {
        self.state().head
    }

    // ─── Fault injection ─────────────────────────────────────────────────────

    /// Fail any log query touching `[from, to]`.
    pub fn fail_range(&self, from: u64, to: u64) {
        self.state().failing_ranges.push((from, to));
    }

    pub fn fail_message(&self, asset: AssetId, index: u64) {
        self.state().failing_messages.insert((asset, index));
    }

    pub fn fail_counter(&self, asset: AssetId) {
        self.state().failing_counters.insert(asset);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    pub fn clear_faults(&self) {
        let mut st = self.state();
        st.failing_ranges.clear();
        st.failing_messages.clear();
        st.failing_counters.clear();
        st.unreachable = false;
    }

    // ─── Inspection ──────────────────────────────────────────────────────────

    /// RPC calls served (or refused) so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset_call_count(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }

    pub fn registrations(&self) -> Vec<RegistrationEvent> {
        self.sorted_events()
            .into_iter()
            .filter_map(|ev| match ev {
                RegistryEvent::AssetRegistered(r) => Some(r),
                RegistryEvent::EventLogged(_) => None,
            })
            .collect()
    }

    pub fn logged_events(&self) -> Vec<LoggedEvent> {
        self.sorted_events()
            .into_iter()
            .filter_map(|ev| match ev {
                RegistryEvent::EventLogged(e) => Some(e),
                RegistryEvent::AssetRegistered(_) => None,
            })
            .collect()
    }

    fn sorted_events(&self) -> Vec<RegistryEvent> {
        let mut events = self.state().events.clone();
        events.sort_by_key(RegistryEvent::position);
        events
    }

    // ─── RPC simulation ──────────────────────────────────────────────────────

    fn enter(&self) -> Result<(), TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.state().unreachable {
            return Err(TransportError::Http("connection refused".into()));
        }
        Ok(())
    }

    fn logs_matching(&self, filter: &LogFilter) -> Result<Vec<RawLog>, TransportError> {
        let st = self.state();
        if let Some(max) = st.max_range {
            if filter.to_block.saturating_sub(filter.from_block) + 1 > max {
                return Err(TransportError::Rpc(JsonRpcError {
                    code: -32005,
                    message: format!("block range exceeds limit of {max}"),
                    data: None,
                }));
            }
        }
        if st
            .failing_ranges
            .iter()
            .any(|(a, b)| *a <= filter.to_block && filter.from_block <= *b)
        {
            return Err(node_error("upstream request timeout"));
        }
        if !filter.address.eq_ignore_ascii_case(&self.address) {
            return Ok(vec![]);
        }

        let mut logs: Vec<RawLog> = st
            .events
            .iter()
            .map(|ev| {
                let block = ev.position().block_number;
                encode_registry_log(&self.descriptor, &self.address, ev, block_timestamp(block))
            })
            .chain(st.extra_logs.iter().cloned())
            .filter(|log| {
                let block = log.block_number_u64().unwrap_or(u64::MAX);
                (filter.from_block..=filter.to_block).contains(&block)
                    && filter.topics.iter().enumerate().all(|(i, want)| match want {
                        None => true,
                        Some(w) => log.topics.get(i).is_some_and(|t| t.eq_ignore_ascii_case(w)),
                    })
            })
            .collect();
        logs.sort_by_key(|l| {
            (
                l.block_number_u64().unwrap_or(u64::MAX),
                l.log_index_u64().unwrap_or(u64::MAX),
            )
        });
        Ok(logs)
    }

    fn answer(&self, to: &str, calldata: &[u8]) -> Result<Vec<u8>, TransportError> {
        if !to.eq_ignore_ascii_case(&self.address) {
            // No code at the target: empty return data.
            return Ok(vec![]);
        }
        if calldata.len() < 4 {
            return Err(revert("missing selector"));
        }
        let func = self
            .descriptor
            .function_by_selector(&calldata[..4])
            .ok_or_else(|| revert("unknown selector"))?;
        let input_types = func
            .inputs
            .iter()
            .map(|t| DynSolType::parse(t))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        let args = match DynSolType::Tuple(input_types).abi_decode_params(&calldata[4..]) {
            Ok(DynSolValue::Tuple(vals)) => vals,
            Ok(other) => vec![other],
            Err(e) => return Err(revert(&format!("bad calldata: {e}"))),
        };

        let st = self.state();
        let ret = match (func.name, args.as_slice()) {
            ("isTokenRegistered", [DynSolValue::FixedBytes(w, _)]) => {
                DynSolValue::Bool(st.tokens.contains_key(&TokenId::from_bytes(w.0)))
            }
            ("getNFTId", [DynSolValue::FixedBytes(w, _)]) => {
                let id = st
                    .tokens
                    .get(&TokenId::from_bytes(w.0))
                    .map(|a| a.value())
                    .unwrap_or(U256::ZERO);
                DynSolValue::Uint(id, 256)
            }
            ("ownerOf", [DynSolValue::Uint(id, _)]) => {
                let asset = AssetId::new(*id);
                if !st.asset_tokens.contains_key(&asset) {
                    return Err(revert("invalid token ID"));
                }
                DynSolValue::Address(derived_address(&asset.to_word()))
            }
            ("eventCounts", [DynSolValue::Uint(id, _)]) => {
                let asset = AssetId::new(*id);
                if st.failing_counters.contains(&asset) {
                    return Err(node_error("internal error"));
                }
                let n = st.messages.get(&asset).map_or(0, Vec::len);
                DynSolValue::Uint(U256::from(n), 256)
            }
            ("getEventMessage", [DynSolValue::Uint(id, _), DynSolValue::Uint(idx, _)]) => {
                let asset = AssetId::new(*id);
                let index = u256_to_u64(*idx).unwrap_or(u64::MAX);
                if st.failing_messages.contains(&(asset, index)) {
                    return Err(node_error("internal error"));
                }
                let msg = st
                    .messages
                    .get(&asset)
                    .and_then(|m| usize::try_from(index).ok().and_then(|i| m.get(i)))
                    .ok_or_else(|| revert("event index out of bounds"))?;
                DynSolValue::String(msg.clone())
            }
            ("owner", []) => DynSolValue::Address(derived_address(b"registry-owner")),
            (name, _) => return Err(revert(&format!("unsupported call {name}"))),
        };
        Ok(DynSolValue::Tuple(vec![ret]).abi_encode_params())
    }
}

#[async_trait]
impl EvmRpc for MemoryChain {
    async fn chain_id(&self) -> Result<u64, TransportError> {
        self.enter()?;
        Ok(self.chain_id)
    }

    async fn block_number(&self) -> Result<u64, TransportError> {
        self.enter()?;
        Ok(self.head())
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, TransportError> {
        self.enter()?;
        self.logs_matching(filter)
    }

    async fn call(&self, to: &str, calldata: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.enter()?;
        self.answer(to, calldata)
    }

    fn url(&self) -> &str {
        &self.url
    }
}

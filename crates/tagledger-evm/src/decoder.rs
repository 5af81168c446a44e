//! Maps raw logs to typed registry events.
//!
//! Indexed fields come from `topics[1..]` in declaration order, each a
//! 32-byte slot. Non-indexed fields are ABI-decoded from the data payload as
//! one parameter tuple. Integer timestamps (whole seconds) become ISO-8601.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::U256;
use tagledger_core::error::RegistryError;
use tagledger_core::ids::{AssetId, TokenId};
use tagledger_core::types::{iso8601_from_unix, LoggedEvent, RegistrationEvent, RegistryEvent};
use tagledger_rpc::eth::RawLog;

use crate::descriptor::{ContractDescriptor, EventKind, EventSpec};

/// Stateless decoder over a shared contract descriptor. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    descriptor: Arc<ContractDescriptor>,
}

type Fields = HashMap<&'static str, DynSolValue>;

impl EventDecoder {
    pub fn new(descriptor: Arc<ContractDescriptor>) -> Self {
        Self { descriptor }
    }

    pub fn descriptor(&self) -> &ContractDescriptor {
        &self.descriptor
    }

    pub fn decode(&self, log: &RawLog) -> Result<RegistryEvent, RegistryError> {
        let topic0 = log
            .topics
            .first()
            .ok_or_else(|| RegistryError::decode("log has no topics"))?;
        let spec = self
            .descriptor
            .by_topic(topic0)
            .ok_or_else(|| RegistryError::decode(format!("unknown event topic {topic0}")))?;

        let fields = decode_fields(spec, log)?;
        let block_number = log
            .block_number_u64()
            .map_err(|e| RegistryError::decode(e.to_string()))?;
        let log_index = log
            .log_index_u64()
            .map_err(|e| RegistryError::decode(e.to_string()))?;
        let timestamp = timestamp_field(&fields)?;
        let transaction_hash = log.tx_hash.clone();

        Ok(match spec.kind {
            EventKind::AssetRegistered => RegistryEvent::AssetRegistered(RegistrationEvent {
                token_id: token_field(&fields, "tokenId")?,
                asset_id: asset_field(&fields, "nftId")?,
                block_number,
                log_index,
                transaction_hash,
                timestamp,
            }),
            EventKind::EventLogged => RegistryEvent::EventLogged(LoggedEvent {
                asset_id: asset_field(&fields, "nftId")?,
                token_id: token_field(&fields, "tokenId")?,
                event_index: u64_field(&fields, "eventIndex")?,
                message: string_field(&fields, "message")?,
                block_number,
                log_index,
                transaction_hash,
                timestamp,
            }),
        })
    }

    /// Decode every log, dropping removed and undecodable ones with a warning.
    pub fn decode_all(&self, logs: &[RawLog]) -> Vec<RegistryEvent> {
        let mut out = Vec::with_capacity(logs.len());
        for log in logs {
            if log.is_removed() {
                tracing::debug!(tx = %log.tx_hash, "dropping removed log");
                continue;
            }
            match self.decode(log) {
                Ok(ev) => out.push(ev),
                Err(e) => tracing::warn!(
                    tx = %log.tx_hash,
                    block = %log.block_number,
                    error = %e,
                    "dropping undecodable log"
                ),
            }
        }
        out
    }
}

/// Split decoded events into registrations and logged events.
pub fn partition_events(events: Vec<RegistryEvent>) -> (Vec<RegistrationEvent>, Vec<LoggedEvent>) {
    let mut registrations = Vec::new();
    let mut logged = Vec::new();
    for ev in events {
        match ev {
            RegistryEvent::AssetRegistered(r) => registrations.push(r),
            RegistryEvent::EventLogged(l) => logged.push(l),
        }
    }
    (registrations, logged)
}

fn decode_fields(spec: &EventSpec, log: &RawLog) -> Result<Fields, RegistryError> {
    let mut fields = Fields::new();

    for (i, field) in spec.indexed_fields().enumerate() {
        let topic = log.topics.get(i + 1).ok_or_else(|| {
            RegistryError::decode(format!("{}: missing topic for '{}'", spec.name, field.name))
        })?;
        let bytes = hex::decode(topic.strip_prefix("0x").unwrap_or(topic))
            .map_err(|e| RegistryError::decode(format!("invalid topic hex: {e}")))?;
        if bytes.len() != 32 {
            return Err(RegistryError::decode(format!(
                "topic for '{}' is {} bytes, expected 32",
                field.name,
                bytes.len()
            )));
        }
        let value = field
            .sol_type()?
            .abi_decode(&bytes)
            .map_err(|e| RegistryError::decode(format!("topic '{}': {e}", field.name)))?;
        fields.insert(field.name, value);
    }

    let data_fields: Vec<_> = spec.data_fields().collect();
    if data_fields.is_empty() {
        return Ok(fields);
    }
    let types = data_fields
        .iter()
        .map(|f| f.sol_type())
        .collect::<Result<Vec<_>, _>>()?;
    let data = log
        .data_bytes()
        .map_err(|e| RegistryError::decode(e.to_string()))?;
    let decoded = DynSolType::Tuple(types)
        .abi_decode_params(&data)
        .map_err(|e| RegistryError::decode(format!("{} data: {e}", spec.name)))?;
    let values = match decoded {
        DynSolValue::Tuple(vals) => vals,
        other => vec![other],
    };
    for (field, value) in data_fields.iter().zip(values) {
        fields.insert(field.name, value);
    }
    Ok(fields)
}

fn get<'a>(fields: &'a Fields, name: &str) -> Result<&'a DynSolValue, RegistryError> {
    fields
        .get(name)
        .ok_or_else(|| RegistryError::decode(format!("missing field '{name}'")))
}

fn uint_field(fields: &Fields, name: &str) -> Result<U256, RegistryError> {
    match get(fields, name)? {
        DynSolValue::Uint(v, _) => Ok(*v),
        other => Err(RegistryError::decode(format!("'{name}' is not a uint: {other:?}"))),
    }
}

pub(crate) fn u256_to_u64(v: U256) -> Option<u64> {
    (v.bit_len() <= 64).then(|| v.as_limbs()[0])
}

fn u64_field(fields: &Fields, name: &str) -> Result<u64, RegistryError> {
    let v = uint_field(fields, name)?;
    u256_to_u64(v).ok_or_else(|| RegistryError::decode(format!("'{name}' overflows u64: {v}")))
}

fn asset_field(fields: &Fields, name: &str) -> Result<AssetId, RegistryError> {
    uint_field(fields, name).map(AssetId::new)
}

fn token_field(fields: &Fields, name: &str) -> Result<TokenId, RegistryError> {
    match get(fields, name)? {
        DynSolValue::FixedBytes(word, 32) => Ok(TokenId::from_bytes(word.0)),
        other => Err(RegistryError::decode(format!("'{name}' is not bytes32: {other:?}"))),
    }
}

fn string_field(fields: &Fields, name: &str) -> Result<String, RegistryError> {
    match get(fields, name)? {
        DynSolValue::String(s) => Ok(s.clone()),
        other => Err(RegistryError::decode(format!("'{name}' is not a string: {other:?}"))),
    }
}

fn timestamp_field(fields: &Fields) -> Result<String, RegistryError> {
    let secs = u64_field(fields, "timestamp")?;
    iso8601_from_unix(secs)
        .ok_or_else(|| RegistryError::decode(format!("timestamp {secs} out of range")))
}

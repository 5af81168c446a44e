//! Read-only view calls against the registry contract.

use std::sync::Arc;

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{B256, U256};
use tagledger_core::error::RegistryError;
use tagledger_core::ids::{AssetId, TokenId};

use crate::decoder::u256_to_u64;
use crate::descriptor::ContractDescriptor;
use crate::selector::EndpointHandle;

/// Typed wrappers over the registry's view functions. Every failure maps
/// to [`RegistryError::StateQuery`] naming the call.
#[derive(Debug, Clone)]
pub struct RegistryReader {
    handle: EndpointHandle,
    address: String,
    descriptor: Arc<ContractDescriptor>,
}

impl RegistryReader {
    pub fn new(
        handle: EndpointHandle,
        address: impl Into<String>,
        descriptor: Arc<ContractDescriptor>,
    ) -> Self {
        Self {
            handle,
            address: address.into(),
            descriptor,
        }
    }

    pub async fn is_token_registered(&self, token: &TokenId) -> Result<bool, RegistryError> {
        match self.view("isTokenRegistered", vec![bytes32(token)]).await? {
            DynSolValue::Bool(b) => Ok(b),
            other => Err(unexpected("isTokenRegistered", &other)),
        }
    }

    pub async fn asset_id(&self, token: &TokenId) -> Result<AssetId, RegistryError> {
        self.view_uint("getNFTId", vec![bytes32(token)])
            .await
            .map(AssetId::new)
    }

    /// Current holder of an asset, checksummed.
    pub async fn owner_of(&self, asset: AssetId) -> Result<String, RegistryError> {
        self.view_address("ownerOf", vec![uint(asset.value())]).await
    }

    /// Authoritative number of events logged against `asset`.
    pub async fn event_count(&self, asset: AssetId) -> Result<u64, RegistryError> {
        let n = self.view_uint("eventCounts", vec![uint(asset.value())]).await?;
        u256_to_u64(n).ok_or_else(|| RegistryError::state_query("eventCounts", "counter overflows u64"))
    }

    pub async fn event_message(&self, asset: AssetId, index: u64) -> Result<String, RegistryError> {
        let args = vec![uint(asset.value()), uint(U256::from(index))];
        match self.view("getEventMessage", args).await? {
            DynSolValue::String(s) => Ok(s),
            other => Err(unexpected("getEventMessage", &other)),
        }
    }

    /// Administrator of the registry contract itself.
    pub async fn contract_owner(&self) -> Result<String, RegistryError> {
        self.view_address("owner", vec![]).await
    }

    async fn view_uint(&self, name: &'static str, args: Vec<DynSolValue>) -> Result<U256, RegistryError> {
        match self.view(name, args).await? {
            DynSolValue::Uint(v, _) => Ok(v),
            other => Err(unexpected(name, &other)),
        }
    }

    async fn view_address(&self, name: &'static str, args: Vec<DynSolValue>) -> Result<String, RegistryError> {
        match self.view(name, args).await? {
            DynSolValue::Address(a) => Ok(a.to_checksum(None)),
            other => Err(unexpected(name, &other)),
        }
    }

    /// Encode `selector ++ params`, `eth_call`, decode the single return value.
    async fn view(&self, name: &'static str, args: Vec<DynSolValue>) -> Result<DynSolValue, RegistryError> {
        let func = self.descriptor.function(name)?;
        let output = DynSolType::parse(func.output)
            .map_err(|e| RegistryError::state_query(name, e))?;

        let mut calldata = func.selector().to_vec();
        calldata.extend(DynSolValue::Tuple(args).abi_encode_params());

        let ret = self
            .handle
            .rpc()
            .call(&self.address, &calldata)
            .await
            .map_err(|e| RegistryError::state_query(name, e))?;

        let decoded = DynSolType::Tuple(vec![output])
            .abi_decode_params(&ret)
            .map_err(|e| RegistryError::state_query(name, format!("bad return data: {e}")))?;
        match decoded {
            DynSolValue::Tuple(mut vals) if vals.len() == 1 => Ok(vals.remove(0)),
            other => Err(unexpected(name, &other)),
        }
    }
}

fn bytes32(token: &TokenId) -> DynSolValue {
    DynSolValue::FixedBytes(B256::from(*token.as_bytes()), 32)
}

fn uint(v: U256) -> DynSolValue {
    DynSolValue::Uint(v, 256)
}

fn unexpected(name: &str, value: &DynSolValue) -> RegistryError {
    RegistryError::state_query(name, format!("unexpected return value {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryChain;
    use crate::selector::connect;

    const CONTRACT: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";

    async fn reader(chain: &Arc<MemoryChain>) -> RegistryReader {
        let handle = connect(chain.clone(), None, 80002).await.unwrap();
        RegistryReader::new(handle, CONTRACT, Arc::new(ContractDescriptor::registry()))
    }

    #[tokio::test]
    async fn registered_token_round_trip() {
        let chain = Arc::new(MemoryChain::new(CONTRACT));
        let token = TokenId::from_tag(b"epc-1", b"tid-1");
        let asset = chain.register(token, 100);
        chain.log_event(asset, "manufactured", 101);
        chain.log_event(asset, "shipped", 105);

        let r = reader(&chain).await;
        assert!(r.is_token_registered(&token).await.unwrap());
        assert_eq!(r.asset_id(&token).await.unwrap(), asset);
        assert_eq!(r.event_count(asset).await.unwrap(), 2);
        assert_eq!(r.event_message(asset, 1).await.unwrap(), "shipped");
        assert!(r.owner_of(asset).await.unwrap().starts_with("0x"));
        assert!(r.contract_owner().await.unwrap().starts_with("0x"));
    }

    #[tokio::test]
    async fn unknown_token_reports_unregistered() {
        let chain = Arc::new(MemoryChain::new(CONTRACT));
        let r = reader(&chain).await;
        let token = TokenId::from_bytes([9; 32]);
        assert!(!r.is_token_registered(&token).await.unwrap());
    }

    #[tokio::test]
    async fn revert_maps_to_state_query_error() {
        let chain = Arc::new(MemoryChain::new(CONTRACT));
        let r = reader(&chain).await;
        let err = r.event_message(AssetId::from(77), 0).await.unwrap_err();
        assert!(matches!(err, RegistryError::StateQuery { ref call, .. } if call == "getEventMessage"));
        assert!(!err.is_fatal());
    }
}

//! Endpoint selection: primary first, then one fallback, each verified
//! against the expected chain id.

use std::sync::Arc;
use std::time::Duration;

use tagledger_core::config::{redact_url, EndpointConfig};
use tagledger_core::error::{EndpointFailure, RegistryError};
use tagledger_rpc::eth::{EthClient, EvmRpc};
use tagledger_rpc::http::{HttpClientConfig, HttpRpcClient};

/// A verified connection to one node. Immutable once created and shared
/// by reference (clones share the same provider).
#[derive(Clone)]
pub struct EndpointHandle {
    rpc: Arc<dyn EvmRpc>,
    chain_id: u64,
}

impl EndpointHandle {
    pub fn rpc(&self) -> &dyn EvmRpc {
        self.rpc.as_ref()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Redacted endpoint URL, safe to log.
    pub fn url(&self) -> String {
        redact_url(self.rpc.url())
    }
}

impl std::fmt::Debug for EndpointHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointHandle")
            .field("url", &self.url())
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

/// Connect to `primary`, falling back to `fallback` once. Fails with an
/// aggregated [`RegistryError::Connection`] listing every attempt.
pub async fn connect(
    primary: Arc<dyn EvmRpc>,
    fallback: Option<Arc<dyn EvmRpc>>,
    expected_chain_id: u64,
) -> Result<EndpointHandle, RegistryError> {
    let mut attempts = Vec::with_capacity(2);

    match probe(primary, expected_chain_id).await {
        Ok(handle) => return Ok(handle),
        Err(failure) => {
            tracing::warn!(url = %failure.url, reason = %failure.reason, "primary endpoint unusable");
            attempts.push(failure);
        }
    }

    if let Some(fallback) = fallback {
        match probe(fallback, expected_chain_id).await {
            Ok(handle) => {
                tracing::info!(url = %handle.url(), "connected via fallback endpoint");
                return Ok(handle);
            }
            Err(failure) => {
                tracing::warn!(url = %failure.url, reason = %failure.reason, "fallback endpoint unusable");
                attempts.push(failure);
            }
        }
    }

    Err(RegistryError::Connection { attempts })
}

async fn probe(rpc: Arc<dyn EvmRpc>, expected: u64) -> Result<EndpointHandle, EndpointFailure> {
    let url = redact_url(rpc.url());
    match rpc.chain_id().await {
        Ok(id) if id == expected => {
            tracing::debug!(url = %url, chain_id = id, "endpoint verified");
            Ok(EndpointHandle { rpc, chain_id: id })
        }
        Ok(id) => Err(EndpointFailure {
            url,
            reason: format!("chain id {id}, expected {expected}"),
        }),
        Err(e) => Err(EndpointFailure {
            url,
            reason: e.to_string(),
        }),
    }
}

/// Build HTTP providers from `config` and [`connect`].
pub async fn connect_http(config: &EndpointConfig) -> Result<EndpointHandle, RegistryError> {
    let http = HttpClientConfig {
        request_timeout: Duration::from_millis(config.request_timeout_ms),
    };
    let build = |url: &str| -> Result<Arc<dyn EvmRpc>, RegistryError> {
        let client = HttpRpcClient::new(url, http.clone())
            .map_err(|e| RegistryError::config(e.to_string()))?;
        Ok(Arc::new(EthClient::new(client)))
    };
    let primary = build(&config.primary_url)?;
    let fallback = config.fallback_url.as_deref().map(build).transpose()?;
    connect(primary, fallback, config.chain_id).await
}

//! The `RpcTransport` trait: one JSON-RPC request in, one response out.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// Request/response framing over some wire. Implementations must be
/// `Send + Sync` so a single transport can be shared across tasks.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    /// Endpoint identifier, used in log fields.
    fn url(&self) -> &str;

    /// Send `method(params)` and deserialize the result into `T`.
    async fn call<T>(&self, id: u64, method: &str, params: Vec<Value>) -> Result<T, TransportError>
    where
        Self: Sized,
        T: DeserializeOwned + Send,
    {
        let resp = self.send(JsonRpcRequest::new(id, method, params)).await?;
        let result = resp.into_result().map_err(TransportError::Rpc)?;
        serde_json::from_value(result).map_err(TransportError::Deserialization)
    }
}

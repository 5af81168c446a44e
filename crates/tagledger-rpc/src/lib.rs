//! tagledger-rpc — JSON-RPC plumbing for the tag registry engine.
//!
//! ```text
//! EvmRpc (chain_id, block_number, get_logs, call)
//!   └── EthClient<T: RpcTransport>
//!         └── HttpRpcClient (reqwest)
//! ```

pub mod error;
pub mod eth;
pub mod http;
pub mod request;
pub mod transport;

pub use error::TransportError;
pub use eth::{EthClient, EvmRpc, LogFilter, RawLog};
pub use http::{HttpClientConfig, HttpRpcClient};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use transport::RpcTransport;

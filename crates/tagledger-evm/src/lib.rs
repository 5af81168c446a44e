//! tagledger-evm — historical event retrieval and reconciliation for the
//! RFID tag registry contract.
//!
//! # Architecture
//!
//! ```text
//! RegistryClient
//!   ├── connect()            Endpoint Selector (primary → fallback, chain id check)
//!   ├── LogScanner           windowed eth_getLogs, failed windows skipped
//!   ├── EventDecoder         topics + ABI data → RegistryEvent
//!   ├── RegistryReader       view calls (eventCounts, getEventMessage, ...)
//!   ├── reconcile()          counter-authoritative timelines
//!   └── subscribe()          polling task → bounded channel
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use tagledger_core::{BlockBound, EndpointConfig, RegistryConfig};
//! use tagledger_evm::RegistryClient;
//!
//! # async fn run() -> Result<(), tagledger_core::RegistryError> {
//! let config = RegistryConfig::new(
//!     EndpointConfig::new("https://polygon-amoy.g.alchemy.com/v2/KEY"),
//!     "0x5FbDB2315678afecb367f032d93F642f64180aa3",
//! );
//! let client = RegistryClient::connect(config).await?;
//! let scan = client.scan(client.deployment_block(), BlockBound::Latest).await;
//! println!("{} assets reconciled", scan.timelines.len());
//! # Ok(())
//! # }
//! ```

pub mod calls;
pub mod decoder;
pub mod descriptor;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod orchestrator;
pub mod reconciler;
pub mod scanner;
pub mod selector;
pub mod subscription;

pub use calls::RegistryReader;
pub use decoder::EventDecoder;
pub use descriptor::{ContractDescriptor, EventKind, IndexedFilter};
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryChain;
pub use orchestrator::RegistryClient;
pub use reconciler::{reconcile, LogIndex};
pub use scanner::{partition, LogScanner, ScanOutcome};
pub use selector::{connect, connect_http, EndpointHandle};
pub use subscription::{SubscriptionFilter, SubscriptionHandle};

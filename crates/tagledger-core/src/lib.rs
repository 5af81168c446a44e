//! tagledger-core — domain model for the RFID tag registry.
//!
//! # Architecture
//!
//! ```text
//! RegistryConfig ──► Endpoint Selector ──► Chunked Log Scanner
//!                                               │
//!                    RegistryScan / TokenInfo ◄─┴── Event Decoder ─► State Reconciler
//! ```
//!
//! This crate holds the types shared by the transport and engine crates:
//! identifiers, decoded events, reconciled timelines, workflow results,
//! the error taxonomy, and run configuration. It performs no I/O.

pub mod config;
pub mod error;
pub mod ids;
pub mod types;

pub use config::{EndpointConfig, RegistryConfig, SubscriptionConfig};
pub use error::{EndpointFailure, RegistryError};
pub use ids::{AssetId, BlockBound, TokenId};
pub use types::{
    EntryStatus, Known, LogMetadata, LogPosition, LoggedEvent, ReconciledTimeline,
    RegisteredTokens, RegistrationEvent, RegistryEvent, RegistryScan, SkippedWindow,
    TimelineEntry, TokenHistory, TokenInfo,
};

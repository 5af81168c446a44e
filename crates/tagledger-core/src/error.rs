//! Error taxonomy for registry retrieval.
//!
//! Only [`RegistryError::Connection`] and [`RegistryError::Config`] abort a run.
//! Every other variant is caught at the narrowest scope, logged, and the
//! computation continues with a smaller result set.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One failed attempt to reach an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointFailure {
    /// Redacted endpoint URL.
    pub url: String,
    /// Why the endpoint was rejected.
    pub reason: String,
}

impl std::fmt::Display for EndpointFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.url, self.reason)
    }
}

/// Errors produced while retrieving and reconciling registry data.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// No endpoint could be reached on the expected network.
    #[error("no usable endpoint: {}", join_failures(.attempts))]
    Connection { attempts: Vec<EndpointFailure> },

    /// A raw log could not be mapped to a known event.
    #[error("decode failed: {reason}")]
    Decode { reason: String },

    /// A single block window could not be queried.
    #[error("log query for blocks {from}..={to} failed: {reason}")]
    ScanWindow { from: u64, to: u64, reason: String },

    /// A view call against the registry failed.
    #[error("state query '{call}' failed: {reason}")]
    StateQuery { call: String, reason: String },

    /// Caller-supplied input was malformed.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// The configuration cannot be used.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },
}

impl RegistryError {
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    pub fn state_query(call: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::StateQuery {
            call: call.into(),
            reason: reason.to_string(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the error must halt the whole workflow.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Config { .. })
    }
}

fn join_failures(attempts: &[EndpointFailure]) -> String {
    if attempts.is_empty() {
        return "no endpoints configured".into();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_and_config_are_fatal() {
        let conn = RegistryError::Connection { attempts: vec![] };
        assert!(conn.is_fatal());
        assert!(RegistryError::config("window_size is zero").is_fatal());
        assert!(!RegistryError::decode("unknown topic").is_fatal());
        assert!(!RegistryError::validation("bad token").is_fatal());
        assert!(!RegistryError::state_query("eventCounts", "reverted").is_fatal());
        let window = RegistryError::ScanWindow {
            from: 0,
            to: 499,
            reason: "range too large".into(),
        };
        assert!(!window.is_fatal());
    }

    #[test]
    fn connection_error_lists_every_attempt() {
        let err = RegistryError::Connection {
            attempts: vec![
                EndpointFailure {
                    url: "https://primary".into(),
                    reason: "chain id 1, expected 80002".into(),
                },
                EndpointFailure {
                    url: "https://fallback".into(),
                    reason: "HTTP error: connection refused".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("https://primary: chain id 1"));
        assert!(msg.contains("https://fallback: HTTP error"));
    }
}

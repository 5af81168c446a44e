//! Event records, reconciled timelines and workflow results.

use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize, Serializer};

use crate::ids::{AssetId, TokenId};

/// Render whole seconds since the Unix epoch as an ISO-8601 instant
/// (`2025-06-23T14:05:00.000Z`). Returns `None` if out of range.
pub fn iso8601_from_unix(secs: u64) -> Option<String> {
    let secs = i64::try_from(secs).ok()?;
    DateTime::from_timestamp(secs, 0).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// Position of a log on chain. Output ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPosition {
    pub block_number: u64,
    pub log_index: u64,
}

/// Emitted once per successful registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationEvent {
    pub token_id: TokenId,
    pub asset_id: AssetId,
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: String,
    pub timestamp: String,
}

impl RegistrationEvent {
    pub fn position(&self) -> LogPosition {
        LogPosition {
            block_number: self.block_number,
            log_index: self.log_index,
        }
    }
}

/// An audit message logged against an asset, as observed in the logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedEvent {
    pub asset_id: AssetId,
    pub token_id: TokenId,
    pub event_index: u64,
    pub message: String,
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: String,
    pub timestamp: String,
}

impl LoggedEvent {
    pub fn position(&self) -> LogPosition {
        LogPosition {
            block_number: self.block_number,
            log_index: self.log_index,
        }
    }

    pub fn metadata(&self) -> LogMetadata {
        LogMetadata {
            block_number: self.block_number,
            transaction_hash: self.transaction_hash.clone(),
            timestamp: self.timestamp.clone(),
        }
    }
}

/// Either kind of registry event, tagged by its event name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum RegistryEvent {
    AssetRegistered(RegistrationEvent),
    EventLogged(LoggedEvent),
}

impl RegistryEvent {
    pub fn position(&self) -> LogPosition {
        match self {
            Self::AssetRegistered(e) => e.position(),
            Self::EventLogged(e) => e.position(),
        }
    }

    pub fn token_id(&self) -> TokenId {
        match self {
            Self::AssetRegistered(e) => e.token_id,
            Self::EventLogged(e) => e.token_id,
        }
    }

    pub fn asset_id(&self) -> AssetId {
        match self {
            Self::AssetRegistered(e) => e.asset_id,
            Self::EventLogged(e) => e.asset_id,
        }
    }
}

// ─── Timeline ────────────────────────────────────────────────────────────────

/// A value that is either known or explicitly marked unavailable.
/// `Unavailable` serializes as the string `"N/A"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Known<T> {
    Available(T),
    Unavailable,
}

impl<T> Known<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    pub fn as_ref(&self) -> Known<&T> {
        match self {
            Self::Available(v) => Known::Available(v),
            Self::Unavailable => Known::Unavailable,
        }
    }

    pub fn available(self) -> Option<T> {
        match self {
            Self::Available(v) => Some(v),
            Self::Unavailable => None,
        }
    }
}

impl<T> From<Option<T>> for Known<T> {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Unavailable, Self::Available)
    }
}

impl<T: Serialize> Serialize for Known<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Available(v) => v.serialize(serializer),
            Self::Unavailable => serializer.serialize_str("N/A"),
        }
    }
}

/// Block metadata attached to a timeline slot when a matching log was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMetadata {
    pub block_number: u64,
    pub transaction_hash: String,
    pub timestamp: String,
}

/// Whether a slot's log was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Stored message and log metadata are both present.
    Matched,
    /// The counter confirms the slot exists but no log was found in range.
    Orphaned,
}

/// One slot of an asset's timeline, for an index below the on-chain counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub event_index: u64,
    pub status: EntryStatus,
    pub message: Known<String>,
    pub timestamp: Known<String>,
    pub block_number: Known<u64>,
    pub transaction_hash: Known<String>,
}

impl TimelineEntry {
    pub fn new(event_index: u64, message: Known<String>, meta: Option<&LogMetadata>) -> Self {
        match meta {
            Some(m) => Self {
                event_index,
                status: EntryStatus::Matched,
                message,
                timestamp: Known::Available(m.timestamp.clone()),
                block_number: Known::Available(m.block_number),
                transaction_hash: Known::Available(m.transaction_hash.clone()),
            },
            None => Self {
                event_index,
                status: EntryStatus::Orphaned,
                message,
                timestamp: Known::Unavailable,
                block_number: Known::Unavailable,
                transaction_hash: Known::Unavailable,
            },
        }
    }

    pub fn is_orphaned(&self) -> bool {
        self.status == EntryStatus::Orphaned
    }
}

/// The canonical event sequence of one asset: exactly one entry per index
/// in `[0, event_count)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledTimeline {
    pub asset_id: AssetId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<TokenId>,
    pub event_count: u64,
    pub entries: Vec<TimelineEntry>,
    /// Indices whose stored message could not be read.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unreadable_indices: Vec<u64>,
    /// Indices seen in logs but not yet confirmed by the counter.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unfinalized_indices: Vec<u64>,
}

impl ReconciledTimeline {
    pub fn orphaned_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_orphaned()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.unreadable_indices.is_empty() && self.orphaned_count() == 0
    }
}

// ─── Workflow results ────────────────────────────────────────────────────────

/// A block window that was skipped because its query failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedWindow {
    pub event: String,
    pub from_block: u64,
    pub to_block: u64,
    pub reason: String,
}

/// Result of a full-registry scan.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryScan {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_block: Option<u64>,
    pub registrations: Vec<RegistrationEvent>,
    pub logged_events: Vec<LoggedEvent>,
    pub timelines: Vec<ReconciledTimeline>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_windows: Vec<SkippedWindow>,
    /// Assets whose counter could not be read.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_assets: Vec<AssetId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RegistryScan {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Result of a single-token lookup.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub token_id: String,
    pub registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<AssetId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline: Option<ReconciledTimeline>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_windows: Vec<SkippedWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TokenInfo {
    pub fn unregistered(token_id: impl Into<String>) -> Self {
        Self {
            token_id: token_id.into(),
            registered: false,
            asset_id: None,
            owner: None,
            timeline: None,
            skipped_windows: vec![],
            error: None,
        }
    }

    pub fn failed(token_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::unregistered(token_id)
        }
    }
}

/// All registrations discovered in a block range.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredTokens {
    pub tokens: Vec<RegistrationEvent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_windows: Vec<SkippedWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Every event mentioning one TokenId, ordered by chain position.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenHistory {
    pub token_id: String,
    pub events: Vec<RegistryEvent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_windows: Vec<SkippedWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

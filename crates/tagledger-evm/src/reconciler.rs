//! State reconciliation: the on-chain counter and stored messages are
//! authoritative; scanned logs only contribute block metadata.

use std::collections::{BTreeMap, HashMap};

use tagledger_core::error::RegistryError;
use tagledger_core::ids::{AssetId, TokenId};
use tagledger_core::types::{Known, LogMetadata, LoggedEvent, ReconciledTimeline, TimelineEntry};

use crate::calls::RegistryReader;

/// Scanned `EventLogged` records keyed by `(asset, eventIndex)`.
///
/// Built from events in chain order; on duplicates the first one wins.
#[derive(Debug, Clone, Default)]
pub struct LogIndex {
    by_asset: HashMap<AssetId, BTreeMap<u64, LoggedEvent>>,
}

impl LogIndex {
    pub fn new<'a>(events: impl IntoIterator<Item = &'a LoggedEvent>) -> Self {
        let mut by_asset: HashMap<AssetId, BTreeMap<u64, LoggedEvent>> = HashMap::new();
        for ev in events {
            let slots = by_asset.entry(ev.asset_id).or_default();
            if slots.contains_key(&ev.event_index) {
                tracing::debug!(
                    asset_id = %ev.asset_id,
                    index = ev.event_index,
                    tx = %ev.transaction_hash,
                    "duplicate log for event index, keeping first"
                );
                continue;
            }
            slots.insert(ev.event_index, ev.clone());
        }
        Self { by_asset }
    }

    pub fn get(&self, asset: AssetId, index: u64) -> Option<&LoggedEvent> {
        self.by_asset.get(&asset)?.get(&index)
    }

    /// Indices observed for `asset`, ascending.
    pub fn indices(&self, asset: AssetId) -> impl Iterator<Item = u64> + '_ {
        self.by_asset
            .get(&asset)
            .into_iter()
            .flat_map(|slots| slots.keys().copied())
    }

    /// Distinct assets seen in logs.
    pub fn assets(&self) -> impl Iterator<Item = AssetId> + '_ {
        self.by_asset.keys().copied()
    }
}

/// Build the canonical timeline of one asset.
///
/// Fails only if the counter cannot be read, or, in `strict` mode, if any
/// stored message cannot be read. Otherwise an unreadable message keeps its
/// slot with the message marked unavailable.
pub async fn reconcile(
    reader: &RegistryReader,
    asset: AssetId,
    token: Option<TokenId>,
    logs: &LogIndex,
    strict: bool,
) -> Result<ReconciledTimeline, RegistryError> {
    let count = reader.event_count(asset).await?;

    let mut entries = Vec::with_capacity(count.min(4_096) as usize);
    let mut unreadable = Vec::new();
    for index in 0..count {
        let message = match reader.event_message(asset, index).await {
            Ok(m) => Known::Available(m),
            Err(e) if strict => return Err(e),
            Err(e) => {
                tracing::warn!(asset_id = %asset, index, error = %e, "event message unreadable");
                unreadable.push(index);
                Known::Unavailable
            }
        };
        let meta: Option<LogMetadata> = logs.get(asset, index).map(LoggedEvent::metadata);
        entries.push(TimelineEntry::new(index, message, meta.as_ref()));
    }

    let unfinalized: Vec<u64> = logs.indices(asset).filter(|i| *i >= count).collect();
    if !unfinalized.is_empty() {
        tracing::debug!(asset_id = %asset, count, ?unfinalized, "logs beyond counter ignored");
    }

    let timeline = ReconciledTimeline {
        asset_id: asset,
        token_id: token,
        event_count: count,
        entries,
        unreadable_indices: unreadable,
        unfinalized_indices: unfinalized,
    };
    let orphaned = timeline.orphaned_count();
    if orphaned > 0 {
        tracing::info!(asset_id = %asset, count, orphaned, "timeline has orphaned entries");
    }
    Ok(timeline)
}

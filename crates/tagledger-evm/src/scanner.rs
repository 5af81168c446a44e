//! Chunked log scanner.
//!
//! Splits a closed block range into consecutive windows of at most
//! `window_size` blocks and issues one `eth_getLogs` per window, in
//! ascending order. A failed window is logged, recorded, and skipped.

use std::ops::RangeInclusive;

use tagledger_core::error::RegistryError;
use tagledger_core::ids::BlockBound;
use tagledger_core::types::SkippedWindow;
use tagledger_rpc::eth::{LogFilter, RawLog};

use crate::descriptor::TopicQuery;
use crate::selector::EndpointHandle;

/// Partition `[from, to]` into closed, non-overlapping windows of at most
/// `window` blocks. Empty when `from > to` or `window == 0`.
pub fn partition(from: u64, to: u64, window: u64) -> Vec<RangeInclusive<u64>> {
    let mut out = Vec::new();
    if from > to || window == 0 {
        return out;
    }
    let mut start = from;
    loop {
        let end = start.saturating_add(window - 1).min(to);
        out.push(start..=end);
        if end == to {
            break;
        }
        start = end + 1;
    }
    out
}

/// Logs gathered over a range, plus the windows that could not be fetched.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub logs: Vec<RawLog>,
    pub skipped: Vec<SkippedWindow>,
}

impl ScanOutcome {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }

    /// First skipped window as a [`RegistryError::ScanWindow`].
    pub fn first_failure(&self) -> Option<RegistryError> {
        self.skipped.first().map(|w| RegistryError::ScanWindow {
            from: w.from_block,
            to: w.to_block,
            reason: w.reason.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct LogScanner {
    handle: EndpointHandle,
    address: String,
    window_size: u64,
}

impl LogScanner {
    pub fn new(handle: EndpointHandle, address: impl Into<String>, window_size: u64) -> Self {
        Self {
            handle,
            address: address.into(),
            window_size: window_size.max(1),
        }
    }

    pub fn window_size(&self) -> u64 {
        self.window_size
    }

    /// Resolve a bound to a concrete block number. `Latest` costs one query.
    pub async fn resolve(&self, bound: BlockBound) -> Result<u64, RegistryError> {
        match bound {
            BlockBound::Number(n) => Ok(n),
            BlockBound::Latest => self
                .handle
                .rpc()
                .block_number()
                .await
                .map_err(|e| RegistryError::state_query("eth_blockNumber", e)),
        }
    }

    /// Fetch every log matching `query` in `[from, to]`. Never fails as a
    /// whole; failed windows are reported in [`ScanOutcome::skipped`].
    pub async fn scan(&self, query: &TopicQuery, from: u64, to: u64) -> ScanOutcome {
        let windows = partition(from, to, self.window_size);
        tracing::debug!(
            event = query.event,
            from,
            to,
            windows = windows.len(),
            "scanning logs"
        );

        let mut outcome = ScanOutcome::default();
        for window in windows {
            let filter = LogFilter {
                address: self.address.clone(),
                from_block: *window.start(),
                to_block: *window.end(),
                topics: query.topics.clone(),
            };
            match self.handle.rpc().get_logs(&filter).await {
                Ok(logs) => {
                    tracing::trace!(
                        event = query.event,
                        from = filter.from_block,
                        to = filter.to_block,
                        count = logs.len(),
                        "window fetched"
                    );
                    outcome.logs.extend(logs);
                }
                Err(e) => {
                    tracing::warn!(
                        event = query.event,
                        from = filter.from_block,
                        to = filter.to_block,
                        error = %e,
                        "log window failed, skipping"
                    );
                    outcome.skipped.push(SkippedWindow {
                        event: query.event.to_string(),
                        from_block: filter.from_block,
                        to_block: filter.to_block,
                        reason: e.to_string(),
                    });
                }
            }
        }

        // Sources return ascending order per window; keep it stable across
        // windows regardless.
        outcome.logs.sort_by_key(|log| {
            (
                log.block_number_u64().unwrap_or(u64::MAX),
                log.log_index_u64().unwrap_or(u64::MAX),
            )
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_500_over_0_to_1200() {
        assert_eq!(partition(0, 1200, 500), vec![0..=499, 500..=999, 1000..=1200]);
    }

    #[test]
    fn partition_covers_range_without_gaps_or_overlap() {
        for (from, to, w) in [(0, 0, 1), (7, 7, 500), (3, 1002, 10), (100, 599, 500), (1, 2000, 3)] {
            let windows = partition(from, to, w);
            assert_eq!(*windows[0].start(), from);
            assert_eq!(*windows.last().unwrap().end(), to);
            for pair in windows.windows(2) {
                assert_eq!(*pair[1].start(), pair[0].end() + 1);
            }
            assert!(windows.iter().all(|r| r.end() - r.start() < w));
        }
    }

    #[test]
    fn partition_exact_multiple() {
        assert_eq!(partition(0, 999, 500), vec![0..=499, 500..=999]);
    }

    #[test]
    fn partition_empty_cases() {
        assert!(partition(10, 9, 500).is_empty());
        assert!(partition(0, 10, 0).is_empty());
    }

    #[test]
    fn partition_near_u64_max() {
        let w = partition(u64::MAX - 2, u64::MAX, 2);
        assert_eq!(w, vec![u64::MAX - 2..=u64::MAX - 1, u64::MAX..=u64::MAX]);
    }
}

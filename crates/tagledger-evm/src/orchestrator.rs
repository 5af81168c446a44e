//! Retrieval orchestrator: the workflows clients call.
//!
//! Every workflow returns a fully populated result value. Retrievable-data
//! errors are reported through the result's `error` field; nothing here
//! returns `Err` once a client exists.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tagledger_core::config::RegistryConfig;
use tagledger_core::error::RegistryError;
use tagledger_core::ids::{AssetId, BlockBound, TokenId};
use tagledger_core::types::{
    RegisteredTokens, RegistrationEvent, RegistryScan, SkippedWindow, TokenHistory, TokenInfo,
};

use crate::calls::RegistryReader;
use crate::decoder::{partition_events, EventDecoder};
use crate::descriptor::{ContractDescriptor, EventKind, IndexedFilter};
use crate::reconciler::{reconcile, LogIndex};
use crate::scanner::LogScanner;
use crate::selector::{connect_http, EndpointHandle};
use crate::subscription::{self, Poller, SubscriptionFilter, SubscriptionHandle};

/// Entry point for registry retrieval against one verified endpoint.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    handle: EndpointHandle,
    config: RegistryConfig,
    decoder: EventDecoder,
    scanner: LogScanner,
    reader: RegistryReader,
}

impl RegistryClient {
    /// Validate `config` and connect over HTTP (primary, then fallback).
    pub async fn connect(config: RegistryConfig) -> Result<Self, RegistryError> {
        config.validate()?;
        let handle = connect_http(&config.endpoints).await?;
        tracing::info!(url = %handle.url(), chain_id = handle.chain_id(), "connected");
        Self::new(handle, config)
    }

    /// Build a client over an already verified endpoint.
    pub fn new(handle: EndpointHandle, config: RegistryConfig) -> Result<Self, RegistryError> {
        config.validate()?;
        let descriptor = Arc::new(ContractDescriptor::registry());
        let scanner = LogScanner::new(handle.clone(), &config.contract_address, config.window_size);
        let reader = RegistryReader::new(handle.clone(), &config.contract_address, Arc::clone(&descriptor));
        Ok(Self {
            handle,
            decoder: EventDecoder::new(descriptor),
            scanner,
            reader,
            config,
        })
    }

    pub fn handle(&self) -> &EndpointHandle {
        &self.handle
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn reader(&self) -> &RegistryReader {
        &self.reader
    }

    fn descriptor(&self) -> &ContractDescriptor {
        self.decoder.descriptor()
    }

    /// The deployment block, used as the default lower bound.
    pub fn deployment_block(&self) -> BlockBound {
        BlockBound::Number(self.config.deployment_block)
    }

    // ─── Full-registry scan ──────────────────────────────────────────────────

    /// Scan both event kinds over `[from, to]` and reconcile every
    /// registered asset.
    pub async fn scan(&self, from: BlockBound, to: BlockBound) -> RegistryScan {
        match self.try_scan(from, to).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "registry scan failed");
                RegistryScan::failed(e.to_string())
            }
        }
    }

    async fn try_scan(&self, from: BlockBound, to: BlockBound) -> Result<RegistryScan, RegistryError> {
        let (from, to) = self.resolve_range(from, to).await?;
        let strict = self.config.strict;

        let reg_query = self.descriptor().event(EventKind::AssetRegistered).query(&[])?;
        let log_query = self.descriptor().event(EventKind::EventLogged).query(&[])?;
        let reg_scan = self.scanner.scan(&reg_query, from, to).await;
        let log_scan = self.scanner.scan(&log_query, from, to).await;
        if strict {
            if let Some(e) = reg_scan.first_failure().or_else(|| log_scan.first_failure()) {
                return Err(e);
            }
        }

        let (registrations, _) = partition_events(self.decoder.decode_all(&reg_scan.logs));
        let (_, logged_events) = partition_events(self.decoder.decode_all(&log_scan.logs));
        let index = LogIndex::new(&logged_events);
        let assets = distinct_assets(&registrations);
        tracing::info!(
            from,
            to,
            registrations = registrations.len(),
            logged = logged_events.len(),
            assets = assets.len(),
            "logs collected, reconciling"
        );

        let reader = &self.reader;
        let index_ref = &index;
        let results: Vec<_> = stream::iter(assets)
            .map(|(asset, token)| async move {
                (asset, reconcile(reader, asset, Some(token), index_ref, strict).await)
            })
            .buffered(self.config.reconcile_concurrency)
            .collect()
            .await;

        let mut timelines = Vec::with_capacity(results.len());
        let mut skipped_assets = Vec::new();
        for (asset, result) in results {
            match result {
                Ok(tl) => timelines.push(tl),
                Err(e) if strict => return Err(e),
                Err(e) => {
                    tracing::warn!(asset_id = %asset, error = %e, "asset skipped");
                    skipped_assets.push(asset);
                }
            }
        }

        let mut skipped_windows = reg_scan.skipped;
        skipped_windows.extend(log_scan.skipped);
        Ok(RegistryScan {
            from_block: Some(from),
            to_block: Some(to),
            registrations,
            logged_events,
            timelines,
            skipped_windows,
            skipped_assets,
            error: None,
        })
    }

    // ─── Single-token lookup ─────────────────────────────────────────────────

    /// Registration status, asset id, owner and reconciled timeline of one
    /// token. Logs are restricted to `[from, to]`.
    pub async fn lookup(&self, token_id: &str, from: BlockBound, to: BlockBound) -> TokenInfo {
        let token: TokenId = match token_id.parse() {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(token_id, error = %e, "lookup rejected");
                return TokenInfo::failed(token_id, e.to_string());
            }
        };
        let mut info = TokenInfo::unregistered(token.to_string());
        if let Err(e) = self.try_lookup(&token, from, to, &mut info).await {
            tracing::error!(token_id = %token, error = %e, "lookup failed");
            info.error = Some(e.to_string());
        }
        info
    }

    async fn try_lookup(
        &self,
        token: &TokenId,
        from: BlockBound,
        to: BlockBound,
        info: &mut TokenInfo,
    ) -> Result<(), RegistryError> {
        if !self.reader.is_token_registered(token).await? {
            tracing::debug!(token_id = %token, "token not registered");
            return Ok(());
        }
        info.registered = true;
        let asset = self.reader.asset_id(token).await?;
        info.asset_id = Some(asset);
        info.owner = Some(self.reader.owner_of(asset).await?);

        let (from, to) = self.resolve_range(from, to).await?;
        let query = self
            .descriptor()
            .event(EventKind::EventLogged)
            .query(&[IndexedFilter::token(token)])?;
        let outcome = self.scanner.scan(&query, from, to).await;
        if self.config.strict {
            if let Some(e) = outcome.first_failure() {
                return Err(e);
            }
        }
        info.skipped_windows = outcome.skipped.clone();

        let (_, logged) = partition_events(self.decoder.decode_all(&outcome.logs));
        let index = LogIndex::new(logged.iter().filter(|e| e.asset_id == asset));
        let timeline = reconcile(&self.reader, asset, Some(*token), &index, self.config.strict).await?;
        info.timeline = Some(timeline);
        Ok(())
    }

    // ─── Registered tokens ───────────────────────────────────────────────────

    /// Every registration in `[from, to]`, in chain order.
    pub async fn registered_tokens(&self, from: BlockBound, to: BlockBound) -> RegisteredTokens {
        let result = async {
            let (from, to) = self.resolve_range(from, to).await?;
            let query = self.descriptor().event(EventKind::AssetRegistered).query(&[])?;
            let outcome = self.scanner.scan(&query, from, to).await;
            self.check_strict(&outcome.skipped)?;
            let (tokens, _) = partition_events(self.decoder.decode_all(&outcome.logs));
            Ok::<_, RegistryError>(RegisteredTokens {
                tokens,
                skipped_windows: outcome.skipped,
                error: None,
            })
        }
        .await;
        result.unwrap_or_else(|e| {
            tracing::error!(error = %e, "token listing failed");
            RegisteredTokens {
                error: Some(e.to_string()),
                ..Default::default()
            }
        })
    }

    // ─── Per-token history ───────────────────────────────────────────────────

    /// Both event kinds mentioning `token_id`, merged in chain order.
    pub async fn token_history(&self, token_id: &str, from: BlockBound, to: BlockBound) -> TokenHistory {
        let result = async {
            let token: TokenId = token_id.parse()?;
            let (from, to) = self.resolve_range(from, to).await?;
            let filter = [IndexedFilter::token(&token)];
            let mut events = Vec::new();
            let mut skipped_windows = Vec::new();
            for kind in EventKind::ALL {
                let query = self.descriptor().event(kind).query(&filter)?;
                let outcome = self.scanner.scan(&query, from, to).await;
                self.check_strict(&outcome.skipped)?;
                events.extend(self.decoder.decode_all(&outcome.logs));
                skipped_windows.extend(outcome.skipped);
            }
            events.sort_by_key(|e| e.position());
            Ok::<_, RegistryError>(TokenHistory {
                token_id: token.to_string(),
                events,
                skipped_windows,
                error: None,
            })
        }
        .await;
        result.unwrap_or_else(|e| {
            tracing::error!(token_id, error = %e, "token history failed");
            TokenHistory {
                token_id: token_id.to_string(),
                error: Some(e.to_string()),
                ..Default::default()
            }
        })
    }

    // ─── Live subscription ───────────────────────────────────────────────────

    /// Start delivering new events matching `filter`. The returned handle
    /// cancels the background poller when cancelled or dropped.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> Result<SubscriptionHandle, RegistryError> {
        let indexed: Vec<IndexedFilter> = filter.token_id.iter().map(IndexedFilter::token).collect();
        let queries = filter
            .kinds()
            .into_iter()
            .map(|kind| self.descriptor().event(kind).query(&indexed))
            .collect::<Result<Vec<_>, _>>()?;
        let sub = &self.config.subscription;
        tracing::info!(
            kinds = queries.len(),
            poll_ms = sub.poll_interval_ms,
            capacity = sub.channel_capacity,
            "subscription started"
        );
        let poller = Poller {
            scanner: self.scanner.clone(),
            decoder: self.decoder.clone(),
            queries,
            poll_interval: Duration::from_millis(sub.poll_interval_ms),
            from_block: filter.from_block,
        };
        Ok(subscription::spawn(poller, sub.channel_capacity))
    }

    // ─── Helpers ─────────────────────────────────────────────────────────────

    async fn resolve_range(&self, from: BlockBound, to: BlockBound) -> Result<(u64, u64), RegistryError> {
        // one head query serves both bounds
        let head = if from.is_latest() || to.is_latest() {
            self.scanner.resolve(BlockBound::Latest).await?
        } else {
            0
        };
        let (from, to) = (from.resolve_with(head), to.resolve_with(head));
        if from > to {
            return Err(RegistryError::validation(format!(
                "fromBlock {from} is after toBlock {to}"
            )));
        }
        Ok((from, to))
    }

    fn check_strict(&self, skipped: &[SkippedWindow]) -> Result<(), RegistryError> {
        match skipped.first() {
            Some(w) if self.config.strict => Err(RegistryError::ScanWindow {
                from: w.from_block,
                to: w.to_block,
                reason: w.reason.clone(),
            }),
            _ => Ok(()),
        }
    }
}

/// Assets in first-registration order. A token seen again with a different
/// asset keeps its first mapping.
fn distinct_assets(registrations: &[RegistrationEvent]) -> Vec<(AssetId, TokenId)> {
    let mut seen_assets = HashSet::new();
    let mut seen_tokens: HashMap<TokenId, AssetId> = HashMap::new();
    let mut out = Vec::new();
    for r in registrations {
        if let Some(first) = seen_tokens.get(&r.token_id) {
            if *first != r.asset_id {
                tracing::warn!(
                    token_id = %r.token_id,
                    first = %first,
                    later = %r.asset_id,
                    "token registered under a second asset id, keeping first"
                );
            }
            continue;
        }
        seen_tokens.insert(r.token_id, r.asset_id);
        if seen_assets.insert(r.asset_id) {
            out.push((r.asset_id, r.token_id));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(token: u8, asset: u64, block: u64) -> RegistrationEvent {
        RegistrationEvent {
            token_id: TokenId::from_bytes([token; 32]),
            asset_id: AssetId::from(asset),
            block_number: block,
            log_index: 0,
            transaction_hash: "0x00".into(),
            timestamp: String::new(),
        }
    }

    #[test]
    fn distinct_assets_keep_first_mapping() {
        let regs = vec![reg(1, 1, 10), reg(2, 2, 11), reg(1, 3, 12), reg(3, 2, 13)];
        let assets = distinct_assets(&regs);
        assert_eq!(
            assets,
            vec![
                (AssetId::from(1), TokenId::from_bytes([1; 32])),
                (AssetId::from(2), TokenId::from_bytes([2; 32])),
            ]
        );
    }
}

//! End-to-end retrieval against the in-memory registry chain.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tagledger_core::{
    BlockBound, EndpointConfig, EntryStatus, Known, RegistryConfig, RegistryError, RegistryEvent,
    TokenId,
};
use tagledger_evm::{
    connect, ContractDescriptor, EventKind, LogScanner, MemoryChain, RegistryClient,
    SubscriptionFilter,
};
use tagledger_rpc::EvmRpc;

const CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

fn token(n: u8) -> TokenId {
    TokenId::from_tag(&[n; 12], &[n.wrapping_add(100); 12])
}

async fn client_with(chain: &Arc<MemoryChain>, tweak: impl FnOnce(&mut RegistryConfig)) -> RegistryClient {
    let handle = connect(chain.clone(), None, 80002).await.unwrap();
    let mut config = RegistryConfig::new(EndpointConfig::new("http://localhost:8545"), CONTRACT);
    config.deployment_block = 0;
    tweak(&mut config);
    let client = RegistryClient::new(handle, config).unwrap();
    chain.reset_call_count();
    client
}

async fn client(chain: &Arc<MemoryChain>) -> RegistryClient {
    client_with(chain, |_| {}).await
}

/// Three assets with interleaved activity across ~1500 blocks.
fn populated_chain() -> Arc<MemoryChain> {
    let chain = Arc::new(MemoryChain::new(CONTRACT));
    let a = chain.register(token(1), 100);
    chain.log_event(a, "manufactured", 120);
    let b = chain.register(token(2), 480);
    chain.log_event(a, "shipped", 499);
    chain.log_event(b, "manufactured", 500);
    chain.log_event(a, "received", 500);
    let c = chain.register(token(3), 1001);
    chain.log_event(c, "manufactured", 1001);
    chain.log_event(b, "inspected", 1350);
    chain.set_head(1500);
    chain
}

// ─── Scanner properties ──────────────────────────────────────────────────────

#[tokio::test]
async fn windowed_scan_matches_single_query() {
    let chain = populated_chain();
    let handle = connect(chain.clone(), None, 80002).await.unwrap();
    let query = ContractDescriptor::registry()
        .event(EventKind::EventLogged)
        .query(&[])
        .unwrap();

    let single = LogScanner::new(handle.clone(), CONTRACT, 10_000)
        .scan(&query, 0, 1500)
        .await;
    for window in [1, 7, 100, 499, 500, 501] {
        let chunked = LogScanner::new(handle.clone(), CONTRACT, window)
            .scan(&query, 0, 1500)
            .await;
        assert!(chunked.is_complete());
        assert_eq!(chunked.logs, single.logs, "window {window}");
    }
}

#[tokio::test]
async fn output_order_is_non_decreasing_for_any_window() {
    let chain = populated_chain();
    for window in [3, 250, 500, 2000] {
        let c = client_with(&chain, |cfg| cfg.window_size = window).await;
        let scan = c.scan(BlockBound::Number(0), BlockBound::Latest).await;
        let positions: Vec<_> = scan.logged_events.iter().map(|e| e.position()).collect();
        assert!(positions.windows(2).all(|p| p[0] <= p[1]), "window {window}");
    }
}

#[tokio::test]
async fn range_0_to_1200_issues_three_windows_per_event() {
    let chain = Arc::new(MemoryChain::new(CONTRACT).with_max_range(500));
    chain.set_head(1200);
    let c = client(&chain).await;
    let scan = c.scan(BlockBound::Number(0), BlockBound::Number(1200)).await;
    assert!(scan.error.is_none());
    assert!(scan.skipped_windows.is_empty());
    // 3 windows x 2 event kinds, no head lookup for a numeric bound
    assert_eq!(chain.call_count(), 6);
}

#[tokio::test]
async fn failed_window_is_skipped_and_reported() {
    let chain = populated_chain();
    chain.fail_range(500, 999);
    let c = client(&chain).await;
    let scan = c.scan(BlockBound::Number(0), BlockBound::Number(1200)).await;

    assert!(scan.error.is_none());
    let skipped: Vec<_> = scan
        .skipped_windows
        .iter()
        .map(|w| (w.event.as_str(), w.from_block, w.to_block))
        .collect();
    assert_eq!(skipped, vec![("NFTRegistered", 500, 999), ("EventLogged", 500, 999)]);
    // windows after the failed one are still scanned
    assert!(scan.registrations.iter().any(|r| r.block_number == 1001));
    assert!(scan.logged_events.iter().all(|e| !(500..=999).contains(&e.block_number)));
}

// ─── Reconciliation properties ───────────────────────────────────────────────

#[tokio::test]
async fn every_timeline_length_equals_counter() {
    let chain = populated_chain();
    let c = client(&chain).await;
    let scan = c.scan(BlockBound::Number(0), BlockBound::Latest).await;

    assert_eq!(scan.timelines.len(), 3);
    for tl in &scan.timelines {
        assert_eq!(tl.entries.len() as u64, tl.event_count);
        let indices: Vec<u64> = tl.entries.iter().map(|e| e.event_index).collect();
        assert_eq!(indices, (0..tl.event_count).collect::<Vec<_>>());
        assert!(tl.is_complete());
    }
    let first = &scan.timelines[0];
    assert_eq!(first.token_id, Some(token(1)));
    assert_eq!(first.entries[2].message, Known::Available("received".to_string()));
    assert_eq!(first.entries[2].block_number, Known::Available(500));
}

#[tokio::test]
async fn counter_three_with_two_logs_yields_one_orphan() {
    let chain = Arc::new(MemoryChain::new(CONTRACT));
    let a = chain.register(token(9), 100);
    chain.log_event(a, "first", 110);
    chain.log_event(a, "outside range", 2_000);
    chain.log_event(a, "third", 120);

    let c = client(&chain).await;
    let scan = c.scan(BlockBound::Number(0), BlockBound::Number(1_500)).await;
    let tl = &scan.timelines[0];
    assert_eq!(tl.event_count, 3);
    assert_eq!(tl.entries.len(), 3);
    assert_eq!(tl.orphaned_count(), 1);
    let orphan = &tl.entries[1];
    assert_eq!(orphan.status, EntryStatus::Orphaned);
    assert_eq!(orphan.message, Known::Available("outside range".to_string()));

    let json = serde_json::to_value(orphan).unwrap();
    assert_eq!(json["timestamp"], "N/A");
    assert_eq!(json["blockNumber"], "N/A");
    assert_eq!(json["transactionHash"], "N/A");
}

#[tokio::test]
async fn unreadable_message_and_failed_counter_degrade_gracefully() {
    let chain = populated_chain();
    let a = tagledger_core::AssetId::from(1);
    let b = tagledger_core::AssetId::from(2);
    chain.fail_message(a, 1);
    chain.fail_counter(b);

    let c = client(&chain).await;
    let scan = c.scan(BlockBound::Number(0), BlockBound::Latest).await;
    assert!(scan.error.is_none());
    assert_eq!(scan.skipped_assets, vec![b]);
    assert_eq!(scan.timelines.len(), 2);

    let tl = scan.timelines.iter().find(|t| t.asset_id == a).unwrap();
    assert_eq!(tl.entries.len(), 3);
    assert_eq!(tl.entries[1].message, Known::Unavailable);
    assert_eq!(tl.unreadable_indices, vec![1]);
}

#[tokio::test]
async fn strict_mode_turns_partial_failure_into_error() {
    let chain = populated_chain();
    chain.fail_range(500, 999);
    let c = client_with(&chain, |cfg| cfg.strict = true).await;
    let scan = c.scan(BlockBound::Number(0), BlockBound::Number(1200)).await;
    let err = scan.error.expect("strict scan must fail");
    assert!(err.contains("500..=999"), "{err}");
    assert!(scan.registrations.is_empty());
    assert!(scan.timelines.is_empty());
}

#[tokio::test]
async fn repeated_scans_are_identical() {
    let chain = populated_chain();
    let c = client_with(&chain, |cfg| cfg.reconcile_concurrency = 4).await;
    let first = c.scan(BlockBound::Number(0), BlockBound::Number(1500)).await;
    let second = c.scan(BlockBound::Number(0), BlockBound::Number(1500)).await;
    assert_eq!(first.timelines, second.timelines);
    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );
    // buffered reconciliation keeps discovery order
    let assets: Vec<_> = first.timelines.iter().map(|t| t.asset_id).collect();
    let expected: Vec<_> = first.registrations.iter().map(|r| r.asset_id).collect();
    assert_eq!(assets, expected);
}

#[tokio::test]
async fn inverted_range_is_reported() {
    let chain = populated_chain();
    let c = client(&chain).await;
    let scan = c.scan(BlockBound::Number(900), BlockBound::Number(100)).await;
    assert!(scan.error.unwrap().contains("after toBlock"));
}

#[tokio::test]
async fn latest_lower_bound_means_chain_head() {
    let chain = populated_chain();
    let c = client(&chain).await;
    let scan = c.scan(BlockBound::Latest, BlockBound::Number(100)).await;
    let err = scan.error.expect("head 1500 is after block 100");
    assert!(err.contains("fromBlock 1500 is after toBlock 100"), "{err}");
    assert!(scan.registrations.is_empty());
    // only the head query was issued
    assert_eq!(chain.call_count(), 1);
}

#[tokio::test]
async fn latest_bounds_share_one_head_query() {
    let chain = populated_chain();
    let c = client(&chain).await;
    let listed = c.registered_tokens(BlockBound::Latest, BlockBound::Latest).await;
    assert!(listed.error.is_none());
    assert!(listed.tokens.is_empty());
    // eth_blockNumber once, then a single one-block window
    assert_eq!(chain.call_count(), 2);
}

// ─── Lookup ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn lookup_registered_token() {
    let chain = populated_chain();
    let c = client(&chain).await;
    let info = c
        .lookup(&token(2).to_string(), BlockBound::Number(0), BlockBound::Latest)
        .await;
    assert!(info.registered);
    assert!(info.error.is_none());
    assert_eq!(info.asset_id, Some(tagledger_core::AssetId::from(2)));
    assert!(info.owner.as_deref().is_some_and(|o| o.len() == 42));
    let tl = info.timeline.unwrap();
    let messages: Vec<_> = tl.entries.iter().map(|e| e.message.clone()).collect();
    assert_eq!(
        messages,
        vec![
            Known::Available("manufactured".to_string()),
            Known::Available("inspected".to_string()),
        ]
    );
    assert!(tl.entries.iter().all(|e| !e.is_orphaned()));
}

#[tokio::test]
async fn lookup_unregistered_short_circuits() {
    let chain = populated_chain();
    let c = client(&chain).await;
    let info = c
        .lookup(&token(42).to_string(), BlockBound::Number(0), BlockBound::Latest)
        .await;
    assert!(!info.registered);
    assert!(info.error.is_none());
    assert_eq!(chain.call_count(), 1);
    assert_eq!(
        serde_json::to_value(&info).unwrap(),
        serde_json::json!({"tokenId": token(42).to_string(), "registered": false})
    );
}

#[tokio::test]
async fn lookup_rejects_short_token_before_any_call() {
    let chain = populated_chain();
    let c = client(&chain).await;
    let short = format!("0x{}", "a".repeat(63));
    let info = c.lookup(&short, BlockBound::Number(0), BlockBound::Latest).await;
    assert!(!info.registered);
    assert!(info.error.unwrap().contains("validation"));
    assert_eq!(chain.call_count(), 0);

    let err = short.parse::<TokenId>().unwrap_err();
    assert!(matches!(err, RegistryError::Validation { .. }));
}

#[tokio::test]
async fn lookup_over_latest_block_only() {
    let chain = populated_chain();
    let c = client(&chain).await;
    let info = c
        .lookup(&token(2).to_string(), BlockBound::Latest, BlockBound::Latest)
        .await;
    let tl = info.timeline.unwrap();
    // head is 1500: no logs there, both entries orphaned but present
    assert_eq!(tl.entries.len(), 2);
    assert_eq!(tl.orphaned_count(), 2);
}

// ─── Supplementary workflows ─────────────────────────────────────────────────

#[tokio::test]
async fn registered_tokens_in_chain_order() {
    let chain = populated_chain();
    let c = client(&chain).await;
    let listed = c.registered_tokens(BlockBound::Number(0), BlockBound::Latest).await;
    let tokens: Vec<_> = listed.tokens.iter().map(|r| r.token_id).collect();
    assert_eq!(tokens, vec![token(1), token(2), token(3)]);

    let partial = c.registered_tokens(BlockBound::Number(200), BlockBound::Number(999)).await;
    assert_eq!(partial.tokens.len(), 1);
}

#[tokio::test]
async fn token_history_merges_both_kinds() {
    let chain = populated_chain();
    let c = client(&chain).await;
    let history = c
        .token_history(&token(1).to_string(), BlockBound::Number(0), BlockBound::Latest)
        .await;
    assert!(history.error.is_none());
    let kinds: Vec<_> = history
        .events
        .iter()
        .map(|e| match e {
            RegistryEvent::AssetRegistered(_) => "reg",
            RegistryEvent::EventLogged(_) => "log",
        })
        .collect();
    assert_eq!(kinds, vec!["reg", "log", "log", "log"]);
    assert!(history.events.iter().all(|e| e.token_id() == token(1)));
    let blocks: BTreeSet<u64> = history.events.iter().map(|e| e.position().block_number).collect();
    assert_eq!(blocks.into_iter().collect::<Vec<_>>(), vec![100, 120, 499, 500]);
}

#[tokio::test]
async fn history_rejects_malformed_token() {
    let chain = populated_chain();
    let c = client(&chain).await;
    let history = c.token_history("0x1234", BlockBound::Number(0), BlockBound::Latest).await;
    assert!(history.error.is_some());
    assert_eq!(chain.call_count(), 0);
}

// ─── Endpoint selection ──────────────────────────────────────────────────────

#[tokio::test]
async fn falls_back_then_fails_with_aggregated_error() {
    let wrong = Arc::new(MemoryChain::new(CONTRACT).with_chain_id(1));
    let good = Arc::new(MemoryChain::new(CONTRACT).with_url("mock://fallback"));
    let fallback: Arc<dyn EvmRpc> = good.clone();
    let handle = connect(wrong.clone(), Some(fallback.clone()), 80002).await.unwrap();
    assert_eq!(handle.url(), "mock://fallback");

    good.set_unreachable(true);
    let err = connect(wrong, Some(fallback), 80002).await.unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("chain id 1, expected 80002"));
    assert!(err.to_string().contains("connection refused"));
}

// ─── Subscription ────────────────────────────────────────────────────────────

#[tokio::test]
async fn subscription_delivers_new_events() {
    let chain = Arc::new(MemoryChain::new(CONTRACT));
    let a = chain.register(token(1), 10);
    let c = client_with(&chain, |cfg| cfg.subscription.poll_interval_ms = 10).await;

    let mut sub = c
        .subscribe(SubscriptionFilter {
            token_id: Some(token(1)),
            from_block: Some(11),
            ..Default::default()
        })
        .unwrap();

    chain.register(token(2), 12);
    chain.log_event(a, "moved to bay 3", 13);

    let ev = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("no event within 5s")
        .expect("subscription closed");
    match ev {
        RegistryEvent::EventLogged(e) => {
            assert_eq!(e.message, "moved to bay 3");
            assert_eq!(e.token_id, token(1));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(sub.try_recv().is_none());
    sub.cancel().await;
}

#[tokio::test]
async fn subscription_retries_failed_poll_without_skipping() {
    let chain = Arc::new(MemoryChain::new(CONTRACT));
    let a = chain.register(token(1), 10);
    let c = client_with(&chain, |cfg| cfg.subscription.poll_interval_ms = 10).await;

    chain.fail_range(11, 20);
    let mut sub = c
        .subscribe(SubscriptionFilter {
            kinds: vec![EventKind::EventLogged],
            from_block: Some(11),
            ..Default::default()
        })
        .unwrap();
    chain.log_event(a, "during outage", 15);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sub.try_recv().is_none());

    chain.clear_faults();
    let ev = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ev.position().block_number, 15);
    sub.cancel().await;
}

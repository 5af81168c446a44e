//! Live subscription to newly emitted registry events.
//!
//! A background task polls the chain head, scans new blocks in windows,
//! decodes, and pushes events into a bounded channel. The consumer holds a
//! [`SubscriptionHandle`]; cancelling or dropping it stops the task.

use std::time::Duration;

use tagledger_core::ids::{BlockBound, TokenId};
use tagledger_core::types::RegistryEvent;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::decoder::EventDecoder;
use crate::descriptor::{EventKind, TopicQuery};
use crate::scanner::LogScanner;

/// What a subscription delivers.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    /// Event kinds to deliver; empty means all.
    pub kinds: Vec<EventKind>,
    /// Only events for this token.
    pub token_id: Option<TokenId>,
    /// First block to deliver. Defaults to the block after the current head.
    pub from_block: Option<u64>,
}

impl SubscriptionFilter {
    pub fn kinds(&self) -> Vec<EventKind> {
        if self.kinds.is_empty() {
            EventKind::ALL.to_vec()
        } else {
            self.kinds.clone()
        }
    }
}

/// Cancellable receiver for live events.
pub struct SubscriptionHandle {
    rx: mpsc::Receiver<RegistryEvent>,
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Next event, or `None` once the subscription has stopped.
    pub async fn recv(&mut self) -> Option<RegistryEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RegistryEvent> {
        self.rx.try_recv().ok()
    }

    /// Stop polling and wait for the task to exit.
    pub async fn cancel(mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }
}

pub(crate) struct Poller {
    pub scanner: LogScanner,
    pub decoder: EventDecoder,
    pub queries: Vec<TopicQuery>,
    pub poll_interval: Duration,
    pub from_block: Option<u64>,
}

pub(crate) fn spawn(poller: Poller, capacity: usize) -> SubscriptionHandle {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let task = tokio::spawn(poller.run(tx, cancel_rx));
    SubscriptionHandle {
        rx,
        cancel: Some(cancel_tx),
        task: Some(task),
    }
}

impl Poller {
    async fn run(self, tx: mpsc::Sender<RegistryEvent>, mut cancel: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut cursor = self.from_block;

        loop {
            tokio::select! {
                _ = &mut cancel => break,
                _ = ticker.tick() => {}
            }

            let head = match self.scanner.resolve(BlockBound::Latest).await {
                Ok(h) => h,
                Err(e) => {
                    tracing::warn!(error = %e, "subscription poll failed, retrying next tick");
                    continue;
                }
            };
            let from = match cursor {
                Some(c) => c,
                None => {
                    cursor = Some(head + 1);
                    tracing::debug!(head, "subscription starts after current head");
                    continue;
                }
            };
            if from > head {
                continue;
            }

            let Some(events) = self.poll_range(from, head).await else {
                continue;
            };
            for ev in events {
                tokio::select! {
                    _ = &mut cancel => return,
                    sent = tx.send(ev) => {
                        if sent.is_err() {
                            tracing::debug!("subscriber gone, stopping");
                            return;
                        }
                    }
                }
            }
            cursor = Some(head + 1);
        }
        tracing::debug!("subscription cancelled");
    }

    /// Events in `[from, to]` ordered by chain position, or `None` if any
    /// window failed (the cursor is not advanced).
    async fn poll_range(&self, from: u64, to: u64) -> Option<Vec<RegistryEvent>> {
        let mut events = Vec::new();
        for query in &self.queries {
            let outcome = self.scanner.scan(query, from, to).await;
            if let Some(e) = outcome.first_failure() {
                tracing::warn!(from, to, error = %e, "subscription window failed, retrying next tick");
                return None;
            }
            events.extend(self.decoder.decode_all(&outcome.logs));
        }
        events.sort_by_key(RegistryEvent::position);
        Some(events)
    }
}

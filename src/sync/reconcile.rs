// Reconciliation Engine - Full snapshot exchange with one peer at a time
//
// A round sends our snapshot as SYNC, takes the peer's snapshot from the
// SYNC_RESPONSE and merges it locally. Accounts and investor profiles are
// overwritten by whatever arrives; transactions are only ever appended.

use crate::events::{BridgeEvent, EventBus};
use crate::ledger::{LedgerHooks, MergeReport};
use crate::peer::{PeerId, PeerRegistry};
use crate::protocol::{Message, MessageKind, Payload};
use crate::storage::StoreError;
use crate::transport::{DeliveryError, DeliveryRouter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a reconciliation round did not complete
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Cannot export local snapshot: {0}")]
    Snapshot(StoreError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("Expected sync response, got {0}")]
    UnexpectedResponse(MessageKind),

    #[error("Cannot merge remote snapshot: {0}")]
    Merge(StoreError),

    #[error("Cannot sync with self")]
    SelfSync,
}

/// Counters across all rounds
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub rounds: u64,
    pub completed: u64,
    pub failed: u64,
    pub records_changed: u64,
}

#[derive(Default)]
struct Counters {
    rounds: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    records_changed: AtomicU64,
}

/// Drives snapshot exchange for one node
pub struct ReconciliationEngine {
    local: PeerId,
    hooks: Arc<dyn LedgerHooks>,
    router: Arc<DeliveryRouter>,
    peers: Arc<PeerRegistry>,
    events: Arc<EventBus>,
    counters: Counters,
}

impl ReconciliationEngine {
    pub fn new(
        hooks: Arc<dyn LedgerHooks>,
        router: Arc<DeliveryRouter>,
        peers: Arc<PeerRegistry>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            local: router.local(),
            hooks,
            router,
            peers,
            events,
            counters: Counters::default(),
        }
    }

    /// Run one round with `peer`
    ///
    /// A round that gets no correlated response marks the peer disconnected
    /// and is not queued; the next tick tries again with a fresh snapshot.
    pub async fn sync(&self, peer: PeerId) -> Result<MergeReport, SyncError> {
        if peer == self.local {
            return Err(SyncError::SelfSync);
        }
        self.counters.rounds.fetch_add(1, Ordering::Relaxed);

        let result = self.round(peer).await;
        match &result {
            Ok(report) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .records_changed
                    .fetch_add((report.inserted + report.updated) as u64, Ordering::Relaxed);
                self.peers.record_sync(peer);
                info!(
                    node = %self.local,
                    peer = %peer,
                    inserted = report.inserted,
                    updated = report.updated,
                    "Sync completed"
                );
                self.events.publish(&BridgeEvent::SyncCompleted {
                    peer,
                    report: *report,
                });
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(node = %self.local, peer = %peer, error = %e, "Sync failed");
                if matches!(e, SyncError::Delivery(_)) {
                    self.router.mark_unreachable(peer);
                }
            }
        }
        result
    }

    async fn round(&self, peer: PeerId) -> Result<MergeReport, SyncError> {
        let snapshot = self.hooks.local_snapshot().map_err(SyncError::Snapshot)?;
        debug!(
            node = %self.local,
            peer = %peer,
            records = snapshot.record_count(),
            "Sending sync request"
        );

        let request = Message::new(self.local, peer, Payload::Sync(snapshot));
        let response = self.router.deliver(peer, &request).await?;

        match response.into_payload() {
            Payload::SyncResponse(remote) => self
                .hooks
                .apply_remote_snapshot(&remote)
                .map_err(SyncError::Merge),
            other => Err(SyncError::UnexpectedResponse(other.kind())),
        }
    }

    /// One round with every connected peer, in probing order
    pub async fn sync_connected(&self) -> Vec<(PeerId, Result<MergeReport, SyncError>)> {
        let mut results = Vec::new();
        for peer in self.peers.connected_peers() {
            results.push((peer, self.sync(peer).await));
        }
        results
    }

    pub fn stats(&self) -> ReconcileStats {
        ReconcileStats {
            rounds: self.counters.rounds.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            records_changed: self.counters.records_changed.load(Ordering::Relaxed),
        }
    }
}

// Peer Connection - Probing, reconnection and exponential backoff
//
// A probe is a PING through the router's adapters; a correlated PONG means
// reachable. Success marks the peer connected, drains its queue and runs a
// reconciliation round. Failure marks it disconnected and starts one
// backoff loop, which gives up after the policy's last attempt until the
// next full probing cycle.

use crate::events::{BridgeEvent, EventBus};
use crate::peer::{PeerId, PeerRegistry, RetryPolicy};
use crate::protocol::{Message, Payload};
use crate::sync::ReconciliationEngine;
use crate::transport::DeliveryRouter;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How a backoff loop ended
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryOutcome {
    /// Probes made by this loop
    pub attempts: u32,
    pub reconnected: bool,
    /// Another loop for this peer was already running
    pub skipped: bool,
    /// The node went offline while the loop was waiting
    pub went_offline: bool,
}

/// Health tracking and reconnection for every peer of one node
pub struct PeerConnection {
    local: PeerId,
    peers: Arc<PeerRegistry>,
    router: Arc<DeliveryRouter>,
    reconciler: Arc<ReconciliationEngine>,
    events: Arc<EventBus>,
    policy: RetryPolicy,
    online: Arc<AtomicBool>,
    retrying: Mutex<HashSet<PeerId>>,
}

impl PeerConnection {
    pub fn new(
        peers: Arc<PeerRegistry>,
        router: Arc<DeliveryRouter>,
        reconciler: Arc<ReconciliationEngine>,
        events: Arc<EventBus>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            local: peers.local(),
            peers,
            router,
            reconciler,
            events,
            policy,
            online: Arc::new(AtomicBool::new(true)),
            retrying: Mutex::new(HashSet::new()),
        }
    }

    /// Share the node's online switch; backoff loops stop while it is off
    pub fn with_online(mut self, online: Arc<AtomicBool>) -> Self {
        self.online = online;
        self
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn retrying(&self) -> MutexGuard<'_, HashSet<PeerId>> {
        self.retrying.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Whether a backoff loop is running for `peer`
    pub fn is_retrying(&self, peer: PeerId) -> bool {
        self.retrying().contains(&peer)
    }

    /// Send one PING; true when a correlated PONG came back
    pub async fn probe(&self, peer: PeerId) -> bool {
        let ping = Message::new(self.local, peer, Payload::Ping);
        match self.router.deliver(peer, &ping).await {
            Ok(response) => matches!(response.payload(), Payload::Pong),
            Err(e) => {
                debug!(node = %self.local, peer = %peer, error = %e, "Probe failed");
                false
            }
        }
    }

    /// Probe `peer` and update its state, without scheduling retries
    ///
    /// On success the queue is drained and a reconciliation round runs.
    pub async fn check(&self, peer: PeerId) -> bool {
        if peer == self.local || !self.peers.has_peer(peer) {
            return false;
        }

        if self.probe(peer).await {
            if self.peers.mark_connected(peer) {
                info!(node = %self.local, peer = %peer, "Connected to peer");
                self.events.publish(&BridgeEvent::PeerConnected { peer });
            }
            self.router.drain_queue(peer).await;
            // failure is logged and leaves the peer for the next tick
            let _ = self.reconciler.sync(peer).await;
            true
        } else {
            if self.peers.mark_disconnected(peer) {
                info!(node = %self.local, peer = %peer, "Peer disconnected");
                self.events.publish(&BridgeEvent::PeerDisconnected { peer });
            } else {
                debug!(node = %self.local, peer = %peer, "Peer still unreachable");
            }
            false
        }
    }

    /// Probe `peer`; on failure start a backoff loop in the background
    pub async fn connect(self: &Arc<Self>, peer: PeerId) -> bool {
        let connected = self.check(peer).await;
        if !connected && peer != self.local {
            self.schedule_retry(peer);
        }
        connected
    }

    /// Probe every other node in order; returns those now connected
    pub async fn connect_all(self: &Arc<Self>) -> Vec<PeerId> {
        let mut connected = Vec::new();
        for peer in self.local.others() {
            if self.connect(peer).await {
                connected.push(peer);
            }
        }
        connected
    }

    /// Spawn a backoff loop unless one is already running for `peer`
    pub fn schedule_retry(self: &Arc<Self>, peer: PeerId) -> Option<JoinHandle<RetryOutcome>> {
        if !self.is_online() || self.is_retrying(peer) || self.policy.max_attempts() == 0 {
            return None;
        }
        let this = Arc::clone(self);
        Some(tokio::spawn(async move { this.retry_with_backoff(peer).await }))
    }

    /// Re-probe after `base * 2^(n-1)` for n = 1..=max_attempts, stopping at
    /// the first success or when the node goes offline
    pub async fn retry_with_backoff(&self, peer: PeerId) -> RetryOutcome {
        let Some(_guard) = RetryGuard::acquire(self, peer) else {
            return RetryOutcome {
                skipped: true,
                ..RetryOutcome::default()
            };
        };

        let mut outcome = RetryOutcome::default();
        let mut attempt = 1;
        while let Some(delay) = self.policy.delay_for(attempt) {
            tokio::time::sleep(delay).await;
            if !self.is_online() {
                info!(node = %self.local, peer = %peer, "Offline, abandoning retries");
                outcome.went_offline = true;
                return outcome;
            }
            outcome.attempts = attempt;
            info!(
                node = %self.local,
                peer = %peer,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying connection"
            );

            if self.check(peer).await {
                outcome.reconnected = true;
                return outcome;
            }
            attempt += 1;
        }

        warn!(
            node = %self.local,
            peer = %peer,
            attempts = outcome.attempts,
            "Max retry attempts reached"
        );
        outcome
    }
}

struct RetryGuard<'a> {
    connection: &'a PeerConnection,
    peer: PeerId,
}

impl<'a> RetryGuard<'a> {
    fn acquire(connection: &'a PeerConnection, peer: PeerId) -> Option<Self> {
        connection
            .retrying()
            .insert(peer)
            .then_some(Self { connection, peer })
    }
}

impl Drop for RetryGuard<'_> {
    fn drop(&mut self) {
        self.connection.retrying().remove(&self.peer);
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("local", &self.local)
            .field("policy", &self.policy)
            .finish()
    }
}

// Delivery Router - Tries each adapter in priority order for one message
//
// The first adapter that yields a correlated response wins. When every
// adapter fails the message goes to the peer's outbound queue; callers only
// ever see "no response".

use crate::events::{BridgeEvent, EventBus, EventDispatcher};
use crate::peer::{PeerId, PeerRegistry};
use crate::protocol::Message;
use crate::queue::{Deliver, DrainReport, OutboundQueue};
use crate::transport::{Correlator, TransportAdapter, TransportError, TransportStats};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Every adapter failed for one message
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Peer {peer} unreachable: all {} adapter(s) failed", failures.len())]
    PeerUnreachable {
        peer: PeerId,
        /// Adapter name and error, in the order they were tried
        failures: Vec<(String, TransportError)>,
    },
}

impl DeliveryError {
    pub fn peer(&self) -> PeerId {
        match self {
            DeliveryError::PeerUnreachable { peer, .. } => *peer,
        }
    }
}

// ============================================================================
// DELIVERY ROUTER
// ============================================================================

/// Whichever side of an attempt finished first
enum First {
    Answered(Result<Message, TransportError>),
    Replied(Result<Message, TransportError>),
}

/// Ordered adapters plus the bookkeeping around each attempt
pub struct DeliveryRouter {
    local: PeerId,
    adapters: Vec<Arc<dyn TransportAdapter>>,
    adapter_timeout: Duration,
    correlator: Arc<Correlator>,
    peers: Arc<PeerRegistry>,
    queue: Arc<OutboundQueue>,
    dispatcher: Arc<EventDispatcher>,
    events: Arc<EventBus>,
    stats: Mutex<Vec<TransportStats>>,
}

impl DeliveryRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local: PeerId,
        adapters: Vec<Arc<dyn TransportAdapter>>,
        adapter_timeout: Duration,
        correlator: Arc<Correlator>,
        peers: Arc<PeerRegistry>,
        queue: Arc<OutboundQueue>,
        dispatcher: Arc<EventDispatcher>,
        events: Arc<EventBus>,
    ) -> Self {
        let stats = Mutex::new(vec![TransportStats::default(); adapters.len()]);
        Self {
            local,
            adapters,
            adapter_timeout,
            correlator,
            peers,
            queue,
            dispatcher,
            events,
            stats,
        }
    }

    fn stats_lock(&self) -> MutexGuard<'_, Vec<TransportStats>> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn local(&self) -> PeerId {
        self.local
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    pub fn adapter_timeout(&self) -> Duration {
        self.adapter_timeout
    }

    /// Adapter names in priority order
    pub fn adapter_names(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.name().to_string()).collect()
    }

    /// Per-adapter counters, in priority order
    pub fn stats(&self) -> Vec<(String, TransportStats)> {
        self.adapter_names()
            .into_iter()
            .zip(self.stats_lock().iter().cloned())
            .collect()
    }

    pub fn queue(&self) -> &Arc<OutboundQueue> {
        &self.queue
    }

    /// Send `message` to `peer`, queueing it when that is not possible
    ///
    /// Never fails: a disconnected peer or a full delivery failure both end
    /// with the message queued and `None` returned.
    pub async fn send(&self, peer: PeerId, message: Message) -> Option<Message> {
        if peer == self.local {
            warn!(node = %self.local, message_id = %message.id(), "Refusing to send a message to self");
            return None;
        }

        if !self.peers.is_connected(peer) {
            debug!(peer = %peer, message_id = %message.id(), "Peer disconnected, queueing");
            self.queue.enqueue(peer, message);
            return None;
        }

        match self.deliver(peer, &message).await {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(peer = %peer, message_id = %message.id(), error = %e, "Delivery failed, queueing");
                self.mark_unreachable(peer);
                self.queue.enqueue(peer, message);
                None
            }
        }
    }

    /// Try every adapter in order until one yields a correlated response
    ///
    /// Ignores connection state and never queues.
    pub async fn deliver(&self, peer: PeerId, message: &Message) -> Result<Message, DeliveryError> {
        let mut failures = Vec::new();

        for (index, adapter) in self.adapters.iter().enumerate() {
            let outcome = self.attempt(adapter.as_ref(), peer, message).await;
            {
                let mut stats = self.stats_lock();
                if let Some(entry) = stats.get_mut(index) {
                    entry.attempts += 1;
                    entry.record(&outcome);
                }
            }

            match outcome {
                Ok(response) => {
                    debug!(
                        peer = %peer,
                        adapter = adapter.name(),
                        message_id = %message.id(),
                        response = %response.kind(),
                        "Delivered"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    debug!(
                        peer = %peer,
                        adapter = adapter.name(),
                        message_id = %message.id(),
                        error = %e,
                        "Adapter attempt failed"
                    );
                    failures.push((adapter.name().to_string(), e));
                }
            }
        }

        Err(DeliveryError::PeerUnreachable { peer, failures })
    }

    /// One bounded attempt through one adapter
    ///
    /// The listener is registered before the request leaves, so a response
    /// arriving through the inbound path completes the attempt just as well
    /// as the adapter's own reply. A reply that answers something else is
    /// dispatched as an ordinary inbound message and the attempt keeps
    /// waiting until its deadline.
    async fn attempt(
        &self,
        adapter: &dyn TransportAdapter,
        peer: PeerId,
        message: &Message,
    ) -> Result<Message, TransportError> {
        let deadline = Instant::now() + self.adapter_timeout;
        let mut listener = self.correlator.listen(message.id().clone());

        let exchange = async {
            let first = tokio::select! {
                response = listener.wait() => First::Answered(response),
                reply = adapter.try_send(peer, message, self.adapter_timeout) => First::Replied(reply),
            };

            match first {
                First::Answered(response) => response,
                First::Replied(reply) => {
                    if let Some(unclaimed) = self.correlator.accept(reply?) {
                        debug!(
                            peer = %peer,
                            adapter = adapter.name(),
                            expected = %message.id(),
                            got = %unclaimed.id(),
                            "Uncorrelated reply, dispatching"
                        );
                        if self.dispatcher.dispatch(unclaimed).is_some() {
                            debug!(peer = %peer, "Discarding answer to an uncorrelated reply");
                        }
                    }
                    listener.wait().await
                }
            }
        };

        tokio::time::timeout_at(deadline, exchange)
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    /// Mark `peer` disconnected after a failed send or sync
    pub fn mark_unreachable(&self, peer: PeerId) {
        if self.peers.mark_disconnected(peer) {
            info!(peer = %peer, "Peer disconnected");
            self.events.publish(&BridgeEvent::PeerDisconnected { peer });
        }
    }

    /// Drain `peer`'s queue and announce what was dropped
    pub async fn drain_queue(&self, peer: PeerId) -> DrainReport {
        let report = self.queue.drain(peer, self).await;
        for entry in &report.dropped {
            self.events.publish(&BridgeEvent::MessageDropped {
                peer,
                message_id: entry.message.id().clone(),
                kind: entry.message.kind(),
                attempts: entry.attempts,
            });
        }
        report
    }
}

#[async_trait]
impl Deliver for DeliveryRouter {
    async fn deliver(&self, peer: PeerId, message: &Message) -> Result<Message, DeliveryError> {
        DeliveryRouter::deliver(self, peer, message).await
    }

    fn is_reachable(&self, peer: PeerId) -> bool {
        self.peers.is_connected(peer)
    }

    fn mark_unreachable(&self, peer: PeerId) {
        DeliveryRouter::mark_unreachable(self, peer)
    }
}

impl std::fmt::Debug for DeliveryRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryRouter")
            .field("local", &self.local)
            .field("adapters", &self.adapter_names())
            .field("adapter_timeout", &self.adapter_timeout)
            .finish()
    }
}

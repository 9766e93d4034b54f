// Bridge - One node's view of the mesh, as its hosting application sees it
//
// Owns the per-node context (registry, queue, correlator, dispatcher,
// router, reconciler, connection manager) so several nodes can live in one
// process. Background work runs on one interval task that holds only a
// weak handle to the node.

use crate::bridge::config::{BridgeConfig, ConfigError};
use crate::bridge::status::{BridgeStatus, PeerStatus, SyncOutcome};
use crate::events::{BridgeEvent, EventBus, EventDispatcher, SubscriptionId};
use crate::ledger::LedgerHooks;
use crate::peer::{PeerConnection, PeerId, PeerRegistry};
use crate::protocol::{Message, Payload};
use crate::queue::{OutboundQueue, QueuedMessage};
use crate::sync::ReconciliationEngine;
use crate::transport::{
    Correlator, DeliveryRouter, InboundHandler, MemoryHub, MemoryTransport, TcpTransport,
    TcpTransportConfig, TransportAdapter, TransportStats,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Errors constructing a bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("No ledger hooks configured")]
    MissingHooks,

    #[error("No transport adapters configured")]
    NoAdapters,
}

// ============================================================================
// BRIDGE BUILDER
// ============================================================================

/// Assembles a [`Bridge`] for one node
pub struct BridgeBuilder {
    local: PeerId,
    config: BridgeConfig,
    hooks: Option<Arc<dyn LedgerHooks>>,
    adapters: Vec<Arc<dyn TransportAdapter>>,
    hub: Option<Arc<MemoryHub>>,
}

impl BridgeBuilder {
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            config: BridgeConfig::default(),
            hooks: None,
            adapters: Vec::new(),
            hub: None,
        }
    }

    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn LedgerHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Append an adapter; adapters are tried in the order they were added
    pub fn with_adapter(mut self, adapter: Arc<dyn TransportAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Append an in-process adapter and attach this node to `hub` on build
    pub fn with_hub(mut self, hub: Arc<MemoryHub>) -> Self {
        self.adapters.push(Arc::new(MemoryTransport::new(hub.clone())));
        self.hub = Some(hub);
        self
    }

    /// Append a TCP adapter using the configured endpoints
    pub fn with_tcp(mut self) -> Self {
        let config = TcpTransportConfig::new().with_endpoints(self.config.endpoints.clone());
        self.adapters.push(Arc::new(TcpTransport::new(config)));
        self
    }

    pub fn build(self) -> Result<Bridge, BridgeError> {
        self.config.validate()?;
        let hooks = self.hooks.ok_or(BridgeError::MissingHooks)?;
        if self.adapters.is_empty() {
            return Err(BridgeError::NoAdapters);
        }

        let local = self.local;
        let config = self.config;
        let online = Arc::new(AtomicBool::new(true));
        let events = Arc::new(EventBus::new());
        let peers = Arc::new(PeerRegistry::new(local, &config.endpoints));
        let queue = Arc::new(OutboundQueue::new(config.retry_attempts));
        let correlator = Arc::new(Correlator::new());
        let dispatcher = Arc::new(EventDispatcher::new(local, hooks.clone(), events.clone()));
        let router = Arc::new(DeliveryRouter::new(
            local,
            self.adapters,
            config.adapter_timeout(),
            correlator.clone(),
            peers.clone(),
            queue.clone(),
            dispatcher.clone(),
            events.clone(),
        ));
        let reconciler = Arc::new(ReconciliationEngine::new(
            hooks.clone(),
            router.clone(),
            peers.clone(),
            events.clone(),
        ));
        let connection = Arc::new(
            PeerConnection::new(
                peers.clone(),
                router.clone(),
                reconciler.clone(),
                events.clone(),
                config.retry_policy(),
            )
            .with_online(online.clone()),
        );

        let bridge = Bridge {
            inner: Arc::new(BridgeInner {
                local,
                config,
                online,
                events,
                peers,
                queue,
                correlator,
                dispatcher,
                router,
                reconciler,
                connection,
                ticker: Mutex::new(None),
            }),
        };

        if let Some(hub) = self.hub {
            hub.attach(local, bridge.handler());
        }

        info!(node = %local, adapters = ?bridge.inner.router.adapter_names(), "Bridge created");
        Ok(bridge)
    }
}

// ============================================================================
// BRIDGE
// ============================================================================

struct BridgeInner {
    local: PeerId,
    config: BridgeConfig,
    online: Arc<AtomicBool>,
    events: Arc<EventBus>,
    peers: Arc<PeerRegistry>,
    queue: Arc<OutboundQueue>,
    correlator: Arc<Correlator>,
    dispatcher: Arc<EventDispatcher>,
    router: Arc<DeliveryRouter>,
    reconciler: Arc<ReconciliationEngine>,
    connection: Arc<PeerConnection>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeInner {
    fn ticker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.ticker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One background cycle: sync and drain healthy peers, probe the rest
    async fn tick(&self) {
        if !self.online.load(Ordering::SeqCst) {
            debug!(node = %self.local, "Offline, skipping tick");
            return;
        }

        for peer in self.peers.peer_ids() {
            if self.peers.is_connected(peer) {
                self.router.drain_queue(peer).await;
                let _ = self.reconciler.sync(peer).await;
            } else if !self.connection.is_retrying(peer) {
                self.connection.connect(peer).await;
            }
        }
    }
}

#[async_trait]
impl InboundHandler for BridgeInner {
    async fn on_message(&self, message: Message) -> Option<Message> {
        let unclaimed = self.correlator.accept(message)?;
        self.dispatcher.dispatch(unclaimed)
    }
}

/// Handle to one node's bridge; clones share the node
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    pub fn builder(local: PeerId) -> BridgeBuilder {
        BridgeBuilder::new(local)
    }

    pub fn local(&self) -> PeerId {
        self.inner.local
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Inbound side, for listeners and hubs; does not keep the node alive
    pub fn handler(&self) -> Weak<dyn InboundHandler> {
        let inner: Arc<dyn InboundHandler> = self.inner.clone();
        Arc::downgrade(&inner)
    }

    /// Connect to every peer, then start the background tick
    pub async fn init(&self) -> Vec<PeerId> {
        info!(node = %self.inner.local, "Initializing bridge");
        let connected = self.connect_all().await;
        self.start();
        connected
    }

    /// Start the background tick; does nothing if it is already running
    pub fn start(&self) {
        let mut ticker = self.inner.ticker();
        if ticker.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }

        let period = self.inner.config.sync_interval();
        let weak = Arc::downgrade(&self.inner);
        *ticker = Some(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.tick().await;
            }
        }));
        debug!(node = %self.inner.local, period_ms = period.as_millis() as u64, "Background tick started");
    }

    /// Stop the background tick
    pub fn shutdown(&self) {
        if let Some(handle) = self.inner.ticker().take() {
            handle.abort();
            info!(node = %self.inner.local, "Bridge shut down");
        }
    }

    /// Run one background cycle now
    pub async fn tick(&self) {
        self.inner.tick().await;
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Switch the node's network on or off
    ///
    /// Coming online reconnects every peer, which drains their queues.
    pub async fn set_online(&self, online: bool) {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            info!(node = %self.inner.local, "Back online");
            self.connect_all().await;
        } else if !online && was_online {
            warn!(node = %self.inner.local, "Network offline");
            self.inner.events.publish(&BridgeEvent::NetworkOffline);
        }
    }

    /// Probe every other node in order; returns those now connected
    pub async fn connect_all(&self) -> Vec<PeerId> {
        self.inner.connection.connect_all().await
    }

    /// Probe one peer; schedules backoff retries on failure
    pub async fn connect_peer(&self, peer: PeerId) -> bool {
        self.inner.connection.connect(peer).await
    }

    /// Send `payload` to `target`
    ///
    /// Returns the peer's response, or `None` when the message was queued
    /// (target disconnected, node offline, or every adapter failed). A send
    /// that loses the peer starts a backoff loop for it.
    pub async fn send_message(&self, target: PeerId, payload: Payload) -> Option<Message> {
        let message = Message::new(self.inner.local, target, payload);
        if !self.is_online() && target != self.inner.local {
            debug!(node = %self.inner.local, peer = %target, "Offline, queueing");
            self.inner.queue.enqueue(target, message);
            return None;
        }

        let was_connected = self.inner.peers.is_connected(target);
        let response = self.inner.router.send(target, message).await;
        if response.is_none() && was_connected && !self.inner.peers.is_connected(target) {
            self.inner.connection.schedule_retry(target);
        }
        response
    }

    /// Reconcile with every connected peer now
    pub async fn sync_now(&self) -> SyncOutcome {
        if !self.is_online() {
            return SyncOutcome::offline();
        }
        self.inner.reconciler.sync_connected().await;
        SyncOutcome::completed()
    }

    pub fn status(&self) -> BridgeStatus {
        let peers = self
            .inner
            .peers
            .all_states()
            .iter()
            .map(|state| {
                let queued = self.inner.queue.len(state.peer_id());
                (state.peer_id(), PeerStatus::from_state(state, queued))
            })
            .collect();

        BridgeStatus {
            is_online: self.is_online(),
            current_node_id: self.inner.local,
            peers,
            queue_depth: self.inner.queue.depth(),
            dropped: self.inner.queue.dropped_count(),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&BridgeEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    pub fn queue_len(&self, peer: PeerId) -> usize {
        self.inner.queue.len(peer)
    }

    pub fn queued_messages(&self, peer: PeerId) -> Vec<QueuedMessage> {
        self.inner.queue.messages(peer)
    }

    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.inner.peers.is_connected(peer)
    }

    /// Whether a backoff loop is running for `peer`
    pub fn is_retrying(&self, peer: PeerId) -> bool {
        self.inner.connection.is_retrying(peer)
    }

    /// Per-adapter counters, in priority order
    pub fn transport_stats(&self) -> Vec<(String, TransportStats)> {
        self.inner.router.stats()
    }
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("local", &self.inner.local)
            .field("online", &self.is_online())
            .field("queue_depth", &self.inner.queue.depth())
            .finish()
    }
}

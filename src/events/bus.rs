// Event Bus - Typed publish/subscribe for local notifications
//
// Publishing is synchronous fan-out: every callback registered at the time of
// the call runs before publish returns. Callbacks run outside the registry
// lock, so a callback may subscribe or unsubscribe.

use crate::ledger::{Account, BalanceUpdate, MergeReport, Transaction};
use crate::peer::PeerId;
use crate::protocol::{MessageId, MessageKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Notifications the bridge raises for its hosting application
#[derive(Clone, Debug, PartialEq)]
pub enum BridgeEvent {
    /// A probe to this peer succeeded after it was unreachable
    PeerConnected { peer: PeerId },
    /// A probe or send to this peer failed after it was reachable
    PeerDisconnected { peer: PeerId },
    /// The node was switched offline
    NetworkOffline,
    /// A pushed transaction was stored
    TransactionReceived { from: PeerId, transaction: Transaction },
    /// A pushed balance change was applied to an existing account
    BalanceUpdated { from: PeerId, update: BalanceUpdate },
    /// A pushed profile change was stored
    UserUpdated { from: PeerId, user: Account },
    /// A reconciliation round with a peer finished
    SyncCompleted { peer: PeerId, report: MergeReport },
    /// A queued message ran out of delivery attempts
    MessageDropped {
        peer: PeerId,
        message_id: MessageId,
        kind: MessageKind,
        attempts: u32,
    },
}

impl BridgeEvent {
    /// Stable event name, as the hosting applications listen for it
    pub fn name(&self) -> &'static str {
        match self {
            BridgeEvent::PeerConnected { .. } => "network-connection",
            BridgeEvent::PeerDisconnected { .. } => "peer-disconnection",
            BridgeEvent::NetworkOffline => "network-disconnection",
            BridgeEvent::TransactionReceived { .. } => "transaction-update",
            BridgeEvent::BalanceUpdated { .. } => "balance-update",
            BridgeEvent::UserUpdated { .. } => "user-update",
            BridgeEvent::SyncCompleted { .. } => "sync-completed",
            BridgeEvent::MessageDropped { .. } => "message-dropped",
        }
    }
}

/// Handle returned by subscribe, used to unsubscribe
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&BridgeEvent) + Send + Sync>;

/// Registry of event callbacks
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, Callback)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Callback)>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a callback for every future event
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&BridgeEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback; returns whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Deliver `event` to every subscriber; returns how many were called
    pub fn publish(&self, event: &BridgeEvent) -> usize {
        let callbacks: Vec<Callback> = self.lock().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in &callbacks {
            callback(event);
        }
        callbacks.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

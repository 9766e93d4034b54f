// In-Process Transport - Nodes sharing one process talk through a hub
//
// Stands in for the same-origin channels of co-hosted applications, and is
// what lets several simulated nodes run inside one test. The hub holds weak
// handles so a node that goes away simply becomes unreachable.

use crate::peer::PeerId;
use crate::protocol::Message;
use crate::transport::{InboundHandler, TransportAdapter, TransportError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::trace;

struct HubSlot {
    handler: Weak<dyn InboundHandler>,
    reachable: bool,
    delivered: u64,
}

/// Shared switchboard for nodes in one process
#[derive(Default)]
pub struct MemoryHub {
    slots: Mutex<HashMap<PeerId, HubSlot>>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PeerId, HubSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the inbound side of `peer`; replaces any earlier registration
    pub fn attach(&self, peer: PeerId, handler: Weak<dyn InboundHandler>) {
        self.lock().insert(
            peer,
            HubSlot {
                handler,
                reachable: true,
                delivered: 0,
            },
        );
    }

    pub fn detach(&self, peer: PeerId) {
        self.lock().remove(&peer);
    }

    /// Simulate `peer` dropping off or coming back
    pub fn set_reachable(&self, peer: PeerId, reachable: bool) {
        if let Some(slot) = self.lock().get_mut(&peer) {
            slot.reachable = reachable;
        }
    }

    pub fn is_reachable(&self, peer: PeerId) -> bool {
        self.lock()
            .get(&peer)
            .map(|slot| slot.reachable && slot.handler.strong_count() > 0)
            .unwrap_or(false)
    }

    /// Messages handed to `peer` so far
    pub fn delivered_count(&self, peer: PeerId) -> u64 {
        self.lock().get(&peer).map(|slot| slot.delivered).unwrap_or(0)
    }

    /// Hand `message` to its target and return the target's reply
    pub async fn deliver(&self, message: Message) -> Result<Option<Message>, TransportError> {
        let target = message.target();
        let handler = {
            let mut slots = self.lock();
            let slot = slots
                .get_mut(&target)
                .filter(|slot| slot.reachable)
                .ok_or(TransportError::Unreachable(target))?;
            let handler = slot
                .handler
                .upgrade()
                .ok_or(TransportError::Unreachable(target))?;
            slot.delivered += 1;
            handler
        };

        trace!(target = %target, message_id = %message.id(), "Hub delivering");
        Ok(handler.on_message(message).await)
    }
}

impl std::fmt::Debug for MemoryHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut peers: Vec<PeerId> = self.lock().keys().copied().collect();
        peers.sort();
        f.debug_struct("MemoryHub").field("peers", &peers).finish()
    }
}

// ============================================================================
// MEMORY TRANSPORT
// ============================================================================

/// Adapter delivering through a [`MemoryHub`]
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    hub: Arc<MemoryHub>,
}

impl MemoryTransport {
    pub fn new(hub: Arc<MemoryHub>) -> Self {
        Self { hub }
    }

    pub fn hub(&self) -> &Arc<MemoryHub> {
        &self.hub
    }
}

#[async_trait]
impl TransportAdapter for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn try_send(
        &self,
        peer: PeerId,
        message: &Message,
        timeout: Duration,
    ) -> Result<Message, TransportError> {
        if message.target() != peer {
            return Err(TransportError::SendFailed(format!(
                "message addressed to {}, not {}",
                message.target(),
                peer
            )));
        }

        tokio::time::timeout(timeout, self.hub.deliver(message.clone()))
            .await
            .map_err(|_| TransportError::Timeout)??
            .ok_or(TransportError::NoResponse)
    }
}

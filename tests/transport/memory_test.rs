// In-Process Transport Tests
// Tests for the hub switchboard and the memory adapter

use async_trait::async_trait;
use pilgrim_mesh::peer::PeerId;
use pilgrim_mesh::protocol::{Message, MessageKind, Payload};
use pilgrim_mesh::transport::{
    InboundHandler, MemoryHub, MemoryTransport, TransportAdapter, TransportError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Answers pings, stays silent on everything else
#[derive(Default)]
struct PingOnly {
    seen: AtomicUsize,
}

#[async_trait]
impl InboundHandler for PingOnly {
    async fn on_message(&self, message: Message) -> Option<Message> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        match message.payload() {
            Payload::Ping => Some(message.reply(Payload::Pong)),
            _ => None,
        }
    }
}

/// Takes a long time to answer
struct Sleepy;

#[async_trait]
impl InboundHandler for Sleepy {
    async fn on_message(&self, message: Message) -> Option<Message> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Some(message.reply(Payload::Pong))
    }
}

fn ping(to: PeerId) -> Message {
    Message::new(PeerId::MainBank, to, Payload::Ping)
}

const TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// HUB
// ============================================================================

#[tokio::test]
async fn test_hub_routes_by_target() {
    let hub = MemoryHub::new();
    let investment = Arc::new(PingOnly::default());
    let customer = Arc::new(PingOnly::default());
    let investment_handler: Arc<dyn InboundHandler> = investment.clone();
    let customer_handler: Arc<dyn InboundHandler> = customer.clone();
    hub.attach(PeerId::Investment, Arc::downgrade(&investment_handler));
    hub.attach(PeerId::Customer, Arc::downgrade(&customer_handler));

    let reply = hub.deliver(ping(PeerId::Customer)).await.unwrap().unwrap();

    assert_eq!(reply.kind(), MessageKind::Pong);
    assert_eq!(customer.seen.load(Ordering::SeqCst), 1);
    assert_eq!(investment.seen.load(Ordering::SeqCst), 0);
    assert_eq!(hub.delivered_count(PeerId::Customer), 1);
}

#[tokio::test]
async fn test_unknown_target_is_unreachable() {
    let hub = MemoryHub::new();
    assert_eq!(
        hub.deliver(ping(PeerId::Investment)).await,
        Err(TransportError::Unreachable(PeerId::Investment))
    );
}

#[tokio::test]
async fn test_reachability_toggles() {
    let hub = MemoryHub::new();
    let handler: Arc<dyn InboundHandler> = Arc::new(PingOnly::default());
    hub.attach(PeerId::Customer, Arc::downgrade(&handler));

    hub.set_reachable(PeerId::Customer, false);
    assert!(!hub.is_reachable(PeerId::Customer));
    assert!(hub.deliver(ping(PeerId::Customer)).await.is_err());
    assert_eq!(hub.delivered_count(PeerId::Customer), 0);

    hub.set_reachable(PeerId::Customer, true);
    assert!(hub.deliver(ping(PeerId::Customer)).await.is_ok());
}

#[tokio::test]
async fn test_detach_removes_node() {
    let hub = MemoryHub::new();
    let handler: Arc<dyn InboundHandler> = Arc::new(PingOnly::default());
    hub.attach(PeerId::Customer, Arc::downgrade(&handler));

    hub.detach(PeerId::Customer);

    assert!(!hub.is_reachable(PeerId::Customer));
}

// ============================================================================
// MEMORY TRANSPORT
// ============================================================================

#[tokio::test]
async fn test_memory_transport_round_trip() {
    let hub = MemoryHub::new();
    let handler: Arc<dyn InboundHandler> = Arc::new(PingOnly::default());
    hub.attach(PeerId::Investment, Arc::downgrade(&handler));
    let transport = MemoryTransport::new(hub);

    let msg = ping(PeerId::Investment);
    let reply = transport.try_send(PeerId::Investment, &msg, TIMEOUT).await.unwrap();

    assert_eq!(transport.name(), "memory");
    assert!(msg.is_answered_by(&reply));
}

#[tokio::test]
async fn test_silent_handler_means_no_response() {
    let hub = MemoryHub::new();
    let handler: Arc<dyn InboundHandler> = Arc::new(PingOnly::default());
    hub.attach(PeerId::Investment, Arc::downgrade(&handler));
    let transport = MemoryTransport::new(hub);

    let msg = Message::new(PeerId::MainBank, PeerId::Investment, Payload::Ack);
    assert_eq!(
        transport.try_send(PeerId::Investment, &msg, TIMEOUT).await,
        Err(TransportError::NoResponse)
    );
}

#[tokio::test]
async fn test_mismatched_target_rejected() {
    let hub = MemoryHub::new();
    let handler: Arc<dyn InboundHandler> = Arc::new(PingOnly::default());
    hub.attach(PeerId::Investment, Arc::downgrade(&handler));
    let transport = MemoryTransport::new(hub.clone());

    let result = transport.try_send(PeerId::Customer, &ping(PeerId::Investment), TIMEOUT).await;

    assert!(matches!(result, Err(TransportError::SendFailed(_))));
    assert_eq!(hub.delivered_count(PeerId::Investment), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_handler_times_out() {
    let hub = MemoryHub::new();
    let handler: Arc<dyn InboundHandler> = Arc::new(Sleepy);
    hub.attach(PeerId::Customer, Arc::downgrade(&handler));
    let transport = MemoryTransport::new(hub);

    let result = transport
        .try_send(PeerId::Customer, &ping(PeerId::Customer), Duration::from_millis(100))
        .await;

    assert_eq!(result, Err(TransportError::Timeout));
}

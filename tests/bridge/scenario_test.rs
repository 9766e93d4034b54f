// Bridge Scenario Tests
// Several nodes in one process over an in-process hub: store-and-forward,
// convergence, fallback to the queue, and the online switch

use pilgrim_mesh::bridge::{Bridge, BridgeConfig, BridgeError};
use pilgrim_mesh::events::BridgeEvent;
use pilgrim_mesh::ledger::{Account, MemoryLedger, Snapshot, Transaction};
use pilgrim_mesh::peer::PeerId;
use pilgrim_mesh::protocol::{Message, MessageKind, Payload};
use pilgrim_mesh::transport::{InboundHandler, MemoryHub, MockOutcome, MockTransport};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn config() -> BridgeConfig {
    BridgeConfig::in_process()
        .with_adapter_timeout_ms(500)
        .with_sync_interval_ms(200)
        // keep background retries out of the way
        .with_retry_base_delay_ms(60_000)
}

fn node(hub: &Arc<MemoryHub>, id: PeerId) -> (Bridge, Arc<MemoryLedger>) {
    let ledger = Arc::new(MemoryLedger::new());
    let bridge = Bridge::builder(id)
        .with_config(config())
        .with_hooks(ledger.clone())
        .with_hub(hub.clone())
        .build()
        .unwrap();
    (bridge, ledger)
}

fn record(bridge: &Bridge) -> Arc<Mutex<Vec<BridgeEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    bridge.subscribe(move |e| sink.lock().unwrap().push(e.clone()));
    events
}

fn tx(id: &str) -> Payload {
    Payload::Transaction(Transaction::new(id).with_field("amount", 10))
}

// ============================================================================
// STORE AND FORWARD
// ============================================================================

#[tokio::test]
async fn test_queued_transaction_delivered_on_reconnect() {
    let hub = MemoryHub::new();
    let (main, _) = node(&hub, PeerId::MainBank);
    let (customer, customer_ledger) = node(&hub, PeerId::Customer);
    let customer_events = record(&customer);

    hub.set_reachable(PeerId::Customer, false);
    assert!(!main.connect_peer(PeerId::Customer).await);

    assert!(main.send_message(PeerId::Customer, tx("42")).await.is_none());
    assert_eq!(main.queue_len(PeerId::Customer), 1);
    assert_eq!(main.queued_messages(PeerId::Customer)[0].attempts, 0);

    hub.set_reachable(PeerId::Customer, true);
    assert!(main.connect_peer(PeerId::Customer).await);

    assert_eq!(main.queue_len(PeerId::Customer), 0);
    assert!(customer_ledger.transaction("42").is_some());
    assert!(customer_events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, BridgeEvent::TransactionReceived { from: PeerId::MainBank, .. })));

    let status = main.status();
    let peer = status.peer(PeerId::Customer).unwrap();
    assert!(peer.connected);
    assert_eq!(peer.queued, 0);
    assert!(peer.last_sync_at.is_some());
}

#[tokio::test]
async fn test_connected_send_returns_ack() {
    let hub = MemoryHub::new();
    let (main, _) = node(&hub, PeerId::MainBank);
    let (_investment, investment_ledger) = node(&hub, PeerId::Investment);
    assert!(main.connect_peer(PeerId::Investment).await);

    let reply = main.send_message(PeerId::Investment, tx("7")).await.unwrap();

    assert_eq!(reply.kind(), MessageKind::Ack);
    assert!(investment_ledger.transaction("7").is_some());
}

#[tokio::test]
async fn test_dropped_node_becomes_unreachable() {
    let hub = MemoryHub::new();
    let (main, _) = node(&hub, PeerId::MainBank);
    {
        let (_customer, _) = node(&hub, PeerId::Customer);
        assert!(main.connect_peer(PeerId::Customer).await);
    }

    assert!(main.send_message(PeerId::Customer, tx("lost")).await.is_none());
    assert!(!main.is_connected(PeerId::Customer));
    assert_eq!(main.queue_len(PeerId::Customer), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lost_peer_is_retried_and_receives_queue() {
    let hub = MemoryHub::new();
    let (main, _) = node(&hub, PeerId::MainBank);
    let (_customer, customer_ledger) = node(&hub, PeerId::Customer);
    assert!(main.connect_peer(PeerId::Customer).await);

    hub.set_reachable(PeerId::Customer, false);
    assert!(main.send_message(PeerId::Customer, tx("late")).await.is_none());
    tokio::task::yield_now().await;
    assert!(main.is_retrying(PeerId::Customer));

    hub.set_reachable(PeerId::Customer, true);
    // first retry is due after the 60s base delay
    tokio::time::sleep(Duration::from_millis(60_100)).await;

    assert!(main.is_connected(PeerId::Customer));
    assert!(!main.is_retrying(PeerId::Customer));
    assert_eq!(main.queue_len(PeerId::Customer), 0);
    assert!(customer_ledger.transaction("late").is_some());
}

// ============================================================================
// CONVERGENCE
// ============================================================================

async fn converge(first: PeerId, second: PeerId) -> (Option<f64>, Option<f64>) {
    let hub = MemoryHub::new();
    let (main, main_ledger) = node(&hub, PeerId::MainBank);
    let (investment, investment_ledger) = node(&hub, PeerId::Investment);
    main_ledger.put_account(Account::new("alice").with_field("coinBalance", 10.0));
    investment_ledger.put_account(Account::new("alice").with_field("coinBalance", 20.0));

    for (from, to) in [(first, second), (second, first)] {
        let bridge = if from == PeerId::MainBank { &main } else { &investment };
        assert!(bridge.connect_peer(to).await);
    }

    (
        main_ledger.account("alice").unwrap().coin_balance(),
        investment_ledger.account("alice").unwrap().coin_balance(),
    )
}

#[tokio::test]
async fn test_nodes_converge_on_last_response() {
    // main pulls 20 first, then investment pulls main's (now 20)
    assert_eq!(
        converge(PeerId::MainBank, PeerId::Investment).await,
        (Some(20.0), Some(20.0))
    );
}

#[tokio::test]
async fn test_convergence_depends_on_sync_order() {
    assert_eq!(
        converge(PeerId::Investment, PeerId::MainBank).await,
        (Some(10.0), Some(10.0))
    );
}

#[tokio::test]
async fn test_sync_now_completes_when_online() {
    let hub = MemoryHub::new();
    let (main, _) = node(&hub, PeerId::MainBank);
    let (_customer, customer_ledger) = node(&hub, PeerId::Customer);
    customer_ledger.push_transaction(Transaction::new("c-1"));
    assert!(main.connect_peer(PeerId::Customer).await);
    let main_events = record(&main);

    let outcome = main.sync_now().await;

    assert!(outcome.success);
    assert_eq!(outcome.message, "Sync completed");
    assert!(main_events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, BridgeEvent::SyncCompleted { peer: PeerId::Customer, .. })));
}

// ============================================================================
// ADAPTER FALLBACK
// ============================================================================

#[tokio::test]
async fn test_all_adapters_failing_queues_message() {
    // the first adapter answers the probe and the sync round, then breaks
    let flaky = Arc::new(
        MockTransport::failing("flaky").with_script([MockOutcome::AutoRespond, MockOutcome::AutoRespond]),
    );
    let broken = Arc::new(MockTransport::failing("broken"));
    let main = Bridge::builder(PeerId::MainBank)
        .with_config(config())
        .with_hooks(Arc::new(MemoryLedger::new()))
        .with_adapter(flaky.clone())
        .with_adapter(broken.clone())
        .build()
        .unwrap();
    assert!(main.connect_peer(PeerId::Investment).await);
    let events = record(&main);

    assert!(main.send_message(PeerId::Investment, tx("99")).await.is_none());

    let queued = main.queued_messages(PeerId::Investment);
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].attempts, 0);
    assert!(!main.is_connected(PeerId::Investment));
    assert_eq!(flaky.call_count(), 3);
    assert_eq!(broken.call_count(), 1);
    assert!(events
        .lock()
        .unwrap()
        .contains(&BridgeEvent::PeerDisconnected { peer: PeerId::Investment }));

    let stats = main.transport_stats();
    assert_eq!(stats[0].0, "flaky");
    assert_eq!(stats[0].1.failures, 1);
    assert_eq!(stats[1].1.failures, 1);
}

// ============================================================================
// ONLINE SWITCH
// ============================================================================

#[tokio::test]
async fn test_offline_queues_and_online_drains() {
    let hub = MemoryHub::new();
    let (main, _) = node(&hub, PeerId::MainBank);
    let (_customer, customer_ledger) = node(&hub, PeerId::Customer);
    assert!(main.connect_peer(PeerId::Customer).await);
    let events = record(&main);

    main.set_online(false).await;
    assert!(!main.is_online());
    assert!(events.lock().unwrap().contains(&BridgeEvent::NetworkOffline));

    assert!(main.send_message(PeerId::Customer, tx("offline-1")).await.is_none());
    assert_eq!(main.queue_len(PeerId::Customer), 1);
    assert!(customer_ledger.transaction("offline-1").is_none());

    let outcome = main.sync_now().await;
    assert!(!outcome.success);
    assert_eq!(outcome.message, "Offline - messages queued");

    main.set_online(true).await;
    assert_eq!(main.queue_len(PeerId::Customer), 0);
    assert!(customer_ledger.transaction("offline-1").is_some());
}

#[tokio::test]
async fn test_tick_does_nothing_while_offline() {
    let hub = MemoryHub::new();
    let (main, _) = node(&hub, PeerId::MainBank);
    let (_customer, _) = node(&hub, PeerId::Customer);

    main.set_online(false).await;
    main.tick().await;

    assert!(!main.is_connected(PeerId::Customer));
    assert_eq!(hub.delivered_count(PeerId::Customer), 0);
}

#[tokio::test(start_paused = true)]
async fn test_background_tick_connects_peers() {
    let hub = MemoryHub::new();
    let (main, _) = node(&hub, PeerId::MainBank);
    let (_customer, _) = node(&hub, PeerId::Customer);

    main.start();
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert!(main.is_connected(PeerId::Customer));
    assert!(!main.is_connected(PeerId::Investment));
    main.shutdown();
}

// ============================================================================
// INBOUND DURING A PROBE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_inbound_responses_during_probe_keep_peer_state_consistent() {
    let adapter = Arc::new(MockTransport::new("m").with_script([MockOutcome::Hang]));
    let ledger = Arc::new(MemoryLedger::new());
    let main = Bridge::builder(PeerId::MainBank)
        .with_config(config())
        .with_hooks(ledger.clone())
        .with_adapter(adapter.clone())
        .build()
        .unwrap();

    let probing = {
        let main = main.clone();
        tokio::spawn(async move { main.connect_peer(PeerId::Investment).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let ping = adapter.sent()[0].clone();
    assert_eq!(ping.kind(), MessageKind::Ping);

    let handler = main.handler().upgrade().unwrap();

    // nobody is waiting on these, so they are dropped untouched
    let stray_sync = Message::new(
        PeerId::Investment,
        PeerId::MainBank,
        Payload::SyncResponse(Snapshot {
            users: vec![Account::new("mallory")],
            ..Snapshot::default()
        }),
    );
    let stray_pong = Message::new(PeerId::Investment, PeerId::MainBank, Payload::Pong);
    assert!(handler.on_message(stray_sync).await.is_none());
    assert!(handler.on_message(stray_pong).await.is_none());

    let status = main.status();
    let peer = status.peer(PeerId::Investment).unwrap();
    assert!(!peer.connected);
    assert!(peer.last_sync_at.is_none());
    assert!(ledger.account("mallory").is_none());

    // the PONG for the pending PING completes the probe
    assert!(handler.on_message(ping.reply(Payload::Pong)).await.is_none());
    assert!(probing.await.unwrap());

    let status = main.status();
    let peer = status.peer(PeerId::Investment).unwrap();
    assert!(peer.connected);
    assert!(peer.last_sync_at.is_some());
    assert!(!main.is_retrying(PeerId::Investment));
    assert!(ledger.account("mallory").is_none());
}

// ============================================================================
// STATUS AND CONSTRUCTION
// ============================================================================

#[tokio::test]
async fn test_status_serializes_camel_case() {
    let hub = MemoryHub::new();
    let (main, _) = node(&hub, PeerId::MainBank);

    let value = serde_json::to_value(main.status()).unwrap();

    assert_eq!(value["isOnline"], true);
    assert_eq!(value["currentNodeId"], "mainBank");
    assert_eq!(value["peers"]["customer"]["connected"], false);
    assert_eq!(value["queueDepth"], 0);
}

#[test]
fn test_builder_requires_hooks_and_adapters() {
    let hub = MemoryHub::new();

    let no_hooks = Bridge::builder(PeerId::Customer).with_hub(hub).build();
    assert!(matches!(no_hooks, Err(BridgeError::MissingHooks)));

    let no_adapters = Bridge::builder(PeerId::Customer)
        .with_hooks(Arc::new(MemoryLedger::new()))
        .build();
    assert!(matches!(no_adapters, Err(BridgeError::NoAdapters)));
}

#[test]
fn test_builder_rejects_invalid_config() {
    let result = Bridge::builder(PeerId::Customer)
        .with_config(BridgeConfig::new().with_adapter_timeout_ms(0))
        .with_hooks(Arc::new(MemoryLedger::new()))
        .with_adapter(Arc::new(MockTransport::new("m")))
        .build();

    assert!(matches!(result, Err(BridgeError::Config(_))));
}

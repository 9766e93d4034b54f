// Wire Envelope Tests
// Tests for the JSON envelope every transport carries

use pilgrim_mesh::ledger::{Account, BalanceUpdate, Snapshot, Transaction};
use pilgrim_mesh::peer::PeerId;
use pilgrim_mesh::protocol::{decode, encode, Message, MessageKind, Payload, ProtocolError};
use serde_json::{json, Value};

fn envelope(kind: &str, payload: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": "mainBank_1700000000000_a1b2c3d4e5f6",
        "type": kind,
        "sourcePeer": "mainBank",
        "targetPeer": "investment",
        "payload": payload,
        "timestamp": "2024-05-01T12:00:00.000Z"
    }))
    .unwrap()
}

// ============================================================================
// DECODING ENVELOPES FROM OTHER NODES
// ============================================================================

#[test]
fn test_decode_transaction_envelope() {
    let raw = envelope(
        "TRANSACTION",
        json!({ "id": "42", "from": "alice", "to": "bob", "amount": 250 }),
    );

    let msg = decode(&raw).unwrap();

    assert_eq!(msg.kind(), MessageKind::Transaction);
    assert_eq!(msg.source(), PeerId::MainBank);
    assert_eq!(msg.target(), PeerId::Investment);
    assert_eq!(msg.id().as_str(), "mainBank_1700000000000_a1b2c3d4e5f6");
    match msg.payload() {
        Payload::Transaction(tx) => {
            assert_eq!(tx.id, "42");
            assert_eq!(tx.field("amount"), Some(&json!(250)));
        }
        other => panic!("unexpected payload {:?}", other),
    }
}

#[test]
fn test_decode_partial_balance_update() {
    let raw = envelope("BALANCE_UPDATE", json!({ "username": "alice", "cashBalance": 12.5 }));

    let msg = decode(&raw).unwrap();

    assert_eq!(
        msg.payload(),
        &Payload::BalanceUpdate(BalanceUpdate::new("alice").with_cash_balance(12.5))
    );
}

#[test]
fn test_decode_sync_with_missing_collections() {
    let raw = envelope("SYNC", json!({ "users": [{ "username": "carol", "coinBalance": 3 }] }));

    let msg = decode(&raw).unwrap();

    match msg.into_payload() {
        Payload::Sync(snapshot) => {
            assert_eq!(snapshot.users.len(), 1);
            assert!(snapshot.transactions.is_empty());
            assert!(snapshot.investments.is_empty());
        }
        other => panic!("unexpected payload {:?}", other),
    }
}

#[test]
fn test_decode_ping_ignores_payload() {
    let raw = envelope("PING", Value::Null);
    assert_eq!(decode(&raw).unwrap().payload(), &Payload::Ping);
}

// ============================================================================
// REJECTED ENVELOPES
// ============================================================================

#[test]
fn test_unknown_kind_is_distinguished() {
    let raw = envelope("LOAN_REQUEST", json!({}));
    assert_eq!(
        decode(&raw).unwrap_err(),
        ProtocolError::UnknownKind("LOAN_REQUEST".to_string())
    );
}

#[test]
fn test_unknown_peer_rejected() {
    let raw = serde_json::to_vec(&json!({
        "id": "x",
        "type": "PING",
        "sourcePeer": "treasury",
        "targetPeer": "customer",
        "payload": {},
        "timestamp": "2024-05-01T12:00:00Z"
    }))
    .unwrap();

    assert_eq!(
        decode(&raw).unwrap_err(),
        ProtocolError::UnknownPeer("treasury".to_string())
    );
}

#[test]
fn test_malformed_payload_names_kind() {
    let raw = envelope("USER_UPDATE", json!({ "email": "no-username@example.com" }));
    match decode(&raw).unwrap_err() {
        ProtocolError::InvalidPayload { kind, .. } => assert_eq!(kind, MessageKind::UserUpdate),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_garbage_rejected() {
    assert!(matches!(
        decode(b"not json at all"),
        Err(ProtocolError::DeserializationFailed(_))
    ));
}

// ============================================================================
// ENCODING
// ============================================================================

#[test]
fn test_reply_keeps_request_id() {
    let request = Message::new(PeerId::Customer, PeerId::MainBank, Payload::Sync(Snapshot::default()));
    let mut snapshot = Snapshot::default();
    snapshot.users.push(Account::new("alice").with_field("coinBalance", 4.0));
    let reply = request.reply(Payload::SyncResponse(snapshot));

    let decoded = decode(&encode(&reply).unwrap()).unwrap();

    assert_eq!(decoded.id(), request.id());
    assert_eq!(decoded.source(), PeerId::MainBank);
    assert_eq!(decoded.target(), PeerId::Customer);
    assert!(request.is_answered_by(&decoded));
}

#[test]
fn test_encoded_account_fields_are_flat() {
    let msg = Message::new(
        PeerId::Investment,
        PeerId::Customer,
        Payload::UserUpdate(Account::new("dave").with_field("email", "dave@example.com")),
    );

    let value: Value = serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();

    assert_eq!(value["type"], "USER_UPDATE");
    assert_eq!(value["payload"]["username"], "dave");
    assert_eq!(value["payload"]["email"], "dave@example.com");
}

#[test]
fn test_transaction_survives_encoding() {
    let tx = Transaction::new("tx-9").with_field("amount", 99.5).with_field("memo", "rent");
    let msg = Message::new(PeerId::MainBank, PeerId::Customer, Payload::Transaction(tx));

    let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();

    assert_eq!(decoded, msg);
}

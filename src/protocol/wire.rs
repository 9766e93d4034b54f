// Wire Format - JSON envelope shared by every transport
//
// {"id", "type", "sourcePeer", "targetPeer", "payload", "timestamp"}
// The type is decoded before the payload so an unknown kind is reported as
// such instead of as a generic parse failure.

use crate::protocol::message::{Message, MessageId, MessageKind, Payload, ProtocolError};
use crate::peer::PeerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    source_peer: String,
    target_peer: String,
    #[serde(default)]
    payload: Value,
    timestamp: DateTime<Utc>,
}

fn payload_to_value(payload: &Payload) -> Result<Value, serde_json::Error> {
    match payload {
        Payload::Sync(snapshot) | Payload::SyncResponse(snapshot) => serde_json::to_value(snapshot),
        Payload::Transaction(tx) => serde_json::to_value(tx),
        Payload::BalanceUpdate(update) => serde_json::to_value(update),
        Payload::UserUpdate(user) => serde_json::to_value(user),
        Payload::Ping | Payload::Pong | Payload::Ack => Ok(Value::Object(Map::new())),
    }
}

fn payload_from_value(kind: MessageKind, value: Value) -> Result<Payload, ProtocolError> {
    let invalid = |e: serde_json::Error| ProtocolError::InvalidPayload {
        kind,
        reason: e.to_string(),
    };

    let payload = match kind {
        MessageKind::Sync => Payload::Sync(serde_json::from_value(value).map_err(invalid)?),
        MessageKind::SyncResponse => {
            Payload::SyncResponse(serde_json::from_value(value).map_err(invalid)?)
        }
        MessageKind::Transaction => {
            Payload::Transaction(serde_json::from_value(value).map_err(invalid)?)
        }
        MessageKind::BalanceUpdate => {
            Payload::BalanceUpdate(serde_json::from_value(value).map_err(invalid)?)
        }
        MessageKind::UserUpdate => {
            Payload::UserUpdate(serde_json::from_value(value).map_err(invalid)?)
        }
        MessageKind::Ping => Payload::Ping,
        MessageKind::Pong => Payload::Pong,
        MessageKind::Ack => Payload::Ack,
    };
    Ok(payload)
}

fn parse_peer(name: &str) -> Result<PeerId, ProtocolError> {
    name.parse()
        .map_err(|_| ProtocolError::UnknownPeer(name.to_string()))
}

/// Encode a message as a JSON envelope
pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let payload = payload_to_value(message.payload())
        .map_err(|e| ProtocolError::SerializationFailed(e.to_string()))?;

    let envelope = Envelope {
        id: message.id().to_string(),
        kind: message.kind().as_str().to_string(),
        source_peer: message.source().to_string(),
        target_peer: message.target().to_string(),
        payload,
        timestamp: message.created_at(),
    };

    serde_json::to_vec(&envelope).map_err(|e| ProtocolError::SerializationFailed(e.to_string()))
}

/// Decode a JSON envelope
pub fn decode(bytes: &[u8]) -> Result<Message, ProtocolError> {
    let envelope: Envelope = serde_json::from_slice(bytes)
        .map_err(|e| ProtocolError::DeserializationFailed(e.to_string()))?;

    let kind: MessageKind = envelope.kind.parse()?;
    let source = parse_peer(&envelope.source_peer)?;
    let target = parse_peer(&envelope.target_peer)?;
    let payload = payload_from_value(kind, envelope.payload)?;

    Ok(Message::from_parts(
        MessageId::from_string(envelope.id),
        source,
        target,
        payload,
        envelope.timestamp,
    ))
}

impl Message {
    /// Serialize to a JSON envelope
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    /// Deserialize from a JSON envelope
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

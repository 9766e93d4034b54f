// Protocol - Message types exchanged between nodes
//
// - Sync/SyncResponse: full snapshot exchange for reconciliation
// - Ping/Pong: reachability probe
// - Transaction/BalanceUpdate/UserUpdate: pushed record changes
// - Ack: delivery receipt for pushed changes

use crate::ledger::{Account, BalanceUpdate, Snapshot, Transaction};
use crate::peer::PeerId;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Unknown message kind: {0}")]
    UnknownKind(String),

    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: MessageKind, reason: String },

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),
}

// ============================================================================
// MESSAGE ID
// ============================================================================

/// Correlation key for a request and its response
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Fresh id: `<source>_<unix millis>_<random hex>`
    pub fn generate(source: PeerId) -> Self {
        let mut nonce = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self(format!(
            "{}_{}_{}",
            source,
            Utc::now().timestamp_millis(),
            hex::encode(nonce)
        ))
    }

    /// Wrap an id received from the wire
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// MESSAGE KIND
// ============================================================================

/// Types of messages in the protocol
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Sync,
    SyncResponse,
    Ping,
    Pong,
    Transaction,
    BalanceUpdate,
    UserUpdate,
    Ack,
}

impl MessageKind {
    /// Wire name (`type` field of the envelope)
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Sync => "SYNC",
            MessageKind::SyncResponse => "SYNC_RESPONSE",
            MessageKind::Ping => "PING",
            MessageKind::Pong => "PONG",
            MessageKind::Transaction => "TRANSACTION",
            MessageKind::BalanceUpdate => "BALANCE_UPDATE",
            MessageKind::UserUpdate => "USER_UPDATE",
            MessageKind::Ack => "ACK",
        }
    }

    /// Whether this kind answers a request rather than starting one
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            MessageKind::SyncResponse | MessageKind::Pong | MessageKind::Ack
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SYNC" => Ok(MessageKind::Sync),
            "SYNC_RESPONSE" => Ok(MessageKind::SyncResponse),
            "PING" => Ok(MessageKind::Ping),
            "PONG" => Ok(MessageKind::Pong),
            "TRANSACTION" => Ok(MessageKind::Transaction),
            "BALANCE_UPDATE" => Ok(MessageKind::BalanceUpdate),
            "USER_UPDATE" => Ok(MessageKind::UserUpdate),
            "ACK" => Ok(MessageKind::Ack),
            other => Err(ProtocolError::UnknownKind(other.to_string())),
        }
    }
}

// ============================================================================
// PAYLOAD
// ============================================================================

/// Kind-specific content of a message
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Sync(Snapshot),
    SyncResponse(Snapshot),
    Ping,
    Pong,
    Transaction(Transaction),
    BalanceUpdate(BalanceUpdate),
    UserUpdate(Account),
    Ack,
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::Sync(_) => MessageKind::Sync,
            Payload::SyncResponse(_) => MessageKind::SyncResponse,
            Payload::Ping => MessageKind::Ping,
            Payload::Pong => MessageKind::Pong,
            Payload::Transaction(_) => MessageKind::Transaction,
            Payload::BalanceUpdate(_) => MessageKind::BalanceUpdate,
            Payload::UserUpdate(_) => MessageKind::UserUpdate,
            Payload::Ack => MessageKind::Ack,
        }
    }
}

// ============================================================================
// MESSAGE
// ============================================================================

/// One message between two nodes; immutable once created
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    id: MessageId,
    source: PeerId,
    target: PeerId,
    payload: Payload,
    created_at: DateTime<Utc>,
}

impl Message {
    /// Create a new request with a fresh id
    pub fn new(source: PeerId, target: PeerId, payload: Payload) -> Self {
        Self {
            id: MessageId::generate(source),
            source,
            target,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Rebuild a message from decoded parts
    pub fn from_parts(
        id: MessageId,
        source: PeerId,
        target: PeerId,
        payload: Payload,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            source,
            target,
            payload,
            created_at,
        }
    }

    /// Answer this message: same id, direction reversed
    pub fn reply(&self, payload: Payload) -> Self {
        Self {
            id: self.id.clone(),
            source: self.target,
            target: self.source,
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    pub fn source(&self) -> PeerId {
        self.source
    }

    pub fn target(&self) -> PeerId {
        self.target
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether `other` answers this message
    pub fn is_answered_by(&self, other: &Message) -> bool {
        other.id == self.id && other.kind().is_response()
    }
}

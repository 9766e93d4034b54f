// Transport Traits and Core Types
// The adapter capability every transport implements, and the inbound side

use crate::peer::PeerId;
use crate::protocol::{Message, MessageId, ProtocolError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// TRANSPORT ERRORS
// ============================================================================

/// Why a single delivery attempt through one adapter failed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Attempt timed out")]
    Timeout,

    #[error("Peer {0} unreachable")]
    Unreachable(PeerId),

    #[error("No usable endpoint for {0}")]
    UnsupportedEndpoint(PeerId),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Peer closed without answering")]
    NoResponse,

    #[error("Reply did not match request {0}")]
    Uncorrelated(MessageId),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    IoError(String),
}

impl TransportError {
    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Check if this is a connection-related error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_) | Self::ConnectionFailed(_) | Self::UnsupportedEndpoint(_)
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

// ============================================================================
// TRANSPORT STATISTICS
// ============================================================================

/// Outcome counters for one adapter, kept by the router
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStats {
    /// Attempts started
    pub attempts: u64,
    /// Attempts that produced a correlated response
    pub successes: u64,
    /// Attempts that failed for any reason other than a timeout
    pub failures: u64,
    /// Attempts that hit the per-attempt timeout
    pub timeouts: u64,
}

impl TransportStats {
    pub(crate) fn record(&mut self, outcome: &Result<Message, TransportError>) {
        match outcome {
            Ok(_) => self.successes += 1,
            Err(e) if e.is_timeout() => self.timeouts += 1,
            Err(_) => self.failures += 1,
        }
    }
}

// ============================================================================
// TRANSPORT TRAITS
// ============================================================================

/// One way of carrying a message to a peer
///
/// `try_send` performs a single attempt: it hands `message` to `peer` and
/// returns whatever the peer answered on the same exchange. The router
/// enforces `timeout` around the call as well, so an adapter that overruns
/// is abandoned, but adapters should honor it for their own I/O.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Short name for logs and statistics
    fn name(&self) -> &str;

    async fn try_send(
        &self,
        peer: PeerId,
        message: &Message,
        timeout: Duration,
    ) -> Result<Message, TransportError>;
}

/// Receiving side of a node: every inbound message, from any adapter, ends here
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Handle one message; the returned reply travels back on the same exchange
    async fn on_message(&self, message: Message) -> Option<Message>;
}

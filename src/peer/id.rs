// Peer Identity - The three nodes of the mesh and how to reach them

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from parsing peer identifiers or endpoints
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerIdError {
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

// ============================================================================
// PEER ID
// ============================================================================

/// One of the three independently persisted applications
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeerId {
    MainBank,
    Investment,
    Customer,
}

impl PeerId {
    /// Every node, in probing order
    pub const ALL: [PeerId; 3] = [PeerId::MainBank, PeerId::Investment, PeerId::Customer];

    /// Wire name used in envelopes and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerId::MainBank => "mainBank",
            PeerId::Investment => "investment",
            PeerId::Customer => "customer",
        }
    }

    /// All nodes except this one, in probing order
    pub fn others(&self) -> Vec<PeerId> {
        Self::ALL.iter().copied().filter(|p| p != self).collect()
    }

    /// Port the original deployment served each application on
    pub fn default_port(&self) -> u16 {
        match self {
            PeerId::MainBank => 8081,
            PeerId::Investment => 8082,
            PeerId::Customer => 8083,
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainBank" | "main-bank" | "main_bank" => Ok(PeerId::MainBank),
            "investment" => Ok(PeerId::Investment),
            "customer" => Ok(PeerId::Customer),
            other => Err(PeerIdError::UnknownPeer(other.to_string())),
        }
    }
}

// ============================================================================
// PEER ENDPOINT
// ============================================================================

/// Opaque descriptor of where a peer can be reached
///
/// The router never interprets it; each adapter picks out the variants it
/// understands and fails the attempt for the rest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PeerEndpoint {
    /// TCP/IP address
    Tcp { host: String, port: u16 },
    /// Reachable through an in-process hub
    InProcess,
}

impl PeerEndpoint {
    /// Create a TCP endpoint
    pub fn tcp(host: &str, port: u16) -> Self {
        Self::Tcp {
            host: host.to_string(),
            port,
        }
    }

    /// Endpoint used when configuration names none
    pub fn default_for(peer: PeerId) -> Self {
        Self::tcp("127.0.0.1", peer.default_port())
    }

    pub fn is_tcp(&self) -> bool {
        matches!(self, Self::Tcp { .. })
    }

    pub fn is_in_process(&self) -> bool {
        matches!(self, Self::InProcess)
    }

    /// `host:port` for TCP endpoints
    pub fn socket_addr(&self) -> Option<String> {
        match self {
            Self::Tcp { host, port } => Some(format!("{}:{}", host, port)),
            Self::InProcess => None,
        }
    }
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            Self::InProcess => f.write_str("inproc"),
        }
    }
}

impl FromStr for PeerEndpoint {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "inproc" {
            return Ok(Self::InProcess);
        }

        let addr = s.strip_prefix("tcp://").unwrap_or(s);
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| PeerIdError::InvalidEndpoint(s.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| PeerIdError::InvalidEndpoint(s.to_string()))?;
        if host.is_empty() {
            return Err(PeerIdError::InvalidEndpoint(s.to_string()));
        }
        Ok(Self::tcp(host, port))
    }
}

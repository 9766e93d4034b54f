// Bridge Status - What collaborators can observe about a node

use crate::peer::{PeerId, PeerState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Health of one peer as seen from this node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatus {
    pub connected: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Messages waiting for this peer
    pub queued: usize,
}

impl PeerStatus {
    pub(crate) fn from_state(state: &PeerState, queued: usize) -> Self {
        Self {
            connected: state.is_connected(),
            last_sync_at: state.last_sync_at(),
            queued,
        }
    }
}

/// Snapshot of a node's bridge
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub is_online: bool,
    pub current_node_id: PeerId,
    pub peers: BTreeMap<PeerId, PeerStatus>,
    /// Messages waiting across all peers
    pub queue_depth: usize,
    /// Messages dropped after exhausting their attempts
    pub dropped: u64,
}

impl BridgeStatus {
    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.peers
            .iter()
            .filter(|(_, s)| s.connected)
            .map(|(p, _)| *p)
            .collect()
    }

    pub fn peer(&self, peer: PeerId) -> Option<&PeerStatus> {
        self.peers.get(&peer)
    }
}

/// Result of a manual sync request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub success: bool,
    pub message: String,
}

impl SyncOutcome {
    pub(crate) fn completed() -> Self {
        Self {
            success: true,
            message: "Sync completed".to_string(),
        }
    }

    pub(crate) fn offline() -> Self {
        Self {
            success: false,
            message: "Offline - messages queued".to_string(),
        }
    }
}

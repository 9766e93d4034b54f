// Peer Registry - Health of every remote node
//
// One PeerState per remote peer for the whole process lifetime.
// Every mutation is a single locked step so an inbound handler that runs
// while a probe is suspended can never observe a half-applied update.

use crate::peer::{PeerEndpoint, PeerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Peer-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("Cannot register the local node as a peer")]
    CannotAddSelf,

    #[error("Peer not found: {0}")]
    PeerNotFound(PeerId),
}

/// Health of one remote peer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerState {
    peer_id: PeerId,
    connected: bool,
    last_sync_at: Option<DateTime<Utc>>,
    endpoint: PeerEndpoint,
}

impl PeerState {
    /// A peer starts out disconnected and never synced
    pub fn new(peer_id: PeerId, endpoint: PeerEndpoint) -> Self {
        Self {
            peer_id,
            connected: false,
            last_sync_at: None,
            endpoint,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Advisory only: a past probe succeeded, future sends may still fail
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        self.last_sync_at
    }

    pub fn endpoint(&self) -> &PeerEndpoint {
        &self.endpoint
    }
}

/// Counts by health
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub total_peers: usize,
    pub connected_peers: usize,
    pub disconnected_peers: usize,
}

/// Registry of the remote peers of one node
#[derive(Debug)]
pub struct PeerRegistry {
    local: PeerId,
    peers: Mutex<HashMap<PeerId, PeerState>>,
}

impl PeerRegistry {
    /// Create a registry holding every peer except `local`
    ///
    /// Peers missing from `endpoints` get their default endpoint.
    pub fn new(local: PeerId, endpoints: &BTreeMap<PeerId, PeerEndpoint>) -> Self {
        let peers = local
            .others()
            .into_iter()
            .map(|peer| {
                let endpoint = endpoints
                    .get(&peer)
                    .cloned()
                    .unwrap_or_else(|| PeerEndpoint::default_for(peer));
                (peer, PeerState::new(peer, endpoint))
            })
            .collect();

        Self {
            local,
            peers: Mutex::new(peers),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PeerId, PeerState>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The node this registry belongs to
    pub fn local(&self) -> PeerId {
        self.local
    }

    pub fn peer_count(&self) -> usize {
        self.lock().len()
    }

    pub fn has_peer(&self, peer: PeerId) -> bool {
        self.lock().contains_key(&peer)
    }

    /// Copy of a peer's current state
    pub fn state(&self, peer: PeerId) -> Option<PeerState> {
        self.lock().get(&peer).cloned()
    }

    /// Whether the last health observation for `peer` was a success
    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.lock().get(&peer).map(|p| p.connected).unwrap_or(false)
    }

    pub fn endpoint(&self, peer: PeerId) -> Option<PeerEndpoint> {
        self.lock().get(&peer).map(|p| p.endpoint.clone())
    }

    /// Replace the endpoint of a peer
    pub fn set_endpoint(&self, peer: PeerId, endpoint: PeerEndpoint) -> Result<(), PeerError> {
        if peer == self.local {
            return Err(PeerError::CannotAddSelf);
        }
        let mut peers = self.lock();
        let state = peers.get_mut(&peer).ok_or(PeerError::PeerNotFound(peer))?;
        state.endpoint = endpoint;
        Ok(())
    }

    /// Probe succeeded: connected, and the sync clock restarts now
    ///
    /// Returns true when this is a Disconnected → Connected transition.
    pub fn mark_connected(&self, peer: PeerId) -> bool {
        let mut peers = self.lock();
        match peers.get_mut(&peer) {
            Some(state) => {
                let was_connected = state.connected;
                state.connected = true;
                state.last_sync_at = Some(Utc::now());
                !was_connected
            }
            None => false,
        }
    }

    /// Probe or send failed
    ///
    /// Returns true when this is a Connected → Disconnected transition.
    pub fn mark_disconnected(&self, peer: PeerId) -> bool {
        let mut peers = self.lock();
        match peers.get_mut(&peer) {
            Some(state) => {
                let was_connected = state.connected;
                state.connected = false;
                was_connected
            }
            None => false,
        }
    }

    /// Record a completed reconciliation
    pub fn record_sync(&self, peer: PeerId) {
        if let Some(state) = self.lock().get_mut(&peer) {
            state.last_sync_at = Some(Utc::now());
        }
    }

    /// Peers currently believed reachable, in probing order
    pub fn connected_peers(&self) -> Vec<PeerId> {
        let peers = self.lock();
        PeerId::ALL
            .iter()
            .copied()
            .filter(|p| peers.get(p).map(|s| s.connected).unwrap_or(false))
            .collect()
    }

    /// Every remote peer, in probing order
    pub fn peer_ids(&self) -> Vec<PeerId> {
        let peers = self.lock();
        PeerId::ALL
            .iter()
            .copied()
            .filter(|p| peers.contains_key(p))
            .collect()
    }

    /// Copy of every peer state, in probing order
    pub fn all_states(&self) -> Vec<PeerState> {
        let peers = self.lock();
        PeerId::ALL
            .iter()
            .filter_map(|p| peers.get(p).cloned())
            .collect()
    }

    pub fn stats(&self) -> PeerStats {
        let peers = self.lock();
        let connected = peers.values().filter(|p| p.connected).count();
        PeerStats {
            total_peers: peers.len(),
            connected_peers: connected,
            disconnected_peers: peers.len() - connected,
        }
    }
}

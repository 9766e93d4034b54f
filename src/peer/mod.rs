// Peer module - WHO WE TALK TO
// Peer identity, per-peer health, reconnection backoff and probing

mod connection;
mod id;
mod registry;
mod retry;

pub use connection::{PeerConnection, RetryOutcome};
pub use id::{PeerEndpoint, PeerId, PeerIdError};
pub use registry::{PeerError, PeerRegistry, PeerState, PeerStats};
pub use retry::RetryPolicy;

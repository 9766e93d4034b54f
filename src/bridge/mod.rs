// Bridge module - THE FACADE
// Per-node wiring, configuration, status, and the background tick

mod config;
mod node;
mod status;

pub use config::{BridgeConfig, ConfigError};
pub use node::{Bridge, BridgeBuilder, BridgeError};
pub use status::{BridgeStatus, PeerStatus, SyncOutcome};

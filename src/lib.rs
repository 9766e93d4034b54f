// pilgrim-mesh: keeps three independently persisted account ledgers
// eventually consistent without a central broker.
//
// Each node runs a `Bridge` that pushes record changes to its peers,
// queues what cannot be delivered, and periodically exchanges full
// snapshots so every node converges on the same accounts, transactions
// and investor profiles.

pub mod bridge;
pub mod events;
pub mod ledger;
pub mod peer;
pub mod protocol;
pub mod queue;
pub mod storage;
pub mod sync;
pub mod transport;

pub use bridge::{Bridge, BridgeBuilder, BridgeConfig, BridgeError, BridgeStatus, SyncOutcome};
pub use events::{BridgeEvent, SubscriptionId};
pub use ledger::{Account, BalanceUpdate, InvestorProfile, LedgerHooks, MemoryLedger, Snapshot, Transaction};
pub use peer::{PeerEndpoint, PeerId};
pub use protocol::{Message, MessageKind, Payload};
pub use storage::LedgerStore;

// Storage module - PERSISTENCE
// sled-backed shared-record store implementing the ledger hooks

mod store;

pub use store::{LedgerStore, StorageStats, StoreError};

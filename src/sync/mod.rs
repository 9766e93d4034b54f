// Sync module - HOW NODES CONVERGE
// Periodic full-snapshot reconciliation between peers

mod reconcile;

pub use reconcile::{ReconcileStats, ReconciliationEngine, SyncError};

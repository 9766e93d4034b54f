// Ledger Hooks - The seam between the bridge and a hosting application
//
// The bridge never touches a store directly; it reads and writes shared
// records only through these calls.

use crate::ledger::merge::MergeReport;
use crate::ledger::records::{Account, BalanceUpdate, Snapshot, Transaction};
use crate::storage::StoreError;

/// Store operations a hosting application exposes to the bridge
///
/// Every apply operation must be idempotent: delivery is at-least-once.
pub trait LedgerHooks: Send + Sync {
    /// Export every shared record
    fn local_snapshot(&self) -> Result<Snapshot, StoreError>;

    /// Merge a peer's snapshot (keyed upsert, append-only transactions)
    fn apply_remote_snapshot(&self, snapshot: &Snapshot) -> Result<MergeReport, StoreError>;

    /// Upsert one transaction by id into every local transaction mirror
    fn apply_transaction(&self, transaction: &Transaction) -> Result<MergeReport, StoreError>;

    /// Overwrite the balances present in `update`
    ///
    /// Returns false when no account has that username.
    fn apply_balance_update(&self, update: &BalanceUpdate) -> Result<bool, StoreError>;

    /// Upsert profile fields by username
    fn apply_user_update(&self, user: &Account) -> Result<MergeReport, StoreError>;
}

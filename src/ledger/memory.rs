// Memory Ledger - In-process collaborator store
//
// Holds the shared records of one simulated application. Used by the
// `simulate` command and by tests that run several nodes in one process.

use crate::ledger::hooks::LedgerHooks;
use crate::ledger::merge::{merge_snapshot, replace_record, upsert_record, MergeReport};
use crate::ledger::records::{Account, BalanceUpdate, InvestorProfile, Snapshot, Transaction};
use crate::storage::StoreError;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Shared records of one node, kept in memory
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: Mutex<Snapshot>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing set of records
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            records: Mutex::new(snapshot),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of every record
    pub fn snapshot(&self) -> Snapshot {
        self.lock().clone()
    }

    pub fn account(&self, username: &str) -> Option<Account> {
        self.lock().users.iter().find(|a| a.username == username).cloned()
    }

    pub fn transaction(&self, id: &str) -> Option<Transaction> {
        self.lock().transactions.iter().find(|t| t.id == id).cloned()
    }

    pub fn investor(&self, username: &str) -> Option<InvestorProfile> {
        self.lock()
            .investments
            .iter()
            .find(|i| i.username == username)
            .cloned()
    }

    pub fn transaction_count(&self) -> usize {
        self.lock().transactions.len()
    }

    /// Local write by the hosting application: insert or replace an account
    pub fn put_account(&self, account: Account) {
        let mut records = self.lock();
        match records.users.iter_mut().find(|a| a.username == account.username) {
            Some(existing) => *existing = account,
            None => records.users.push(account),
        }
    }

    /// Local write by the hosting application: insert or replace an investor
    pub fn put_investor(&self, investor: InvestorProfile) {
        let mut records = self.lock();
        match records
            .investments
            .iter_mut()
            .find(|i| i.username == investor.username)
        {
            Some(existing) => *existing = investor,
            None => records.investments.push(investor),
        }
    }

    /// Local write by the hosting application: record a transaction
    pub fn push_transaction(&self, transaction: Transaction) {
        let mut records = self.lock();
        if !records.transactions.iter().any(|t| t.id == transaction.id) {
            records.transactions.push(transaction);
        }
    }
}

impl LedgerHooks for MemoryLedger {
    fn local_snapshot(&self) -> Result<Snapshot, StoreError> {
        Ok(self.snapshot())
    }

    fn apply_remote_snapshot(&self, snapshot: &Snapshot) -> Result<MergeReport, StoreError> {
        Ok(merge_snapshot(&mut self.lock(), snapshot))
    }

    fn apply_transaction(&self, transaction: &Transaction) -> Result<MergeReport, StoreError> {
        replace_record(&mut self.lock().transactions, transaction)
    }

    fn apply_balance_update(&self, update: &BalanceUpdate) -> Result<bool, StoreError> {
        let mut records = self.lock();
        match records.users.iter_mut().find(|a| a.username == update.username) {
            Some(account) => {
                account.apply_balance(update);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn apply_user_update(&self, user: &Account) -> Result<MergeReport, StoreError> {
        upsert_record(&mut self.lock().users, user)
    }
}

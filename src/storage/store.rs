// LedgerStore - Persistent collaborator store using sled
//
// One tree per record kind:
// - users: accounts keyed by username
// - transactions: append-only, keyed by transaction id
// - investments: investor profiles keyed by username
// Values are the records' JSON encoding.

use crate::ledger::{
    append_records, replace_record, upsert_record, upsert_records, Account, BalanceUpdate,
    InvestorProfile, LedgerHooks, MergeReport, RecordCollection, SharedRecord, Snapshot,
    Transaction,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::Path;
use thiserror::Error;

/// Tree names
mod trees {
    pub const USERS: &str = "users";
    pub const TRANSACTIONS: &str = "transactions";
    pub const INVESTMENTS: &str = "investments";
}

/// Errors from store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    OpenFailed(String),

    #[error("Database operation failed: {0}")]
    DatabaseError(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Flush failed: {0}")]
    FlushFailed(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::DatabaseError(err.to_string())
    }
}

/// Statistics about the storage
#[derive(Clone, Debug)]
pub struct StorageStats {
    pub users: usize,
    pub transactions: usize,
    pub investments: usize,
    /// Approximate disk size in bytes
    pub disk_size_bytes: u64,
}

/// Typed view over one sled tree
struct TreeCollection<'a, T> {
    tree: &'a sled::Tree,
    _record: PhantomData<T>,
}

impl<'a, T> TreeCollection<'a, T> {
    fn new(tree: &'a sled::Tree) -> Self {
        Self {
            tree,
            _record: PhantomData,
        }
    }
}

impl<T> RecordCollection<T> for TreeCollection<'_, T>
where
    T: SharedRecord + Serialize + DeserializeOwned,
{
    fn find(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&mut self, record: T) -> Result<(), StoreError> {
        let bytes = encode(&record)?;
        self.tree.insert(record.key().as_bytes(), bytes)?;
        Ok(())
    }
}

fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(record).map_err(|e| StoreError::SerializationFailed(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::DeserializationFailed(e.to_string()))
}

/// Persistent shared-record store for one node
///
/// Uses sled for crash-safe, embedded storage.
pub struct LedgerStore {
    db: sled::Db,
    users: sled::Tree,
    transactions: sled::Tree,
    investments: sled::Tree,
}

impl LedgerStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Self::from_db(db)
    }

    /// Store backed by a throwaway database
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let users = db.open_tree(trees::USERS)?;
        let transactions = db.open_tree(trees::TRANSACTIONS)?;
        let investments = db.open_tree(trees::INVESTMENTS)?;
        Ok(Self {
            db,
            users,
            transactions,
            investments,
        })
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::FlushFailed(e.to_string()))?;
        Ok(())
    }

    pub fn stats(&self) -> Result<StorageStats, StoreError> {
        Ok(StorageStats {
            users: self.users.len(),
            transactions: self.transactions.len(),
            investments: self.investments.len(),
            disk_size_bytes: self.db.size_on_disk().unwrap_or(0),
        })
    }

    // ========================================================================
    // RECORD ACCESS
    // ========================================================================

    pub fn account(&self, username: &str) -> Result<Option<Account>, StoreError> {
        TreeCollection::new(&self.users).find(username)
    }

    pub fn transaction(&self, id: &str) -> Result<Option<Transaction>, StoreError> {
        TreeCollection::new(&self.transactions).find(id)
    }

    pub fn investor(&self, username: &str) -> Result<Option<InvestorProfile>, StoreError> {
        TreeCollection::new(&self.investments).find(username)
    }

    /// Local write by the hosting application: insert or replace an account
    pub fn put_account(&self, account: Account) -> Result<(), StoreError> {
        TreeCollection::new(&self.users).put(account)
    }

    /// Local write by the hosting application: insert or replace an investor
    pub fn put_investor(&self, investor: InvestorProfile) -> Result<(), StoreError> {
        TreeCollection::new(&self.investments).put(investor)
    }

    /// Local write by the hosting application: record a transaction once
    pub fn push_transaction(&self, transaction: Transaction) -> Result<(), StoreError> {
        append_records(
            &mut TreeCollection::new(&self.transactions),
            std::slice::from_ref(&transaction),
        )?;
        Ok(())
    }

    fn load_all<T: DeserializeOwned>(tree: &sled::Tree) -> Result<Vec<T>, StoreError> {
        let mut records = Vec::with_capacity(tree.len());
        for result in tree.iter() {
            let (_, value) = result?;
            records.push(decode(&value)?);
        }
        Ok(records)
    }
}

impl LedgerHooks for LedgerStore {
    fn local_snapshot(&self) -> Result<Snapshot, StoreError> {
        Ok(Snapshot {
            users: Self::load_all(&self.users)?,
            transactions: Self::load_all(&self.transactions)?,
            investments: Self::load_all(&self.investments)?,
        })
    }

    fn apply_remote_snapshot(&self, snapshot: &Snapshot) -> Result<MergeReport, StoreError> {
        let mut report = upsert_records(&mut TreeCollection::new(&self.users), &snapshot.users)?;
        report += append_records(
            &mut TreeCollection::new(&self.transactions),
            &snapshot.transactions,
        )?;
        report += upsert_records(
            &mut TreeCollection::new(&self.investments),
            &snapshot.investments,
        )?;
        Ok(report)
    }

    fn apply_transaction(&self, transaction: &Transaction) -> Result<MergeReport, StoreError> {
        replace_record(&mut TreeCollection::new(&self.transactions), transaction)
    }

    fn apply_balance_update(&self, update: &BalanceUpdate) -> Result<bool, StoreError> {
        let mut users = TreeCollection::<Account>::new(&self.users);
        match users.find(&update.username)? {
            Some(mut account) => {
                account.apply_balance(update);
                users.put(account)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn apply_user_update(&self, user: &Account) -> Result<MergeReport, StoreError> {
        upsert_record(&mut TreeCollection::new(&self.users), user)
    }
}

// Merge Rules - How an incoming snapshot lands in a local store
//
// Keyed entities (accounts, investor profiles): incoming fields always win.
// Append-only entities (transactions): insert when the id is new, never touch
// an existing entry. There is no timestamp or version comparison, so the
// result depends on the order snapshots arrive in.

use crate::ledger::records::{SharedRecord, Snapshot, Upsert};
use crate::storage::StoreError;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Outcome of merging records into a store
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Records whose key was new
    pub inserted: usize,
    /// Existing records that were overwritten
    pub updated: usize,
    /// Existing append-only records left as they were
    pub unchanged: usize,
}

impl MergeReport {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.unchanged
    }

    /// Whether the merge changed the store at all
    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.updated > 0
    }
}

impl AddAssign for MergeReport {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}

/// Keyed access to one kind of record inside a store
pub trait RecordCollection<T: SharedRecord> {
    fn find(&self, key: &str) -> Result<Option<T>, StoreError>;

    /// Insert, or replace the record with the same key
    fn put(&mut self, record: T) -> Result<(), StoreError>;
}

impl<T: SharedRecord> RecordCollection<T> for Vec<T> {
    fn find(&self, key: &str) -> Result<Option<T>, StoreError> {
        Ok(self.iter().find(|r| r.key() == key).cloned())
    }

    fn put(&mut self, record: T) -> Result<(), StoreError> {
        match self.iter_mut().find(|r| r.key() == record.key()) {
            Some(existing) => *existing = record,
            None => self.push(record),
        }
        Ok(())
    }
}

/// Overlay one keyed record, inserting it when absent
pub fn upsert_record<T, C>(collection: &mut C, incoming: &T) -> Result<MergeReport, StoreError>
where
    T: Upsert,
    C: RecordCollection<T>,
{
    let mut report = MergeReport::default();
    match collection.find(incoming.key())? {
        Some(mut existing) => {
            existing.overlay(incoming);
            collection.put(existing)?;
            report.updated += 1;
        }
        None => {
            collection.put(incoming.clone())?;
            report.inserted += 1;
        }
    }
    Ok(report)
}

/// Overlay a batch of keyed records, in order
pub fn upsert_records<T, C>(collection: &mut C, incoming: &[T]) -> Result<MergeReport, StoreError>
where
    T: Upsert,
    C: RecordCollection<T>,
{
    let mut report = MergeReport::default();
    for record in incoming {
        report += upsert_record(collection, record)?;
    }
    Ok(report)
}

/// Insert append-only records whose id is not yet present
pub fn append_records<T, C>(collection: &mut C, incoming: &[T]) -> Result<MergeReport, StoreError>
where
    T: SharedRecord,
    C: RecordCollection<T>,
{
    let mut report = MergeReport::default();
    for record in incoming {
        if collection.find(record.key())?.is_some() {
            report.unchanged += 1;
        } else {
            collection.put(record.clone())?;
            report.inserted += 1;
        }
    }
    Ok(report)
}

/// Replace a record wholesale by key (idempotent)
pub fn replace_record<T, C>(collection: &mut C, record: &T) -> Result<MergeReport, StoreError>
where
    T: SharedRecord + PartialEq,
    C: RecordCollection<T>,
{
    let mut report = MergeReport::default();
    match collection.find(record.key())? {
        Some(existing) if existing == *record => report.unchanged += 1,
        Some(_) => {
            collection.put(record.clone())?;
            report.updated += 1;
        }
        None => {
            collection.put(record.clone())?;
            report.inserted += 1;
        }
    }
    Ok(report)
}

/// Merge a whole snapshot into an in-memory snapshot
pub fn merge_snapshot(local: &mut Snapshot, incoming: &Snapshot) -> MergeReport {
    let mut report = MergeReport::default();
    // Vec collections never fail
    if let Ok(r) = upsert_records(&mut local.users, &incoming.users) {
        report += r;
    }
    if let Ok(r) = append_records(&mut local.transactions, &incoming.transactions) {
        report += r;
    }
    if let Ok(r) = upsert_records(&mut local.investments, &incoming.investments) {
        report += r;
    }
    report
}

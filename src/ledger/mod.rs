// Ledger module - THE SHARED RECORDS
// Replicated record types, merge rules, and the hooks into a hosting store

mod hooks;
mod memory;
mod merge;
mod records;

pub use hooks::LedgerHooks;
pub use memory::MemoryLedger;
pub use merge::{
    append_records, merge_snapshot, replace_record, upsert_record, upsert_records, MergeReport,
    RecordCollection,
};
pub use records::{
    Account, BalanceUpdate, Fields, InvestorProfile, SharedRecord, Snapshot, Transaction, Upsert,
    CASH_BALANCE, COIN_BALANCE,
};

// Merge Rule Tests
// Tests for keyed overwrite, append-only transactions and order dependence

use pilgrim_mesh::ledger::{
    append_records, merge_snapshot, upsert_records, Account, BalanceUpdate, InvestorProfile,
    LedgerHooks, MemoryLedger, MergeReport, Snapshot, Transaction,
};
use serde_json::json;

fn alice(coin: f64) -> Account {
    Account::new("alice").with_field("coinBalance", coin)
}

fn snapshot_with(users: Vec<Account>, transactions: Vec<Transaction>) -> Snapshot {
    Snapshot {
        users,
        transactions,
        investments: Vec::new(),
    }
}

// ============================================================================
// KEYED RECORDS
// ============================================================================

#[test]
fn test_incoming_account_inserted_when_new() {
    let mut local = Vec::new();
    let report = upsert_records(&mut local, &[alice(1.0)]).unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(local, vec![alice(1.0)]);
}

#[test]
fn test_overlay_keeps_local_only_fields() {
    let mut local = vec![alice(1.0).with_field("email", "alice@example.com")];

    upsert_records(&mut local, &[alice(5.0)]).unwrap();

    assert_eq!(local[0].coin_balance(), Some(5.0));
    assert_eq!(local[0].field("email"), Some(&json!("alice@example.com")));
}

#[test]
fn test_investor_profiles_overwrite_by_username() {
    let mut local = vec![InvestorProfile::new("bob").with_field("risk", "low")];
    let incoming = [InvestorProfile::new("bob").with_field("risk", "high")];

    let report = upsert_records(&mut local, &incoming).unwrap();

    assert_eq!(report.updated, 1);
    assert_eq!(local[0].field("risk"), Some(&json!("high")));
}

// ============================================================================
// APPEND-ONLY TRANSACTIONS
// ============================================================================

#[test]
fn test_transactions_never_overwritten() {
    let mut local = vec![Transaction::new("t1").with_field("amount", 1)];
    let incoming = [
        Transaction::new("t1").with_field("amount", 1000),
        Transaction::new("t2").with_field("amount", 2),
    ];

    let report = append_records(&mut local, &incoming).unwrap();

    assert_eq!(
        report,
        MergeReport {
            inserted: 1,
            updated: 0,
            unchanged: 1
        }
    );
    assert_eq!(local[0].field("amount"), Some(&json!(1)));
}

#[test]
fn test_transaction_merge_is_a_union() {
    let mut a = snapshot_with(Vec::new(), vec![Transaction::new("a1"), Transaction::new("shared")]);
    let b = snapshot_with(Vec::new(), vec![Transaction::new("b1"), Transaction::new("shared")]);

    merge_snapshot(&mut a, &b);

    let mut ids: Vec<&str> = a.transactions.iter().map(|t| t.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["a1", "b1", "shared"]);
}

// ============================================================================
// SNAPSHOTS
// ============================================================================

#[test]
fn test_merge_order_decides_conflicts() {
    // main has 10, investment has 20; whichever snapshot lands last wins
    let mut main = snapshot_with(vec![alice(10.0)], Vec::new());
    let mut investment = snapshot_with(vec![alice(20.0)], Vec::new());

    let from_main = main.clone();
    merge_snapshot(&mut investment, &from_main);
    assert_eq!(investment.users[0].coin_balance(), Some(10.0));

    let from_investment = investment.clone();
    merge_snapshot(&mut main, &from_investment);
    assert_eq!(main.users[0].coin_balance(), Some(10.0));
}

#[test]
fn test_merging_same_snapshot_twice_is_stable() {
    let mut local = Snapshot::default();
    let incoming = snapshot_with(vec![alice(3.0)], vec![Transaction::new("t")]);

    let first = merge_snapshot(&mut local, &incoming);
    let after_first = local.clone();
    let second = merge_snapshot(&mut local, &incoming);

    assert!(first.changed());
    assert_eq!(second.inserted, 0);
    assert_eq!(local, after_first);
}

#[test]
fn test_empty_snapshot_changes_nothing() {
    let mut local = snapshot_with(vec![alice(1.0)], vec![Transaction::new("t")]);
    let before = local.clone();

    let report = merge_snapshot(&mut local, &Snapshot::default());

    assert_eq!(report.total(), 0);
    assert_eq!(local, before);
}

// ============================================================================
// MEMORY LEDGER HOOKS
// ============================================================================

#[test]
fn test_memory_ledger_balance_update() {
    let ledger = MemoryLedger::new();
    ledger.put_account(alice(1.0).with_field("cashBalance", 9.0));

    assert!(ledger
        .apply_balance_update(&BalanceUpdate::new("alice").with_coin_balance(2.0))
        .unwrap());
    assert!(!ledger
        .apply_balance_update(&BalanceUpdate::new("ghost").with_coin_balance(2.0))
        .unwrap());

    let account = ledger.account("alice").unwrap();
    assert_eq!(account.coin_balance(), Some(2.0));
    assert_eq!(account.cash_balance(), Some(9.0));
    assert!(ledger.account("ghost").is_none());
}

#[test]
fn test_memory_ledger_transaction_upsert_is_idempotent() {
    let ledger = MemoryLedger::new();
    let tx = Transaction::new("42").with_field("amount", 10);

    ledger.apply_transaction(&tx).unwrap();
    ledger.apply_transaction(&tx).unwrap();

    assert_eq!(ledger.transaction_count(), 1);
}

#[test]
fn test_memory_ledger_snapshot_round_trip() {
    let ledger = MemoryLedger::new();
    let incoming = snapshot_with(vec![alice(4.0)], vec![Transaction::new("t9")]);

    ledger.apply_remote_snapshot(&incoming).unwrap();

    assert_eq!(ledger.local_snapshot().unwrap(), incoming);
}

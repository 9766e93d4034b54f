// Shared Records - The replicated units of data
//
// The hosting applications own the record schemas; the bridge only needs a
// natural key per record and shallow field-level overwrite. Everything else
// rides along as an open JSON object.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Open set of record fields, keyed by field name
pub type Fields = Map<String, Value>;

/// Field names of the balances a BALANCE_UPDATE may carry
pub const COIN_BALANCE: &str = "coinBalance";
pub const CASH_BALANCE: &str = "cashBalance";

/// A replicated record with a natural identity
pub trait SharedRecord: Clone {
    /// The natural key (username, transaction id)
    fn key(&self) -> &str;
}

/// A record merged by overwriting fields
pub trait Upsert: SharedRecord {
    /// Overwrite every field present in `incoming`; fields only present
    /// locally survive
    fn overlay(&mut self, incoming: &Self);
}

fn overlay_fields(local: &mut Fields, incoming: &Fields) {
    for (name, value) in incoming {
        local.insert(name.clone(), value.clone());
    }
}

// ============================================================================
// ACCOUNT
// ============================================================================

/// A user account, shared by the bank and the customer portal
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    #[serde(flatten)]
    pub fields: Fields,
}

impl Account {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            fields: Fields::new(),
        }
    }

    /// Builder-style field setter
    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn coin_balance(&self) -> Option<f64> {
        self.fields.get(COIN_BALANCE).and_then(Value::as_f64)
    }

    pub fn cash_balance(&self) -> Option<f64> {
        self.fields.get(CASH_BALANCE).and_then(Value::as_f64)
    }

    /// Overwrite only the balances present in `update`
    ///
    /// Returns whether any field was written.
    pub fn apply_balance(&mut self, update: &BalanceUpdate) -> bool {
        let mut changed = false;
        if let Some(coin) = update.coin_balance {
            self.fields.insert(COIN_BALANCE.to_string(), Value::from(coin));
            changed = true;
        }
        if let Some(cash) = update.cash_balance {
            self.fields.insert(CASH_BALANCE.to_string(), Value::from(cash));
            changed = true;
        }
        changed
    }
}

impl SharedRecord for Account {
    fn key(&self) -> &str {
        &self.username
    }
}

impl Upsert for Account {
    fn overlay(&mut self, incoming: &Self) {
        overlay_fields(&mut self.fields, &incoming.fields);
    }
}

// ============================================================================
// INVESTOR PROFILE
// ============================================================================

/// An investor profile held by the investment application
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvestorProfile {
    pub username: String,
    #[serde(flatten)]
    pub fields: Fields,
}

impl InvestorProfile {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            fields: Fields::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

impl SharedRecord for InvestorProfile {
    fn key(&self) -> &str {
        &self.username
    }
}

impl Upsert for InvestorProfile {
    fn overlay(&mut self, incoming: &Self) {
        overlay_fields(&mut self.fields, &incoming.fields);
    }
}

// ============================================================================
// TRANSACTION
// ============================================================================

/// A ledger transaction, identified by a unique id
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    #[serde(flatten)]
    pub fields: Fields,
}

impl Transaction {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            fields: Fields::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

impl SharedRecord for Transaction {
    fn key(&self) -> &str {
        &self.id
    }
}

// ============================================================================
// BALANCE UPDATE
// ============================================================================

/// Partial balance change for one account
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceUpdate {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coin_balance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cash_balance: Option<f64>,
}

impl BalanceUpdate {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            coin_balance: None,
            cash_balance: None,
        }
    }

    pub fn with_coin_balance(mut self, coin: f64) -> Self {
        self.coin_balance = Some(coin);
        self
    }

    pub fn with_cash_balance(mut self, cash: f64) -> Self {
        self.cash_balance = Some(cash);
        self
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Full export of a node's shared records
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub users: Vec<Account>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub investments: Vec<InvestorProfile>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.transactions.is_empty() && self.investments.is_empty()
    }

    /// Total number of records across every kind
    pub fn record_count(&self) -> usize {
        self.users.len() + self.transactions.len() + self.investments.len()
    }
}

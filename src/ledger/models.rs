use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

/// Transaction entity - one point-of-sale sale
///
/// `amount` and `required_confirmations` never change after creation. `accepted`
/// and `confirmed` are written by the reconciler only, `transferred` and
/// `transfer_id` by the settlement batcher (and transfer creation for the link).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: i64,
    pub vendor_id: i64,
    pub pos_id: i64,

    /// Requested amount in atomic units
    pub amount: i64,
    pub required_confirmations: i64,

    // Display metadata
    pub currency: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount_in_currency: Decimal,
    pub description: Option<String>,

    pub sub_address: Option<String>,
    pub accepted: bool,
    pub confirmed: bool,
    pub transferred: bool,
    pub transfer_id: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[sqlx(skip)]
    pub sub_transactions: Vec<SubTransaction>,
}

impl Transaction {
    /// Whether the given vendor/POS pair created this sale
    pub fn is_owned_by(&self, vendor_id: i64, pos_id: i64) -> bool {
        self.vendor_id == vendor_id && self.pos_id == pos_id
    }

    pub fn sub_transaction_by_hash(&self, tx_hash: &str) -> Option<&SubTransaction> {
        self.sub_transactions.iter().find(|s| s.tx_hash == tx_hash)
    }
}

/// One on-chain payment fragment covering a transaction, unique per (transaction, tx_hash)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SubTransaction {
    pub id: i64,
    pub transaction_id: i64,
    pub amount: i64,
    pub confirmations: i64,
    pub double_spend_seen: bool,
    pub fee: i64,
    pub height: i64,
    pub timestamp: DateTime<Utc>,
    pub tx_hash: String,
    pub unlock_time: i64,
    pub locked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Transfer entity - one outbound payout for a vendor
///
/// INVARIANT: at most one incomplete transfer per vendor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Transfer {
    pub id: i64,
    pub vendor_id: i64,
    /// Sum of the settled transactions
    pub amount: i64,
    /// Amount actually received by the vendor (amount - fee), set on completion
    pub amount_transferred: Option<i64>,
    pub address: String,
    pub tx_hash: Option<String>,
    pub completed: bool,
    /// Set when a payout attempt ended without a known outcome
    pub payout_in_doubt: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[sqlx(skip)]
    pub transaction_ids: Vec<i64>,
}

/// Fields supplied by sale intake
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub vendor_id: i64,
    pub pos_id: i64,
    pub amount: i64,
    pub required_confirmations: i64,
    pub currency: String,
    pub amount_in_currency: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub vendor_id: i64,
    pub amount: i64,
    pub address: String,
    pub transaction_ids: Vec<i64>,
}

/// Vendor-facing balance summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorBalance {
    pub vendor_id: i64,
    /// Confirmed and not yet transferred, in atomic units
    pub balance: i64,
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{NewTransaction, NewTransfer, SubTransaction, Transaction, Transfer};
use crate::error::AppResult;
use crate::payments::models::PaymentFragment;

/// Read/write operations over sales, payment fragments and transfers
///
/// Every method outside [`SettlementUnit`] is a single-row (or single-statement)
/// mutation; `create_transfer` is the one exception and is atomic on its own.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn ping(&self) -> AppResult<()>;

    async fn create_transaction(&self, new: NewTransaction) -> AppResult<Transaction>;

    async fn set_transaction_address(&self, transaction_id: i64, address: &str) -> AppResult<()>;

    /// Transaction with its sub-transactions
    async fn find_transaction(&self, transaction_id: i64) -> AppResult<Option<Transaction>>;

    /// Unconfirmed transactions with an address, created before `created_before`
    async fn find_unconfirmed_transactions(
        &self,
        created_before: DateTime<Utc>,
    ) -> AppResult<Vec<Transaction>>;

    async fn create_sub_transaction(
        &self,
        transaction_id: i64,
        fragment: &PaymentFragment,
    ) -> AppResult<SubTransaction>;

    /// Refresh the mutable fields of an existing fragment
    async fn update_sub_transaction(
        &self,
        sub_transaction_id: i64,
        fragment: &PaymentFragment,
    ) -> AppResult<()>;

    async fn update_transaction_status(
        &self,
        transaction_id: i64,
        accepted: bool,
        confirmed: bool,
    ) -> AppResult<()>;

    /// Sum of confirmed, not yet transferred sales
    async fn vendor_balance(&self, vendor_id: i64) -> AppResult<i64>;

    async fn find_vendor_payout_address(&self, vendor_id: i64) -> AppResult<Option<String>>;

    /// The vendor's incomplete transfer, if any
    async fn find_active_transfer(&self, vendor_id: i64) -> AppResult<Option<Transfer>>;

    /// Confirmed sales that are neither transferred nor linked to a transfer yet
    async fn find_transferable_transactions(&self, vendor_id: i64) -> AppResult<Vec<Transaction>>;

    /// Insert a transfer and link its transactions
    ///
    /// Fails with `Settlement(TransferInProgress)` when the vendor already has
    /// an incomplete transfer.
    async fn create_transfer(&self, new: NewTransfer) -> AppResult<Transfer>;

    /// Hold transfers out of settlement after a payout with unknown outcome
    ///
    /// Runs outside any settlement unit so it survives the unit's rollback.
    async fn flag_payout_in_doubt(&self, transfer_ids: &[i64]) -> AppResult<()>;

    async fn begin_settlement(&self) -> AppResult<Box<dyn SettlementUnit>>;
}

/// Atomic unit of work used by the settlement batcher
///
/// Nothing is visible to other readers until [`SettlementUnit::commit`]. Dropping
/// the unit without committing discards every change made through it.
#[async_trait]
pub trait SettlementUnit: Send {
    /// Up to `limit` incomplete transfers not in doubt, oldest first, with their transaction ids
    async fn pending_transfers(&mut self, limit: usize) -> AppResult<Vec<Transfer>>;

    async fn mark_transactions_transferred(
        &mut self,
        transfer_id: i64,
        transaction_ids: &[i64],
    ) -> AppResult<()>;

    async fn mark_transfer_completed(
        &mut self,
        transfer_id: i64,
        amount_transferred: i64,
        tx_hash: &str,
    ) -> AppResult<()>;

    async fn commit(self: Box<Self>) -> AppResult<()>;

    async fn rollback(self: Box<Self>) -> AppResult<()>;
}

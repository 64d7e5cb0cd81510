use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::models::*;
use super::store::{LedgerStore, SettlementUnit};
use crate::error::{AppError, AppResult, SettlementError};
use crate::payments::models::PaymentFragment;

#[derive(Default)]
struct LedgerState {
    vendors: HashMap<i64, Option<String>>,
    transactions: BTreeMap<i64, Transaction>,
    sub_transactions: BTreeMap<i64, SubTransaction>,
    transfers: BTreeMap<i64, Transfer>,
    next_id: i64,
}

impl LedgerState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn transaction_ids_for(&self, transfer_id: i64) -> Vec<i64> {
        self.transactions
            .values()
            .filter(|t| t.transfer_id == Some(transfer_id))
            .map(|t| t.id)
            .collect()
    }
}

/// In-memory ledger used by unit and router tests
///
/// Settlement units stage their writes and apply them on commit, so an
/// uncommitted unit leaves the shared state untouched.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_vendor(&self, vendor_id: i64, payout_address: Option<&str>) {
        let mut state = self.state.write().await;
        state
            .vendors
            .insert(vendor_id, payout_address.map(str::to_string));
    }

    /// Seed a sale directly, bypassing intake
    pub async fn seed_transaction(
        &self,
        vendor_id: i64,
        pos_id: i64,
        amount: i64,
        required_confirmations: i64,
        created_at: DateTime<Utc>,
    ) -> Transaction {
        let mut state = self.state.write().await;
        let id = state.next_id();
        let transaction = Transaction {
            id,
            vendor_id,
            pos_id,
            amount,
            required_confirmations,
            currency: "EUR".to_string(),
            amount_in_currency: rust_decimal::Decimal::new(amount, 12),
            description: None,
            sub_address: Some(format!("8Addr{}", id)),
            accepted: false,
            confirmed: false,
            transferred: false,
            transfer_id: None,
            created_at,
            updated_at: created_at,
            sub_transactions: Vec::new(),
        };
        state.transactions.insert(id, transaction.clone());
        transaction
    }

    pub async fn set_confirmed(&self, transaction_id: i64) {
        let mut state = self.state.write().await;
        if let Some(t) = state.transactions.get_mut(&transaction_id) {
            t.accepted = true;
            t.confirmed = true;
        }
    }

    pub async fn transaction(&self, transaction_id: i64) -> Option<Transaction> {
        self.find_transaction(transaction_id).await.ok().flatten()
    }

    pub async fn transfer(&self, transfer_id: i64) -> Option<Transfer> {
        let state = self.state.read().await;
        state.transfers.get(&transfer_id).cloned().map(|mut t| {
            t.transaction_ids = state.transaction_ids_for(transfer_id);
            t
        })
    }

    pub async fn transfers(&self) -> Vec<Transfer> {
        let state = self.state.read().await;
        state.transfers.values().cloned().collect()
    }

    pub async fn sub_transaction_count(&self, transaction_id: i64) -> usize {
        let state = self.state.read().await;
        state
            .sub_transactions
            .values()
            .filter(|s| s.transaction_id == transaction_id)
            .count()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn create_transaction(&self, new: NewTransaction) -> AppResult<Transaction> {
        let mut state = self.state.write().await;
        let id = state.next_id();
        let now = Utc::now();
        let transaction = Transaction {
            id,
            vendor_id: new.vendor_id,
            pos_id: new.pos_id,
            amount: new.amount,
            required_confirmations: new.required_confirmations,
            currency: new.currency,
            amount_in_currency: new.amount_in_currency,
            description: new.description,
            sub_address: None,
            accepted: false,
            confirmed: false,
            transferred: false,
            transfer_id: None,
            created_at: now,
            updated_at: now,
            sub_transactions: Vec::new(),
        };
        state.transactions.insert(id, transaction.clone());
        Ok(transaction)
    }

    async fn set_transaction_address(&self, transaction_id: i64, address: &str) -> AppResult<()> {
        let mut state = self.state.write().await;
        let transaction = state
            .transactions
            .get_mut(&transaction_id)
            .ok_or_else(|| AppError::NotFound(format!("transaction {}", transaction_id)))?;
        transaction.sub_address = Some(address.to_string());
        Ok(())
    }

    async fn find_transaction(&self, transaction_id: i64) -> AppResult<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state.transactions.get(&transaction_id).cloned().map(|mut t| {
            t.sub_transactions = state
                .sub_transactions
                .values()
                .filter(|s| s.transaction_id == transaction_id)
                .cloned()
                .collect();
            t
        }))
    }

    async fn find_unconfirmed_transactions(
        &self,
        created_before: DateTime<Utc>,
    ) -> AppResult<Vec<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .values()
            .filter(|t| !t.confirmed && t.sub_address.is_some() && t.created_at < created_before)
            .cloned()
            .collect())
    }

    async fn create_sub_transaction(
        &self,
        transaction_id: i64,
        fragment: &PaymentFragment,
    ) -> AppResult<SubTransaction> {
        let mut state = self.state.write().await;
        let duplicate = state
            .sub_transactions
            .values()
            .any(|s| s.transaction_id == transaction_id && s.tx_hash == fragment.tx_hash);
        if duplicate {
            return Err(AppError::Conflict(format!(
                "sub-transaction {} already exists",
                fragment.tx_hash
            )));
        }

        let id = state.next_id();
        let now = Utc::now();
        let sub = SubTransaction {
            id,
            transaction_id,
            amount: fragment.amount,
            confirmations: fragment.confirmations,
            double_spend_seen: fragment.double_spend_seen,
            fee: fragment.fee,
            height: fragment.height,
            timestamp: fragment.timestamp,
            tx_hash: fragment.tx_hash.clone(),
            unlock_time: fragment.unlock_time,
            locked: fragment.locked,
            created_at: now,
            updated_at: now,
        };
        state.sub_transactions.insert(id, sub.clone());
        Ok(sub)
    }

    async fn update_sub_transaction(
        &self,
        sub_transaction_id: i64,
        fragment: &PaymentFragment,
    ) -> AppResult<()> {
        let mut state = self.state.write().await;
        let sub = state
            .sub_transactions
            .get_mut(&sub_transaction_id)
            .ok_or_else(|| AppError::NotFound(format!("sub-transaction {}", sub_transaction_id)))?;
        sub.confirmations = fragment.confirmations;
        sub.double_spend_seen = fragment.double_spend_seen;
        sub.fee = fragment.fee;
        sub.locked = fragment.locked;
        sub.height = fragment.height;
        sub.updated_at = Utc::now();
        Ok(())
    }

    async fn update_transaction_status(
        &self,
        transaction_id: i64,
        accepted: bool,
        confirmed: bool,
    ) -> AppResult<()> {
        let mut state = self.state.write().await;
        let transaction = state
            .transactions
            .get_mut(&transaction_id)
            .ok_or_else(|| AppError::NotFound(format!("transaction {}", transaction_id)))?;
        transaction.accepted = accepted;
        transaction.confirmed = confirmed;
        transaction.updated_at = Utc::now();
        Ok(())
    }

    async fn vendor_balance(&self, vendor_id: i64) -> AppResult<i64> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .values()
            .filter(|t| t.vendor_id == vendor_id && t.confirmed && !t.transferred)
            .map(|t| t.amount)
            .sum())
    }

    async fn find_vendor_payout_address(&self, vendor_id: i64) -> AppResult<Option<String>> {
        let state = self.state.read().await;
        state
            .vendors
            .get(&vendor_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("vendor {}", vendor_id)))
    }

    async fn find_active_transfer(&self, vendor_id: i64) -> AppResult<Option<Transfer>> {
        let state = self.state.read().await;
        Ok(state
            .transfers
            .values()
            .find(|t| t.vendor_id == vendor_id && !t.completed)
            .cloned())
    }

    async fn find_transferable_transactions(&self, vendor_id: i64) -> AppResult<Vec<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .values()
            .filter(|t| {
                t.vendor_id == vendor_id && t.confirmed && !t.transferred && t.transfer_id.is_none()
            })
            .cloned()
            .collect())
    }

    async fn create_transfer(&self, new: NewTransfer) -> AppResult<Transfer> {
        let mut state = self.state.write().await;
        if state
            .transfers
            .values()
            .any(|t| t.vendor_id == new.vendor_id && !t.completed)
        {
            return Err(SettlementError::TransferInProgress(new.vendor_id).into());
        }

        let id = state.next_id();
        let now = Utc::now();
        let transfer = Transfer {
            id,
            vendor_id: new.vendor_id,
            amount: new.amount,
            amount_transferred: None,
            address: new.address,
            tx_hash: None,
            completed: false,
            payout_in_doubt: false,
            created_at: now,
            updated_at: now,
            transaction_ids: new.transaction_ids.clone(),
        };
        state.transfers.insert(id, transfer.clone());
        for transaction_id in &new.transaction_ids {
            if let Some(t) = state.transactions.get_mut(transaction_id) {
                t.transfer_id = Some(id);
            }
        }
        Ok(transfer)
    }

    async fn flag_payout_in_doubt(&self, transfer_ids: &[i64]) -> AppResult<()> {
        let mut state = self.state.write().await;
        for id in transfer_ids {
            if let Some(t) = state.transfers.get_mut(id).filter(|t| !t.completed) {
                t.payout_in_doubt = true;
                t.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn begin_settlement(&self) -> AppResult<Box<dyn SettlementUnit>> {
        Ok(Box::new(InMemorySettlementUnit {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
        }))
    }
}

enum StagedWrite {
    MarkTransferred { transfer_id: i64, transaction_ids: Vec<i64> },
    CompleteTransfer { transfer_id: i64, amount_transferred: i64, tx_hash: String },
}

pub struct InMemorySettlementUnit {
    state: Arc<RwLock<LedgerState>>,
    staged: Vec<StagedWrite>,
}

#[async_trait]
impl SettlementUnit for InMemorySettlementUnit {
    async fn pending_transfers(&mut self, limit: usize) -> AppResult<Vec<Transfer>> {
        let state = self.state.read().await;
        let mut pending: Vec<Transfer> = state
            .transfers
            .values()
            .filter(|t| !t.completed && !t.payout_in_doubt)
            .cloned()
            .collect();
        pending.sort_by_key(|t| (t.created_at, t.id));
        pending.truncate(limit);
        for transfer in pending.iter_mut() {
            transfer.transaction_ids = state.transaction_ids_for(transfer.id);
        }
        Ok(pending)
    }

    async fn mark_transactions_transferred(
        &mut self,
        transfer_id: i64,
        transaction_ids: &[i64],
    ) -> AppResult<()> {
        self.staged.push(StagedWrite::MarkTransferred {
            transfer_id,
            transaction_ids: transaction_ids.to_vec(),
        });
        Ok(())
    }

    async fn mark_transfer_completed(
        &mut self,
        transfer_id: i64,
        amount_transferred: i64,
        tx_hash: &str,
    ) -> AppResult<()> {
        let state = self.state.read().await;
        match state.transfers.get(&transfer_id) {
            Some(t) if !t.completed => {}
            _ => return Err(AppError::NotFound(format!("pending transfer {}", transfer_id))),
        }
        drop(state);

        self.staged.push(StagedWrite::CompleteTransfer {
            transfer_id,
            amount_transferred,
            tx_hash: tx_hash.to_string(),
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        for write in self.staged {
            match write {
                StagedWrite::MarkTransferred { transfer_id, transaction_ids } => {
                    for id in transaction_ids {
                        if let Some(t) = state.transactions.get_mut(&id) {
                            t.transferred = true;
                            t.transfer_id = Some(transfer_id);
                            t.updated_at = now;
                        }
                    }
                }
                StagedWrite::CompleteTransfer { transfer_id, amount_transferred, tx_hash } => {
                    if let Some(t) = state.transfers.get_mut(&transfer_id) {
                        t.completed = true;
                        t.amount_transferred = Some(amount_transferred);
                        t.tx_hash = Some(tx_hash);
                        t.updated_at = now;
                    }
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uncommitted_unit_leaves_state_untouched() {
        let ledger = InMemoryLedger::new();
        ledger.add_vendor(1, Some("8vendor")).await;
        let sale = ledger.seed_transaction(1, 1, 5_000_000, 0, Utc::now()).await;
        ledger.set_confirmed(sale.id).await;
        let transfer = ledger
            .create_transfer(NewTransfer {
                vendor_id: 1,
                amount: 5_000_000,
                address: "8vendor".into(),
                transaction_ids: vec![sale.id],
            })
            .await
            .unwrap();

        let mut unit = ledger.begin_settlement().await.unwrap();
        let pending = unit.pending_transfers(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].transaction_ids, vec![sale.id]);
        unit.mark_transactions_transferred(transfer.id, &[sale.id]).await.unwrap();
        unit.mark_transfer_completed(transfer.id, 4_990_000, "abc").await.unwrap();
        drop(unit);

        assert!(!ledger.transaction(sale.id).await.unwrap().transferred);
        assert!(!ledger.transfer(transfer.id).await.unwrap().completed);

        let mut unit = ledger.begin_settlement().await.unwrap();
        unit.mark_transactions_transferred(transfer.id, &[sale.id]).await.unwrap();
        unit.mark_transfer_completed(transfer.id, 4_990_000, "abc").await.unwrap();
        unit.commit().await.unwrap();

        assert!(ledger.transaction(sale.id).await.unwrap().transferred);
        let completed = ledger.transfer(transfer.id).await.unwrap();
        assert!(completed.completed);
        assert_eq!(completed.amount_transferred, Some(4_990_000));
        assert_eq!(ledger.vendor_balance(1).await.unwrap(), 0);
    }
}

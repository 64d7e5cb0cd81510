use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use tracing::{debug, info};

use super::models::*;
use super::store::{LedgerStore, SettlementUnit};
use crate::error::{AppError, AppResult, SettlementError};
use crate::payments::models::PaymentFragment;

const TRANSACTION_COLUMNS: &str = r#"
    id, vendor_id, pos_id, amount, required_confirmations, currency,
    amount_in_currency, description, sub_address, accepted, confirmed,
    transferred, transfer_id, created_at, updated_at
"#;

const SUB_TRANSACTION_COLUMNS: &str = r#"
    id, transaction_id, amount, confirmations, double_spend_seen, fee, height,
    timestamp, tx_hash, unlock_time, locked, created_at, updated_at
"#;

const TRANSFER_COLUMNS: &str = r#"
    id, vendor_id, amount, amount_transferred, address, tx_hash, completed,
    payout_in_doubt, created_at, updated_at
"#;

/// Ledger repository - THE source of truth for sales, fragments and payouts
pub struct LedgerRepository {
    pub pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn sub_transactions_for(&self, transaction_id: i64) -> AppResult<Vec<SubTransaction>> {
        let subs = sqlx::query_as::<_, SubTransaction>(&format!(
            "SELECT {} FROM sub_transactions WHERE transaction_id = $1 ORDER BY id",
            SUB_TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(subs)
    }
}

#[async_trait]
impl LedgerStore for LedgerRepository {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ========== TRANSACTION OPERATIONS ==========

    async fn create_transaction(&self, new: NewTransaction) -> AppResult<Transaction> {
        let transaction = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            INSERT INTO transactions
                (vendor_id, pos_id, amount, required_confirmations, currency,
                 amount_in_currency, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(new.vendor_id)
        .bind(new.pos_id)
        .bind(new.amount)
        .bind(new.required_confirmations)
        .bind(&new.currency)
        .bind(new.amount_in_currency)
        .bind(&new.description)
        .fetch_one(&self.pool)
        .await?;

        Ok(transaction)
    }

    async fn set_transaction_address(&self, transaction_id: i64, address: &str) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE transactions SET sub_address = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(transaction_id)
        .bind(address)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("transaction {}", transaction_id)));
        }
        Ok(())
    }

    async fn find_transaction(&self, transaction_id: i64) -> AppResult<Option<Transaction>> {
        let transaction = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        match transaction {
            Some(mut transaction) => {
                transaction.sub_transactions = self.sub_transactions_for(transaction.id).await?;
                Ok(Some(transaction))
            }
            None => Ok(None),
        }
    }

    async fn find_unconfirmed_transactions(
        &self,
        created_before: DateTime<Utc>,
    ) -> AppResult<Vec<Transaction>> {
        let transactions = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            SELECT {}
            FROM transactions
            WHERE confirmed = FALSE
              AND sub_address IS NOT NULL
              AND created_at < $1
            ORDER BY created_at ASC
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(created_before)
        .fetch_all(&self.pool)
        .await?;

        Ok(transactions)
    }

    async fn update_transaction_status(
        &self,
        transaction_id: i64,
        accepted: bool,
        confirmed: bool,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET accepted = $2, confirmed = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(transaction_id)
        .bind(accepted)
        .bind(confirmed)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("transaction {}", transaction_id)));
        }
        Ok(())
    }

    // ========== SUB-TRANSACTION OPERATIONS ==========

    async fn create_sub_transaction(
        &self,
        transaction_id: i64,
        fragment: &PaymentFragment,
    ) -> AppResult<SubTransaction> {
        // A concurrent insert of the same hash degrades to a refresh
        let sub = sqlx::query_as::<_, SubTransaction>(&format!(
            r#"
            INSERT INTO sub_transactions
                (transaction_id, amount, confirmations, double_spend_seen, fee, height,
                 timestamp, tx_hash, unlock_time, locked)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (transaction_id, tx_hash) DO UPDATE SET
                confirmations = EXCLUDED.confirmations,
                double_spend_seen = EXCLUDED.double_spend_seen,
                fee = EXCLUDED.fee,
                locked = EXCLUDED.locked,
                updated_at = NOW()
            RETURNING {}
            "#,
            SUB_TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .bind(fragment.amount)
        .bind(fragment.confirmations)
        .bind(fragment.double_spend_seen)
        .bind(fragment.fee)
        .bind(fragment.height)
        .bind(fragment.timestamp)
        .bind(&fragment.tx_hash)
        .bind(fragment.unlock_time)
        .bind(fragment.locked)
        .fetch_one(&self.pool)
        .await?;

        Ok(sub)
    }

    async fn update_sub_transaction(
        &self,
        sub_transaction_id: i64,
        fragment: &PaymentFragment,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE sub_transactions
            SET confirmations = $2, double_spend_seen = $3, fee = $4, locked = $5,
                height = $6, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(sub_transaction_id)
        .bind(fragment.confirmations)
        .bind(fragment.double_spend_seen)
        .bind(fragment.fee)
        .bind(fragment.locked)
        .bind(fragment.height)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ========== VENDOR OPERATIONS ==========

    async fn vendor_balance(&self, vendor_id: i64) -> AppResult<i64> {
        let balance: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount), 0)::BIGINT
            FROM transactions
            WHERE vendor_id = $1 AND confirmed = TRUE AND transferred = FALSE
            "#,
        )
        .bind(vendor_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(balance)
    }

    async fn find_vendor_payout_address(&self, vendor_id: i64) -> AppResult<Option<String>> {
        let address: Option<Option<String>> =
            sqlx::query_scalar("SELECT payout_address FROM vendors WHERE id = $1")
                .bind(vendor_id)
                .fetch_optional(&self.pool)
                .await?;

        match address {
            Some(address) => Ok(address),
            None => Err(AppError::NotFound(format!("vendor {}", vendor_id))),
        }
    }

    // ========== TRANSFER OPERATIONS ==========

    async fn find_active_transfer(&self, vendor_id: i64) -> AppResult<Option<Transfer>> {
        let transfer = sqlx::query_as::<_, Transfer>(&format!(
            "SELECT {} FROM transfers WHERE vendor_id = $1 AND completed = FALSE LIMIT 1",
            TRANSFER_COLUMNS
        ))
        .bind(vendor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(transfer)
    }

    async fn find_transferable_transactions(&self, vendor_id: i64) -> AppResult<Vec<Transaction>> {
        let transactions = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            SELECT {}
            FROM transactions
            WHERE vendor_id = $1
              AND confirmed = TRUE
              AND transferred = FALSE
              AND transfer_id IS NULL
            ORDER BY id
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(vendor_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(transactions)
    }

    async fn create_transfer(&self, new: NewTransfer) -> AppResult<Transfer> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, Transfer>(&format!(
            r#"
            INSERT INTO transfers (vendor_id, amount, address)
            VALUES ($1, $2, $3)
            RETURNING {}
            "#,
            TRANSFER_COLUMNS
        ))
        .bind(new.vendor_id)
        .bind(new.amount)
        .bind(&new.address)
        .fetch_one(&mut *tx)
        .await;

        let mut transfer = match inserted {
            Ok(transfer) => transfer,
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(SettlementError::TransferInProgress(new.vendor_id).into());
            }
            Err(e) => return Err(e.into()),
        };

        sqlx::query(
            "UPDATE transactions SET transfer_id = $1, updated_at = NOW() WHERE id = ANY($2)",
        )
        .bind(transfer.id)
        .bind(&new.transaction_ids[..])
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            "💸 Transfer {} created for vendor {}: {} atomic units across {} sales",
            transfer.id,
            new.vendor_id,
            transfer.amount,
            new.transaction_ids.len()
        );

        transfer.transaction_ids = new.transaction_ids;
        Ok(transfer)
    }

    async fn flag_payout_in_doubt(&self, transfer_ids: &[i64]) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE transfers
            SET payout_in_doubt = TRUE, updated_at = NOW()
            WHERE id = ANY($1) AND completed = FALSE
            "#,
        )
        .bind(transfer_ids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn begin_settlement(&self) -> AppResult<Box<dyn SettlementUnit>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgSettlementUnit { tx }))
    }
}

/// Settlement unit backed by one Postgres transaction
///
/// `sqlx::Transaction` rolls back when dropped uncommitted.
pub struct PgSettlementUnit {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl SettlementUnit for PgSettlementUnit {
    async fn pending_transfers(&mut self, limit: usize) -> AppResult<Vec<Transfer>> {
        let mut transfers = sqlx::query_as::<_, Transfer>(&format!(
            r#"
            SELECT {}
            FROM transfers
            WHERE completed = FALSE AND payout_in_doubt = FALSE
            ORDER BY created_at ASC, id ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
            TRANSFER_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&mut *self.tx)
        .await?;

        if transfers.is_empty() {
            return Ok(transfers);
        }

        let transfer_ids: Vec<i64> = transfers.iter().map(|t| t.id).collect();
        let links: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT id, transfer_id FROM transactions WHERE transfer_id = ANY($1) ORDER BY id",
        )
        .bind(&transfer_ids[..])
        .fetch_all(&mut *self.tx)
        .await?;

        for transfer in transfers.iter_mut() {
            transfer.transaction_ids = links
                .iter()
                .filter(|(_, transfer_id)| *transfer_id == transfer.id)
                .map(|(id, _)| *id)
                .collect();
        }

        debug!("Locked {} pending transfers", transfers.len());
        Ok(transfers)
    }

    async fn mark_transactions_transferred(
        &mut self,
        transfer_id: i64,
        transaction_ids: &[i64],
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE transactions
            SET transferred = TRUE, transfer_id = $1, updated_at = NOW()
            WHERE id = ANY($2)
            "#,
        )
        .bind(transfer_id)
        .bind(transaction_ids)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn mark_transfer_completed(
        &mut self,
        transfer_id: i64,
        amount_transferred: i64,
        tx_hash: &str,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transfers
            SET completed = TRUE, amount_transferred = $2, tx_hash = $3, updated_at = NOW()
            WHERE id = $1 AND completed = FALSE
            "#,
        )
        .bind(transfer_id)
        .bind(amount_transferred)
        .bind(tx_hash)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("pending transfer {}", transfer_id)));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

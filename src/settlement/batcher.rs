// Settlement batcher - pays out pending vendor transfers
//
// Each sweep tries one combined payout, starting with the largest batch and
// shrinking the batch after every failed trial. A trial is a single unit of
// work: the transfers are only marked completed (and their sales transferred)
// when the payout went through and the unit commits. A payout whose outcome
// is unknown ends the sweep and parks its transfers until someone checks the
// wallet.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use super::payout::PayoutExecutor;
use super::scheduler::{Sweep, SweepContext};
use crate::error::{AppError, AppResult, SettlementError};
use crate::ledger::models::{NewTransfer, Transfer};
use crate::ledger::store::{LedgerStore, SettlementUnit};
use crate::payments::models::{Destination, PayoutReceipt};

const PAYOUT_ADDRESS_LEN: usize = 95;
const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Whether `address` is a subaddress the payout wallet can pay to
///
/// 95 base58 characters, starting with `8` followed by a digit, `A` or `B`.
pub fn is_valid_payout_address(address: &str) -> bool {
    let bytes = address.as_bytes();
    if bytes.len() != PAYOUT_ADDRESS_LEN || bytes[0] != b'8' {
        return false;
    }
    if !matches!(bytes[1], b'0'..=b'9' | b'A' | b'B') {
        return false;
    }
    address[2..].chars().all(|c| BASE58_ALPHABET.contains(c))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettlementOutcome {
    /// Transfers completed by this sweep
    pub paid: usize,
    /// Trials that failed and were rolled back
    pub failed_trials: usize,
    /// Transfers parked after a payout with unknown outcome
    pub in_doubt: usize,
}

pub struct SettlementBatcher {
    ledger: Arc<dyn LedgerStore>,
    payout: PayoutExecutor,
    max_batch: usize,
    min_payout: i64,
    sweep_lock: Mutex<()>,
    creation_lock: Mutex<()>,
}

impl SettlementBatcher {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        payout: PayoutExecutor,
        max_batch: usize,
        min_payout: i64,
    ) -> Self {
        Self {
            ledger,
            payout,
            max_batch: max_batch.max(1),
            min_payout,
            sweep_lock: Mutex::new(()),
            creation_lock: Mutex::new(()),
        }
    }

    /// Open a transfer for everything the vendor can currently be paid
    #[instrument(skip(self))]
    pub async fn create_transfer(&self, vendor_id: i64) -> AppResult<Transfer> {
        let _guard = self.creation_lock.lock().await;

        let address = self
            .ledger
            .find_vendor_payout_address(vendor_id)
            .await?
            .filter(|a| is_valid_payout_address(a))
            .ok_or(SettlementError::MissingPayoutAddress(vendor_id))?;

        if self.ledger.find_active_transfer(vendor_id).await?.is_some() {
            return Err(SettlementError::TransferInProgress(vendor_id).into());
        }

        let transactions = self.ledger.find_transferable_transactions(vendor_id).await?;
        if transactions.is_empty() {
            return Err(SettlementError::NothingToTransfer(vendor_id).into());
        }

        let amount: i64 = transactions.iter().map(|t| t.amount).sum();
        if amount < self.min_payout {
            return Err(SettlementError::BelowMinimumPayout {
                minimum: self.min_payout,
                available: amount,
            }
            .into());
        }

        let transfer = self
            .ledger
            .create_transfer(NewTransfer {
                vendor_id,
                amount,
                address,
                transaction_ids: transactions.iter().map(|t| t.id).collect(),
            })
            .await?;

        info!(
            "📝 Transfer {} opened for vendor {}: {} atomic units over {} sales",
            transfer.id,
            vendor_id,
            amount,
            transfer.transaction_ids.len()
        );
        Ok(transfer)
    }

    /// One settlement sweep
    ///
    /// Trial sizes run from `max_batch` down to 1. The deadline and shutdown
    /// are only checked between trials; a trial in flight always finishes.
    pub async fn run_sweep(&self, ctx: &SweepContext) -> SettlementOutcome {
        let mut outcome = SettlementOutcome::default();
        if !self.payout.has_backend() {
            debug!("No payout backend configured, settlement skipped");
            return outcome;
        }

        let _guard = self.sweep_lock.lock().await;

        for trial_size in (1..=self.max_batch).rev() {
            if ctx.should_stop() {
                debug!("Settlement sweep stopped before trial of {}", trial_size);
                break;
            }

            match self.run_trial(trial_size).await {
                Ok(TrialResult::NothingPending) => break,
                Ok(TrialResult::Paid { transfer_ids, .. }) => {
                    outcome.paid = transfer_ids.len();
                    break;
                }
                Ok(TrialResult::InDoubt { transfer_ids, reason }) => {
                    error!(
                        "❌ Payout of transfers {:?} may have been relayed, holding them: {}",
                        transfer_ids, reason
                    );
                    if let Err(e) = self.ledger.flag_payout_in_doubt(&transfer_ids).await {
                        error!("Failed to flag transfers {:?} as in doubt: {}", transfer_ids, e);
                    }
                    outcome.in_doubt = transfer_ids.len();
                    break;
                }
                Err(e) => {
                    outcome.failed_trials += 1;
                    warn!("Settlement trial of {} transfers failed: {}", trial_size, e);
                }
            }
        }

        if outcome.failed_trials > 0 && outcome.paid == 0 && outcome.in_doubt == 0 {
            error!(
                "❌ Settlement sweep paid nothing after {} failed trials",
                outcome.failed_trials
            );
        }
        outcome
    }

    async fn run_trial(&self, trial_size: usize) -> AppResult<TrialResult> {
        let mut unit = self.ledger.begin_settlement().await?;

        match Self::pay_within(unit.as_mut(), &self.payout, trial_size).await {
            Ok(TrialResult::Paid { transfer_ids, tx_hash }) => match unit.commit().await {
                Ok(()) => Ok(TrialResult::Paid { transfer_ids, tx_hash }),
                // payout already relayed
                Err(e) => Ok(TrialResult::InDoubt {
                    reason: format!("payout {} relayed but ledger commit failed: {}", tx_hash, e),
                    transfer_ids,
                }),
            },
            Ok(other) => {
                if let Err(rollback_error) = unit.rollback().await {
                    warn!("Settlement rollback failed: {}", rollback_error);
                }
                Ok(other)
            }
            Err(e) => {
                if let Err(rollback_error) = unit.rollback().await {
                    warn!("Settlement rollback failed: {}", rollback_error);
                }
                Err(e)
            }
        }
    }

    async fn pay_within(
        unit: &mut dyn SettlementUnit,
        payout: &PayoutExecutor,
        trial_size: usize,
    ) -> AppResult<TrialResult> {
        let transfers = unit.pending_transfers(trial_size).await?;
        if transfers.is_empty() {
            return Ok(TrialResult::NothingPending);
        }

        for transfer in &transfers {
            unit.mark_transactions_transferred(transfer.id, &transfer.transaction_ids)
                .await?;
        }

        let destinations = transfers
            .iter()
            .map(|t| Destination {
                amount: t.amount,
                address: t.address.clone(),
            })
            .collect();
        let receipt = match payout.pay(destinations).await {
            Ok(receipt) => receipt,
            Err(AppError::Settlement(SettlementError::PayoutIndeterminate(reason))) => {
                return Ok(TrialResult::InDoubt {
                    transfer_ids: transfers.iter().map(|t| t.id).collect(),
                    reason,
                });
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = Self::complete_transfers(unit, &transfers, &receipt).await {
            return Ok(TrialResult::InDoubt {
                transfer_ids: transfers.iter().map(|t| t.id).collect(),
                reason: format!("payout {} relayed but recording it failed: {}", receipt.tx_hash, e),
            });
        }

        info!(
            "✅ Settled {} transfers in {} (requested batch {})",
            transfers.len(),
            receipt.tx_hash,
            trial_size
        );
        Ok(TrialResult::Paid {
            transfer_ids: transfers.iter().map(|t| t.id).collect(),
            tx_hash: receipt.tx_hash,
        })
    }

    async fn complete_transfers(
        unit: &mut dyn SettlementUnit,
        transfers: &[Transfer],
        receipt: &PayoutReceipt,
    ) -> AppResult<()> {
        for (index, transfer) in transfers.iter().enumerate() {
            let settled = receipt.settled_amount(index, transfer.amount);
            unit.mark_transfer_completed(transfer.id, settled, &receipt.tx_hash)
                .await?;
        }
        Ok(())
    }
}

enum TrialResult {
    NothingPending,
    Paid { transfer_ids: Vec<i64>, tx_hash: String },
    InDoubt { transfer_ids: Vec<i64>, reason: String },
}

#[async_trait]
impl Sweep for SettlementBatcher {
    fn name(&self) -> &'static str {
        "settlement"
    }

    async fn sweep(&self, ctx: SweepContext) {
        let outcome = self.run_sweep(&ctx).await;
        debug!(
            "Settlement sweep: {} paid, {} failed trials, {} in doubt",
            outcome.paid, outcome.failed_trials, outcome.in_doubt
        );
    }
}

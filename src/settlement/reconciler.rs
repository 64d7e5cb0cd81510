// Confirmation reconciler - merges backend payment data into the ledger
//
// Two entry points share one lock and one merge step:
// - poll sweep: every pending sale with an address is queried on the gateway
// - push ingestion: the gateway calls back with a token scoped to one sale

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::scheduler::{Sweep, SweepContext};
use super::status::{hold_monotone, status_for, PaymentStatus};
use crate::auth::TokenService;
use crate::error::{AppError, AppResult};
use crate::ledger::models::Transaction;
use crate::ledger::store::LedgerStore;
use crate::notifications::NotificationHub;
use crate::payments::models::{CallbackPayload, PaymentFragment, ReceiveStatus};
use crate::payments::PaymentGateway;

/// Gateway status lookups in flight at once during a sweep
const SWEEP_CONCURRENCY: usize = 8;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub examined: usize,
    pub updated: usize,
    pub failed: usize,
    pub timed_out: bool,
}

/// Outcome of one merge-and-recompute pass
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub transaction: Transaction,
    pub changed: bool,
}

pub struct ConfirmationReconciler {
    ledger: Arc<dyn LedgerStore>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    tokens: Arc<TokenService>,
    hub: Arc<NotificationHub>,
    grace: chrono::Duration,
    lock: Mutex<()>,
}

impl ConfirmationReconciler {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gateway: Option<Arc<dyn PaymentGateway>>,
        tokens: Arc<TokenService>,
        hub: Arc<NotificationHub>,
        grace_secs: i64,
    ) -> Self {
        Self {
            ledger,
            gateway,
            tokens,
            hub,
            grace: chrono::Duration::seconds(grace_secs),
            lock: Mutex::new(()),
        }
    }

    /// One poll sweep over every unconfirmed sale older than the grace window
    ///
    /// Per-sale failures are logged and retried on the next sweep. Lookups that
    /// have not finished by the deadline are abandoned.
    pub async fn run_sweep(&self, ctx: &SweepContext) -> AppResult<SweepSummary> {
        let Some(gateway) = self.gateway.as_ref() else {
            debug!("No payment gateway configured, skipping reconciliation sweep");
            return Ok(SweepSummary::default());
        };

        let _guard = self.lock.lock().await;

        let pending = self
            .ledger
            .find_unconfirmed_transactions(Utc::now() - self.grace)
            .await?;

        let mut summary = SweepSummary {
            examined: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            return Ok(summary);
        }

        let (mut updated, mut failed) = (0, 0);
        let work = stream::iter(pending)
            .map(|transaction| self.reconcile_one(gateway.as_ref(), transaction))
            .buffer_unordered(SWEEP_CONCURRENCY)
            .for_each(|result| {
                match result {
                    Ok(true) => updated += 1,
                    Ok(false) => {}
                    Err(_) => failed += 1,
                }
                futures::future::ready(())
            });

        let timed_out = tokio::select! {
            _ = work => false,
            _ = tokio::time::sleep_until(ctx.deadline) => true,
            _ = ctx.shutdown.cancelled() => {
                debug!("Reconciliation sweep interrupted by shutdown");
                false
            }
        };
        summary.updated = updated;
        summary.failed = failed;
        summary.timed_out = timed_out;

        if summary.timed_out {
            warn!(
                "⏱️ Reconciliation sweep hit its deadline after {} of {} sales",
                summary.updated + summary.failed,
                summary.examined
            );
        }
        debug!(
            "Reconciliation sweep: {} examined, {} updated, {} failed",
            summary.examined, summary.updated, summary.failed
        );

        Ok(summary)
    }

    async fn reconcile_one(
        &self,
        gateway: &dyn PaymentGateway,
        transaction: Transaction,
    ) -> AppResult<bool> {
        let Some(address) = transaction.sub_address.as_deref() else {
            return Ok(false);
        };

        let status = gateway
            .get_receive_status(address, None, None)
            .await
            .map_err(|e| {
                warn!("Status lookup for transaction {} failed: {}", transaction.id, e);
                AppError::from(e)
            })?;

        let outcome = self
            .merge_and_recompute(transaction.id, &status)
            .await
            .map_err(|e| {
                warn!("Merging transaction {} failed: {}", transaction.id, e);
                e
            })?;

        Ok(outcome.changed)
    }

    /// Push ingestion: verify the callback token, then merge the pushed status
    ///
    /// The ledger is not touched unless the token is valid.
    #[instrument(skip(self, token, payload))]
    pub async fn ingest_callback(
        &self,
        token: &str,
        payload: CallbackPayload,
    ) -> AppResult<MergeOutcome> {
        let transaction_id = self.tokens.verify_callback_token(token)?;
        let status = payload.into_receive_status();

        let _guard = self.lock.lock().await;
        let outcome = self.merge_and_recompute(transaction_id, &status).await?;

        info!(
            "📥 Callback merged for transaction {} (accepted={}, confirmed={})",
            transaction_id, outcome.transaction.accepted, outcome.transaction.confirmed
        );
        Ok(outcome)
    }

    /// Merge reported fragments by hash, recompute status, persist, publish
    ///
    /// Caller must hold the reconciliation lock.
    async fn merge_and_recompute(
        &self,
        transaction_id: i64,
        status: &ReceiveStatus,
    ) -> AppResult<MergeOutcome> {
        let existing = self
            .ledger
            .find_transaction(transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {}", transaction_id)))?;

        let mut changed = false;
        let mut seen = HashSet::new();
        for fragment in &status.transactions {
            if !seen.insert(fragment.tx_hash.as_str()) {
                continue;
            }
            changed |= self.merge_fragment(&existing, fragment).await?;
        }

        let mut transaction = if changed {
            self.ledger
                .find_transaction(transaction_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("transaction {}", transaction_id)))?
        } else {
            existing
        };

        let stored = PaymentStatus {
            accepted: transaction.accepted,
            confirmed: transaction.confirmed,
        };
        let derived = status_for(&transaction, status.covered());
        let (next, regressed) = hold_monotone(stored, derived);

        if regressed {
            warn!(
                "⚠️ Transaction {} status would regress (stored {:?}, derived {:?}, covered {:?}); keeping stored flags",
                transaction_id,
                stored,
                derived,
                status.covered()
            );
        }

        if next != stored {
            self.ledger
                .update_transaction_status(transaction_id, next.accepted, next.confirmed)
                .await?;
            transaction.accepted = next.accepted;
            transaction.confirmed = next.confirmed;
            changed = true;

            info!(
                "✅ Transaction {} status: accepted={} confirmed={}",
                transaction_id, next.accepted, next.confirmed
            );
        }

        if changed {
            self.hub.publish(&transaction);
        }

        Ok(MergeOutcome {
            transaction,
            changed,
        })
    }

    async fn merge_fragment(
        &self,
        transaction: &Transaction,
        fragment: &PaymentFragment,
    ) -> AppResult<bool> {
        if fragment.tx_hash.is_empty() {
            warn!("Ignoring fragment without hash for transaction {}", transaction.id);
            return Ok(false);
        }

        match transaction.sub_transaction_by_hash(&fragment.tx_hash) {
            None => {
                self.ledger
                    .create_sub_transaction(transaction.id, fragment)
                    .await?;
                debug!(
                    "New fragment {} for transaction {}",
                    fragment.tx_hash, transaction.id
                );
                Ok(true)
            }
            Some(sub) => {
                let unchanged = sub.confirmations == fragment.confirmations
                    && sub.fee == fragment.fee
                    && sub.locked == fragment.locked
                    && sub.double_spend_seen == fragment.double_spend_seen
                    && sub.height == fragment.height;
                if unchanged {
                    return Ok(false);
                }

                if fragment.double_spend_seen && !sub.double_spend_seen {
                    warn!(
                        "🚨 Double spend seen on fragment {} of transaction {}",
                        fragment.tx_hash, transaction.id
                    );
                }
                self.ledger.update_sub_transaction(sub.id, fragment).await?;
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl Sweep for ConfirmationReconciler {
    fn name(&self) -> &'static str {
        "reconciliation"
    }

    async fn sweep(&self, ctx: SweepContext) {
        if let Err(e) = self.run_sweep(&ctx).await {
            warn!("Reconciliation sweep failed: {}", e);
        }
    }
}

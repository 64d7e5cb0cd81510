use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{AppError, AppResult, BackendError, SettlementError};
use crate::payments::models::{Destination, PayoutReceipt, PayoutRequest};
use crate::payments::{PaymentGateway, WalletBackend};

/// Why the wallet path did not produce a receipt
#[derive(Debug)]
enum WalletFailure {
    DryRun(BackendError),
    Broadcast(BackendError),
    EmptyTxHash,
}

impl WalletFailure {
    /// The payment may already be on the network
    fn may_have_relayed(&self) -> bool {
        matches!(
            self,
            WalletFailure::Broadcast(BackendError::Timeout { .. }) | WalletFailure::EmptyTxHash
        )
    }
}

impl std::fmt::Display for WalletFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletFailure::DryRun(e) => write!(f, "dry run failed: {}", e),
            WalletFailure::Broadcast(e) => write!(f, "broadcast failed: {}", e),
            WalletFailure::EmptyTxHash => write!(f, "broadcast returned no transaction hash"),
        }
    }
}

impl From<WalletFailure> for AppError {
    fn from(failure: WalletFailure) -> Self {
        if failure.may_have_relayed() {
            return SettlementError::PayoutIndeterminate(failure.to_string()).into();
        }
        match failure {
            WalletFailure::DryRun(e) | WalletFailure::Broadcast(e) => e.into(),
            WalletFailure::EmptyTxHash => SettlementError::PayoutIndeterminate(
                "broadcast returned no transaction hash".to_string(),
            )
            .into(),
        }
    }
}

/// Executes one combined payout, wallet first with gateway fallback
///
/// Wallet path: a no-broadcast dry run of the whole batch, then the real
/// broadcast. When the wallet is absent or fails, the same batch goes to the
/// gateway's `/transfer`, except after a broadcast that may have been relayed
/// (timeout or missing hash). Such a payout ends in `PayoutIndeterminate` on
/// either path. Fees are subtracted from every output on both
/// paths.
pub struct PayoutExecutor {
    wallet: Option<Arc<dyn WalletBackend>>,
    gateway: Option<Arc<dyn PaymentGateway>>,
}

impl PayoutExecutor {
    pub fn new(
        wallet: Option<Arc<dyn WalletBackend>>,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> Self {
        Self { wallet, gateway }
    }

    pub fn has_backend(&self) -> bool {
        self.wallet.is_some() || self.gateway.is_some()
    }

    pub async fn pay(&self, destinations: Vec<Destination>) -> AppResult<PayoutReceipt> {
        if destinations.is_empty() {
            return Err(AppError::Validation("payout without destinations".to_string()));
        }
        let request = PayoutRequest::fee_per_destination(destinations);

        let wallet_failure = match &self.wallet {
            Some(wallet) => match Self::pay_with_wallet(wallet.as_ref(), &request).await {
                Ok(receipt) => return Ok(receipt),
                Err(failure) if failure.may_have_relayed() => {
                    warn!(
                        "Wallet payout of {} destinations is indeterminate, not retrying: {}",
                        request.destinations.len(),
                        failure
                    );
                    return Err(failure.into());
                }
                Err(failure) => {
                    warn!(
                        "Wallet payout of {} destinations failed: {}",
                        request.destinations.len(),
                        failure
                    );
                    Some(failure)
                }
            },
            None => None,
        };

        let Some(gateway) = &self.gateway else {
            return Err(match wallet_failure {
                Some(failure) => failure.into(),
                None => SettlementError::NoBackend.into(),
            });
        };

        match Self::pay_with_gateway(gateway.as_ref(), &request).await {
            Ok(receipt) => Ok(receipt),
            Err(e @ AppError::Settlement(SettlementError::PayoutIndeterminate(_))) => Err(e),
            Err(gateway_error) => match wallet_failure {
                Some(wallet_failure) => Err(BackendError::AllBackendsFailed {
                    wallet: wallet_failure.to_string(),
                    gateway: gateway_error.to_string(),
                }
                .into()),
                None => Err(gateway_error),
            },
        }
    }

    async fn pay_with_wallet(
        wallet: &dyn WalletBackend,
        request: &PayoutRequest,
    ) -> Result<PayoutReceipt, WalletFailure> {
        // the whole batch must fit one wallet payment before anything is broadcast
        wallet
            .transfer(&request.dry_run())
            .await
            .map_err(WalletFailure::DryRun)?;

        let receipt = wallet
            .transfer(request)
            .await
            .map_err(WalletFailure::Broadcast)?;
        if receipt.tx_hash.is_empty() {
            return Err(WalletFailure::EmptyTxHash);
        }

        info!(
            "💸 Wallet broadcast {} ({} destinations)",
            receipt.tx_hash,
            request.destinations.len()
        );
        Ok(receipt)
    }

    async fn pay_with_gateway(
        gateway: &dyn PaymentGateway,
        request: &PayoutRequest,
    ) -> AppResult<PayoutReceipt> {
        let receipt = match gateway.payout(request).await {
            Ok(receipt) => receipt,
            Err(e @ BackendError::Timeout { .. }) => {
                return Err(SettlementError::PayoutIndeterminate(e.to_string()).into());
            }
            Err(e) => return Err(e.into()),
        };
        if receipt.tx_hash.is_empty() {
            return Err(SettlementError::PayoutIndeterminate(
                "gateway returned no transaction hash".to_string(),
            )
            .into());
        }

        info!(
            "💸 Gateway payout {} ({} destinations)",
            receipt.tx_hash,
            request.destinations.len()
        );
        Ok(receipt)
    }
}

use async_trait::async_trait;

use super::models::{GatewayHealth, PayoutReceipt, PayoutRequest, ReceiveStatus, WalletBalance};
use crate::error::BackendError;

/// Payment gateway - receive addresses, their status, and its own payout endpoint
///
/// Every call carries its own timeout; a timeout surfaces as `BackendError::Timeout`.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Allocate a receive address for `amount`, returning the address
    async fn create_receive_address(
        &self,
        amount: i64,
        description: &str,
        callback_url: &str,
    ) -> Result<String, BackendError>;

    async fn get_receive_status(
        &self,
        address: &str,
        min_height: Option<u64>,
        max_height: Option<u64>,
    ) -> Result<ReceiveStatus, BackendError>;

    async fn payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt, BackendError>;

    async fn health(&self) -> Result<GatewayHealth, BackendError>;
}

/// Wallet RPC - primary payout path
#[async_trait]
pub trait WalletBackend: Send + Sync {
    /// Combined transfer; `request.do_not_relay` makes it a dry run that builds
    /// and signs the payment without broadcasting it
    async fn transfer(&self, request: &PayoutRequest) -> Result<PayoutReceipt, BackendError>;

    async fn get_balance(&self) -> Result<WalletBalance, BackendError>;

    async fn open_wallet(&self, filename: &str, password: Option<&str>) -> Result<(), BackendError>;
}

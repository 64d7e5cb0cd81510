use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::ledger::models::Transfer;
use crate::payments::models::WalletBalance;

/// POST /pos/create-transaction
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CreateTransactionRequest {
    #[validate(range(min = 1, message = "amount must be positive"))]
    pub amount: i64,
    #[validate(length(max = 512))]
    pub description: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount_in_currency: Decimal,
    #[validate(length(min = 1, max = 8))]
    pub currency: String,
    #[validate(range(
        min = 0,
        max = 10,
        message = "required confirmations must be between 0 and 10"
    ))]
    pub required_confirmations: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransactionResponse {
    pub id: i64,
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionStreamQuery {
    pub transaction_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorBalanceResponse {
    pub balance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferBalanceResponse {
    pub transfer_id: i64,
    pub amount: i64,
    pub address: String,
    pub transaction_count: usize,
}

impl From<Transfer> for TransferBalanceResponse {
    fn from(transfer: Transfer) -> Self {
        Self {
            transfer_id: transfer.id,
            amount: transfer.amount,
            transaction_count: transfer.transaction_ids.len(),
            address: transfer.address,
        }
    }
}

/// GET /admin/wallet-balance, atomic units
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletBalanceResponse {
    pub total: i64,
    pub unlocked: i64,
    pub locked: i64,
}

impl From<WalletBalance> for WalletBalanceResponse {
    fn from(balance: WalletBalance) -> Self {
        Self {
            total: balance.balance,
            unlocked: balance.unlocked_balance,
            locked: balance.locked().max(0),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub gateway: bool,
    pub wallet: bool,
    pub postgresql: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub services: ServiceHealth,
}

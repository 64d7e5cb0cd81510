use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Covered amounts reported for a receive address
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Covered {
    pub total: i64,
    pub unlocked: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveAmount {
    pub expected: i64,
    pub covered: Covered,
}

/// One incoming on-chain payment toward a receive address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFragment {
    pub amount: i64,
    pub confirmations: i64,
    #[serde(default)]
    pub double_spend_seen: bool,
    pub fee: i64,
    pub height: i64,
    pub timestamp: DateTime<Utc>,
    pub tx_hash: String,
    #[serde(default)]
    pub unlock_time: i64,
    #[serde(default)]
    pub locked: bool,
}

/// Status of a receive address, as returned by `GET /receive/:address`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStatus {
    pub amount: ReceiveAmount,
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub description: String,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub transactions: Vec<PaymentFragment>,
}

impl ReceiveStatus {
    pub fn covered(&self) -> Covered {
        self.amount.covered
    }
}

/// Body pushed by the gateway to the callback endpoint
///
/// Same shape as [`ReceiveStatus`] plus the single fragment that triggered the
/// push, which may or may not already be part of `transactions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub amount: ReceiveAmount,
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub description: String,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub transactions: Vec<PaymentFragment>,
    pub transaction: Option<PaymentFragment>,
}

impl CallbackPayload {
    /// Fold the extra fragment into the fragment set, de-duplicated by hash
    pub fn into_receive_status(self) -> ReceiveStatus {
        let mut transactions = self.transactions;

        if let Some(extra) = self.transaction {
            let already_included = transactions
                .iter()
                .any(|tx| !tx.tx_hash.is_empty() && tx.tx_hash == extra.tx_hash);
            if !already_included {
                transactions.push(extra);
            }
        }

        ReceiveStatus {
            amount: self.amount,
            complete: self.complete,
            description: self.description,
            created_at: self.created_at,
            transactions,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiveRequest<'a> {
    pub amount: i64,
    pub description: &'a str,
    pub callback_url: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiveResponse {
    pub address: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub description: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// One payout output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub amount: i64,
    pub address: String,
}

/// Combined payout request, shared by the wallet `transfer` call and the gateway `/transfer`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayoutRequest {
    pub destinations: Vec<Destination>,
    /// Output indices the network fee is split across
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subtract_fee_from_outputs: Vec<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub do_not_relay: bool,
}

impl PayoutRequest {
    /// Fee subtracted from every destination
    pub fn fee_per_destination(destinations: Vec<Destination>) -> Self {
        let subtract_fee_from_outputs = (0..destinations.len() as u32).collect();
        Self {
            destinations,
            subtract_fee_from_outputs,
            do_not_relay: false,
        }
    }

    pub fn dry_run(&self) -> Self {
        Self {
            do_not_relay: true,
            ..self.clone()
        }
    }
}

/// Normalized payout outcome from either backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutReceipt {
    pub tx_hash: String,
    /// Post-fee amount per destination, index-aligned with the request
    pub amounts: Vec<i64>,
}

impl PayoutReceipt {
    /// Amount received by destination `index`, falling back to the requested
    /// amount when the backend reported nothing usable
    pub fn settled_amount(&self, index: usize, requested: i64) -> i64 {
        match self.amounts.get(index) {
            Some(&amount) if amount > 0 => amount,
            _ => requested,
        }
    }
}

/// Gateway `/transfer` response
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayTransferResponse {
    #[serde(default)]
    pub tx_hash: String,
    #[serde(default)]
    pub tx_hash_list: Vec<String>,
    #[serde(default)]
    pub destinations: Vec<Destination>,
}

impl GatewayTransferResponse {
    pub fn into_receipt(self) -> PayoutReceipt {
        let tx_hash = if self.tx_hash.is_empty() {
            self.tx_hash_list.into_iter().next().unwrap_or_default()
        } else {
            self.tx_hash
        };

        PayoutReceipt {
            tx_hash,
            amounts: self.destinations.into_iter().map(|d| d.amount).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AmountsByDest {
    #[serde(default)]
    pub amounts: Vec<i64>,
}

/// Wallet RPC `transfer` result
#[derive(Debug, Clone, Deserialize)]
pub struct WalletTransferResult {
    #[serde(default)]
    pub tx_hash: String,
    #[serde(default)]
    pub amounts_by_dest: Option<AmountsByDest>,
}

impl WalletTransferResult {
    pub fn into_receipt(self) -> PayoutReceipt {
        PayoutReceipt {
            tx_hash: self.tx_hash,
            amounts: self.amounts_by_dest.map(|a| a.amounts).unwrap_or_default(),
        }
    }
}

/// Wallet RPC `get_balance` result, atomic units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub balance: i64,
    pub unlocked_balance: i64,
}

impl WalletBalance {
    pub fn locked(&self) -> i64 {
        self.balance - self.unlocked_balance
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct GatewayServices {
    #[serde(default)]
    pub walletrpc: bool,
    #[serde(default)]
    pub postgresql: bool,
}

/// Gateway `GET /health` response
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct GatewayHealth {
    pub status: u16,
    #[serde(default)]
    pub services: GatewayServices,
}

impl GatewayHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == 200 && self.services.walletrpc && self.services.postgresql
    }
}

// Test doubles and fixtures shared by the unit and router tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal_macros::dec;

use crate::auth::{Role, SessionClaims};
use crate::error::BackendError;
use crate::ledger::models::Transaction;
use crate::payments::models::{
    CallbackPayload, Covered, GatewayHealth, GatewayServices, PaymentFragment, PayoutReceipt,
    PayoutRequest, ReceiveAmount, ReceiveStatus, WalletBalance,
};
use crate::payments::{PaymentGateway, WalletBackend};

/// Network fee the mocks take off every destination
pub const MOCK_FEE: i64 = 100;

fn receipt_for(request: &PayoutRequest, tx_hash: String) -> PayoutReceipt {
    PayoutReceipt {
        tx_hash,
        amounts: request
            .destinations
            .iter()
            .map(|d| d.amount - MOCK_FEE)
            .collect(),
    }
}

/// Scripted gateway: statuses per address, recorded payouts
#[derive(Default)]
pub struct MockGateway {
    statuses: Mutex<HashMap<String, Option<ReceiveStatus>>>,
    payouts: Mutex<Vec<PayoutRequest>>,
    receive_requests: Mutex<Vec<(i64, String)>>,
    fail_payouts: AtomicBool,
    fail_receive: AtomicBool,
    next_address: AtomicUsize,
}

impl MockGateway {
    pub fn set_status(&self, address: &str, status: ReceiveStatus) {
        self.statuses.lock().insert(address.to_string(), Some(status));
    }

    pub fn fail_status(&self, address: &str) {
        self.statuses.lock().insert(address.to_string(), None);
    }

    pub fn fail_payouts(&self, fail: bool) {
        self.fail_payouts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_receive(&self, fail: bool) {
        self.fail_receive.store(fail, Ordering::SeqCst);
    }

    pub fn payouts(&self) -> Vec<PayoutRequest> {
        self.payouts.lock().clone()
    }

    /// `(amount, callback_url)` of every receive address handed out
    pub fn receive_requests(&self) -> Vec<(i64, String)> {
        self.receive_requests.lock().clone()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_receive_address(
        &self,
        amount: i64,
        _description: &str,
        callback_url: &str,
    ) -> Result<String, BackendError> {
        if self.fail_receive.load(Ordering::SeqCst) {
            return Err(BackendError::Timeout { backend: "gateway" });
        }
        self.receive_requests
            .lock()
            .push((amount, callback_url.to_string()));
        let n = self.next_address.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("8Recv{}", n))
    }

    async fn get_receive_status(
        &self,
        address: &str,
        _min_height: Option<u64>,
        _max_height: Option<u64>,
    ) -> Result<ReceiveStatus, BackendError> {
        match self.statuses.lock().get(address) {
            Some(Some(status)) => Ok(status.clone()),
            Some(None) => Err(BackendError::Status {
                backend: "gateway",
                status: 500,
                body: "scripted failure".to_string(),
            }),
            None => Err(BackendError::Status {
                backend: "gateway",
                status: 404,
                body: "unknown address".to_string(),
            }),
        }
    }

    async fn payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt, BackendError> {
        if self.fail_payouts.load(Ordering::SeqCst) {
            return Err(BackendError::Transport {
                backend: "gateway",
                message: "connection refused".to_string(),
            });
        }
        let mut payouts = self.payouts.lock();
        payouts.push(request.clone());
        Ok(receipt_for(request, format!("gw-{}", payouts.len())))
    }

    async fn health(&self) -> Result<GatewayHealth, BackendError> {
        Ok(GatewayHealth {
            status: 200,
            services: GatewayServices {
                walletrpc: true,
                postgresql: true,
            },
        })
    }
}

/// Wallet whose dry run only fits up to `max_destinations` outputs
pub struct MockWallet {
    max_destinations: usize,
    fail_broadcasts: AtomicBool,
    reject_broadcasts: AtomicBool,
    calls: Mutex<Vec<PayoutRequest>>,
    balance: WalletBalance,
    open: AtomicBool,
    opened_files: Mutex<Vec<String>>,
}

impl MockWallet {
    pub fn accepting_up_to(max_destinations: usize) -> Self {
        Self {
            max_destinations,
            fail_broadcasts: AtomicBool::new(false),
            reject_broadcasts: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            balance: WalletBalance {
                balance: 2_500_000_000_000,
                unlocked_balance: 2_000_000_000_000,
            },
            open: AtomicBool::new(true),
            opened_files: Mutex::new(Vec::new()),
        }
    }

    /// RPC reachable, but no wallet file loaded until `open_wallet`
    pub fn closed() -> Self {
        let wallet = Self::accepting_up_to(15);
        wallet.open.store(false, Ordering::SeqCst);
        wallet
    }

    pub fn opened_files(&self) -> Vec<String> {
        self.opened_files.lock().clone()
    }

    /// Broadcasts time out, leaving their outcome unknown
    pub fn fail_broadcasts(&self, fail: bool) {
        self.fail_broadcasts.store(fail, Ordering::SeqCst);
    }

    /// Broadcasts are refused outright by the wallet
    pub fn reject_broadcasts(&self, reject: bool) {
        self.reject_broadcasts.store(reject, Ordering::SeqCst);
    }

    /// Every transfer call, dry runs included, in order
    pub fn calls(&self) -> Vec<PayoutRequest> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl WalletBackend for MockWallet {
    async fn transfer(&self, request: &PayoutRequest) -> Result<PayoutReceipt, BackendError> {
        let call = {
            let mut calls = self.calls.lock();
            calls.push(request.clone());
            calls.len()
        };

        if request.destinations.len() > self.max_destinations {
            return Err(BackendError::Rpc {
                backend: "wallet",
                code: -4,
                message: "transaction too big".to_string(),
            });
        }
        if !request.do_not_relay && self.fail_broadcasts.load(Ordering::SeqCst) {
            return Err(BackendError::Timeout { backend: "wallet" });
        }
        if !request.do_not_relay && self.reject_broadcasts.load(Ordering::SeqCst) {
            return Err(BackendError::Rpc {
                backend: "wallet",
                code: -17,
                message: "not enough unlocked money".to_string(),
            });
        }

        Ok(receipt_for(request, format!("wallet-{}", call)))
    }

    async fn get_balance(&self) -> Result<WalletBalance, BackendError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(BackendError::Rpc {
                backend: "wallet",
                code: -13,
                message: "No wallet file".to_string(),
            });
        }
        Ok(self.balance)
    }

    async fn open_wallet(&self, filename: &str, _password: Option<&str>) -> Result<(), BackendError> {
        self.opened_files.lock().push(filename.to_string());
        if filename != "pos-wallet" {
            return Err(BackendError::Rpc {
                backend: "wallet",
                code: -1,
                message: "Failed to open wallet".to_string(),
            });
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub fn fragment(tx_hash: &str, confirmations: i64, amount: i64) -> PaymentFragment {
    PaymentFragment {
        amount,
        confirmations,
        double_spend_seen: false,
        fee: 30_000,
        height: 3_200_000,
        timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap(),
        tx_hash: tx_hash.to_string(),
        unlock_time: 0,
        locked: confirmations < 10,
    }
}

pub fn receive_status(
    expected: i64,
    covered_total: i64,
    covered_unlocked: i64,
    transactions: Vec<PaymentFragment>,
) -> ReceiveStatus {
    ReceiveStatus {
        amount: ReceiveAmount {
            expected,
            covered: Covered {
                total: covered_total,
                unlocked: covered_unlocked,
            },
        },
        complete: covered_total >= expected,
        description: String::new(),
        created_at: None,
        transactions,
    }
}

/// Push body fully covering `amount`; the first fragment doubles as the trigger
pub fn callback_payload(amount: i64, transactions: Vec<PaymentFragment>) -> CallbackPayload {
    CallbackPayload {
        amount: ReceiveAmount {
            expected: amount,
            covered: Covered {
                total: amount,
                unlocked: 0,
            },
        },
        complete: true,
        description: String::new(),
        created_at: None,
        transaction: transactions.first().cloned(),
        transactions,
    }
}

pub fn sample_transaction(id: i64, vendor_id: i64, pos_id: i64) -> Transaction {
    let created_at = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
    Transaction {
        id,
        vendor_id,
        pos_id,
        amount: 1_500_000_000_000,
        required_confirmations: 1,
        currency: "EUR".to_string(),
        amount_in_currency: dec!(2.40),
        description: Some("Coffee".to_string()),
        sub_address: Some(format!("8Addr{}", id)),
        accepted: false,
        confirmed: false,
        transferred: false,
        transfer_id: None,
        created_at,
        updated_at: created_at,
        sub_transactions: Vec::new(),
    }
}

fn claims(role: Role, vendor_id: Option<i64>, pos_id: Option<i64>) -> SessionClaims {
    SessionClaims {
        vendor_id,
        pos_id,
        role,
        password_version: 1,
        exp: Utc::now().timestamp() + 600,
    }
}

pub fn pos_claims(vendor_id: i64, pos_id: i64) -> SessionClaims {
    claims(Role::Pos, Some(vendor_id), Some(pos_id))
}

pub fn vendor_claims(vendor_id: i64) -> SessionClaims {
    claims(Role::Vendor, Some(vendor_id), None)
}

pub fn admin_claims() -> SessionClaims {
    claims(Role::Admin, None, None)
}

/// Well-formed payout subaddress, distinct per `n`
pub fn vendor_address(n: i64) -> String {
    // base58 has no '0'
    let suffix = n.to_string().replace('0', "o");
    format!("8A{}{}", "1".repeat(93 - suffix.len()), suffix)
}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::gateway::backend_error;
use super::models::{PayoutReceipt, PayoutRequest, WalletBalance, WalletTransferResult};
use super::traits::WalletBackend;
use crate::error::BackendError;

const BACKEND: &str = "wallet";

const DRY_RUN_TIMEOUT: Duration = Duration::from_secs(10);
const BROADCAST_TIMEOUT: Duration = Duration::from_secs(15);
const BALANCE_TIMEOUT: Duration = Duration::from_secs(8);
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct RpcRequest<'a, P: Serialize> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

/// JSON-RPC client for the wallet daemon
pub struct WalletRpcClient {
    endpoint: String,
    credentials: Option<(String, String)>,
    client: Client,
}

impl WalletRpcClient {
    pub fn new(
        endpoint: impl Into<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .build()
            .map_err(|e| backend_error(BACKEND, e))?;

        let credentials = match (username, password) {
            (None, None) => None,
            (user, pass) => Some((user.unwrap_or_default(), pass.unwrap_or_default())),
        };

        Ok(Self {
            endpoint: endpoint.into(),
            credentials,
            client,
        })
    }

    async fn call<P, T>(&self, method: &str, params: P, timeout: Duration) -> Result<T, BackendError>
    where
        P: Serialize + Send,
        T: DeserializeOwned,
    {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: "0",
            method,
            params,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request).timeout(timeout);
        if let Some((user, pass)) = &self.credentials {
            builder = builder.basic_auth(user, Some(pass));
        }

        let response = builder.send().await.map_err(|e| backend_error(BACKEND, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                backend: BACKEND,
                status: status.as_u16(),
                body,
            });
        }

        let envelope: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| backend_error(BACKEND, e))?;

        if let Some(err) = envelope.error {
            warn!("Wallet RPC {} failed: {} {}", method, err.code, err.message);
            return Err(BackendError::Rpc {
                backend: BACKEND,
                code: err.code,
                message: err.message,
            });
        }

        envelope.result.ok_or_else(|| BackendError::Rpc {
            backend: BACKEND,
            code: 0,
            message: format!("{} returned no result", method),
        })
    }
}

#[async_trait]
impl WalletBackend for WalletRpcClient {
    async fn transfer(&self, request: &PayoutRequest) -> Result<PayoutReceipt, BackendError> {
        let timeout = if request.do_not_relay {
            DRY_RUN_TIMEOUT
        } else {
            BROADCAST_TIMEOUT
        };

        let params = json!({
            "destinations": request.destinations,
            "subtract_fee_from_outputs": request.subtract_fee_from_outputs,
            "do_not_relay": request.do_not_relay,
            "get_tx_key": false,
        });

        let result: WalletTransferResult = self.call("transfer", params, timeout).await?;
        debug!(
            "Wallet transfer ({}) built {}",
            if request.do_not_relay { "dry run" } else { "broadcast" },
            result.tx_hash
        );
        Ok(result.into_receipt())
    }

    async fn get_balance(&self) -> Result<WalletBalance, BackendError> {
        self.call("get_balance", json!({ "account_index": 0 }), BALANCE_TIMEOUT)
            .await
    }

    async fn open_wallet(&self, filename: &str, password: Option<&str>) -> Result<(), BackendError> {
        let mut params = json!({ "filename": filename });
        if let Some(password) = password {
            params["password"] = json!(password);
        }
        // open_wallet answers with an empty result object
        let _: serde_json::Value = self.call("open_wallet", params, OPEN_TIMEOUT).await?;
        Ok(())
    }
}

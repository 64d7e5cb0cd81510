use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, instrument};

use super::models::*;
use super::traits::PaymentGateway;
use crate::error::BackendError;

const BACKEND: &str = "gateway";

const HEALTH_TIMEOUT: Duration = Duration::from_secs(8);
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(10);
const STATUS_TIMEOUT: Duration = Duration::from_secs(8);
const PAYOUT_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP client for the payment gateway
pub struct GatewayClient {
    base_url: String,
    client: Client,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BackendError> {
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(transport_error)?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, BackendError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                backend: BACKEND,
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        response.json::<T>().await.map_err(transport_error)
    }
}

#[async_trait]
impl PaymentGateway for GatewayClient {
    #[instrument(skip(self, description, callback_url))]
    async fn create_receive_address(
        &self,
        amount: i64,
        description: &str,
        callback_url: &str,
    ) -> Result<String, BackendError> {
        let request = ReceiveRequest {
            amount,
            description,
            callback_url,
        };

        let response = self
            .client
            .post(self.url("/receive"))
            .json(&request)
            .timeout(RECEIVE_TIMEOUT)
            .send()
            .await
            .map_err(transport_error)?;

        let receive: ReceiveResponse = Self::read_json(response).await?;
        info!("📬 Receive address allocated for {} atomic units", amount);
        Ok(receive.address)
    }

    async fn get_receive_status(
        &self,
        address: &str,
        min_height: Option<u64>,
        max_height: Option<u64>,
    ) -> Result<ReceiveStatus, BackendError> {
        let mut query = Vec::new();
        if let Some(min) = min_height {
            query.push(("minHeight", min));
        }
        if let Some(max) = max_height {
            query.push(("maxHeight", max));
        }

        let response = self
            .client
            .get(self.url(&format!("/receive/{}", address)))
            .query(&query)
            .timeout(STATUS_TIMEOUT)
            .send()
            .await
            .map_err(transport_error)?;

        Self::read_json(response).await
    }

    #[instrument(skip(self, request), fields(destinations = request.destinations.len()))]
    async fn payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt, BackendError> {
        let response = self
            .client
            .post(self.url("/transfer"))
            .json(request)
            .timeout(PAYOUT_TIMEOUT)
            .send()
            .await
            .map_err(transport_error)?;

        let transfer: GatewayTransferResponse = Self::read_json(response).await?;
        let receipt = transfer.into_receipt();
        debug!("Gateway payout accepted: {}", receipt.tx_hash);
        Ok(receipt)
    }

    async fn health(&self) -> Result<GatewayHealth, BackendError> {
        let response = self
            .client
            .get(self.url("/health"))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(transport_error)?;

        Self::read_json(response).await
    }
}

fn transport_error(error: reqwest::Error) -> BackendError {
    backend_error(BACKEND, error)
}

/// Map a reqwest failure onto the backend taxonomy
pub(crate) fn backend_error(backend: &'static str, error: reqwest::Error) -> BackendError {
    if error.is_timeout() {
        BackendError::Timeout { backend }
    } else {
        BackendError::Transport {
            backend,
            message: error.to_string(),
        }
    }
}

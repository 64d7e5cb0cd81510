use std::sync::Arc;

use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    Json,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::models::*;
use crate::{
    auth::{SessionClaims, TokenService},
    error::{AppResult, BackendError},
    ledger::store::LedgerStore,
    notifications::NotificationHub,
    payments::{PaymentGateway, WalletBackend},
    settlement::{ConfirmationReconciler, SettlementBatcher},
};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn LedgerStore>,
    pub reconciler: Arc<ConfirmationReconciler>,
    pub batcher: Arc<SettlementBatcher>,
    pub hub: Arc<NotificationHub>,
    pub tokens: Arc<TokenService>,
    pub gateway: Option<Arc<dyn PaymentGateway>>,
    pub wallet: Option<Arc<dyn WalletBackend>>,
    /// Template for the callback URL handed to the gateway
    pub callback_url: Option<String>,
    pub shutdown: CancellationToken,
}

impl FromRef<AppState> for Arc<TokenService> {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let postgresql = match state.ledger.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Health check: database unreachable: {}", e);
            false
        }
    };

    let gateway_health = match &state.gateway {
        Some(gateway) => match gateway.health().await {
            Ok(health) => Some(health),
            Err(e) => {
                warn!("Health check: gateway unreachable: {}", e);
                None
            }
        },
        None => None,
    };
    let gateway = gateway_health.map_or(false, |h| h.is_healthy());

    let wallet = match &state.wallet {
        Some(wallet) => wallet.get_balance().await.is_ok(),
        None => gateway_health.map_or(false, |h| h.services.walletrpc),
    };

    let healthy = postgresql
        && (state.gateway.is_none() || gateway)
        && (state.wallet.is_none() || wallet);

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if healthy { "healthy" } else { "degraded" }.to_string(),
            services: ServiceHealth {
                gateway,
                wallet,
                postgresql,
            },
        }),
    )
}

/// GET /vendor/balance
pub async fn get_vendor_balance(
    State(state): State<AppState>,
    claims: SessionClaims,
) -> AppResult<Json<VendorBalanceResponse>> {
    let vendor_id = claims.require_vendor()?;
    let balance = state.ledger.vendor_balance(vendor_id).await?;
    Ok(Json(VendorBalanceResponse { balance }))
}

/// POST /vendor/transfer-balance
pub async fn transfer_balance(
    State(state): State<AppState>,
    claims: SessionClaims,
) -> AppResult<Json<TransferBalanceResponse>> {
    let vendor_id = claims.require_vendor()?;
    info!("Transfer requested by vendor {}", vendor_id);

    let transfer = state.batcher.create_transfer(vendor_id).await?;
    Ok(Json(transfer.into()))
}

/// GET /admin/wallet-balance
pub async fn get_wallet_balance(
    State(state): State<AppState>,
    claims: SessionClaims,
) -> AppResult<Json<WalletBalanceResponse>> {
    claims.require_admin()?;

    let wallet = state
        .wallet
        .as_ref()
        .ok_or(BackendError::NotConfigured { backend: "wallet" })?;
    let balance = wallet.get_balance().await?;
    Ok(Json(balance.into()))
}

use axum::{
    extract::{Path, State},
    Json,
};
use tokio::time::{timeout, Duration};
use tracing::info;

use super::handler::AppState;
use super::models::{CreateTransactionRequest, CreateTransactionResponse};
use crate::{
    auth::{callback_url, SessionClaims},
    error::{AppError, AppResult, BackendError},
    ledger::models::{NewTransaction, Transaction},
    middleware::validate_request,
    notifications::NotificationHub,
};

const RECEIVE_ADDRESS_TIMEOUT: Duration = Duration::from_secs(10);

/// POST /pos/create-transaction
///
/// Persists the sale first, then asks the gateway for a receive address whose
/// callback carries a token scoped to the new sale.
pub async fn create_transaction(
    State(state): State<AppState>,
    claims: SessionClaims,
    Json(request): Json<CreateTransactionRequest>,
) -> AppResult<Json<CreateTransactionResponse>> {
    let (vendor_id, pos_id) = claims.require_pos()?;
    validate_request(&request)?;

    let gateway = state
        .gateway
        .as_ref()
        .ok_or(BackendError::NotConfigured { backend: "gateway" })?;
    let template = state
        .callback_url
        .as_deref()
        .ok_or_else(|| AppError::Config("callback URL is not configured".to_string()))?;

    let transaction = state
        .ledger
        .create_transaction(NewTransaction {
            vendor_id,
            pos_id,
            amount: request.amount,
            required_confirmations: request.required_confirmations,
            currency: request.currency,
            amount_in_currency: request.amount_in_currency,
            description: request.description,
        })
        .await?;

    let token = state.tokens.mint_callback_token(transaction.id)?;
    let callback = callback_url(template, &token);

    let address = timeout(
        RECEIVE_ADDRESS_TIMEOUT,
        gateway.create_receive_address(
            transaction.amount,
            transaction.description.as_deref().unwrap_or_default(),
            &callback,
        ),
    )
    .await??;

    state
        .ledger
        .set_transaction_address(transaction.id, &address)
        .await?;

    info!(
        "🧾 Transaction {} created for vendor {} / POS {}: {} atomic units",
        transaction.id, vendor_id, pos_id, transaction.amount
    );

    Ok(Json(CreateTransactionResponse {
        id: transaction.id,
        address,
    }))
}

/// GET /pos/transaction/:id
pub async fn get_transaction(
    State(state): State<AppState>,
    claims: SessionClaims,
    Path(transaction_id): Path<i64>,
) -> AppResult<Json<Transaction>> {
    claims.require_pos()?;

    let transaction = state
        .ledger
        .find_transaction(transaction_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("transaction {}", transaction_id)))?;
    NotificationHub::authorize(&claims, &transaction)?;

    Ok(Json(transaction))
}

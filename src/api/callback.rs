use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use tracing::debug;

use super::handler::AppState;
use crate::{error::AppResult, payments::models::CallbackPayload};

/// POST /callback/receive/:token and POST /receive/:token
///
/// A malformed body is a validation error (400).
pub async fn receive_callback(
    State(state): State<AppState>,
    Path(token): Path<String>,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let payload: CallbackPayload = serde_json::from_slice(&body)?;
    let outcome = state.reconciler.ingest_callback(&token, payload).await?;

    debug!(
        "Callback for transaction {} handled (changed={})",
        outcome.transaction.id, outcome.changed
    );
    Ok(Json(json!({ "status": "ok" })))
}

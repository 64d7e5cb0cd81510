use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Payment backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Transfer creation and payout errors
#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Vendor {0} already has a transfer in progress")]
    TransferInProgress(i64),

    #[error("Minimum transfer amount is {minimum}, vendor balance is {available}")]
    BelowMinimumPayout { minimum: i64, available: i64 },

    #[error("No transferable transactions for vendor {0}")]
    NothingToTransfer(i64),

    #[error("Vendor {0} has no valid payout address")]
    MissingPayoutAddress(i64),

    #[error("No payout backend configured")]
    NoBackend,

    /// The payout may already be on the network; the batch must not be paid again
    #[error("Payout outcome unknown: {0}")]
    PayoutIndeterminate(String),
}

/// Failures talking to the wallet RPC or the payment gateway
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{backend} request timed out")]
    Timeout { backend: &'static str },

    #[error("{backend} returned HTTP {status}: {body}")]
    Status {
        backend: &'static str,
        status: u16,
        body: String,
    },

    #[error("{backend} RPC error {code}: {message}")]
    Rpc {
        backend: &'static str,
        code: i64,
        message: String,
    },

    #[error("{backend} transport error: {message}")]
    Transport {
        backend: &'static str,
        message: String,
    },

    #[error("{backend} is not configured")]
    NotConfigured { backend: &'static str },

    #[error("Wallet RPC failed ({wallet}) and gateway payout failed ({gateway})")]
    AllBackendsFailed { wallet: String, gateway: String },
}

impl BackendError {
    /// The wallet RPC is up but has no wallet file open
    pub fn is_wallet_not_open(&self) -> bool {
        match self {
            BackendError::Rpc { message, .. } => {
                let message = message.to_lowercase();
                message.contains("no wallet") || message.contains("wallet does not exist")
            }
            _ => false,
        }
    }
}

/// Bearer and callback token errors
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Token is required")]
    Missing,

    #[error("Token expired")]
    Expired,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("Token generation failed: {0}")]
    Generation(String),
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
                None,
            ),
            AppError::Unauthorized(reason) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                reason,
                None,
            ),
            AppError::Token(err) => (
                StatusCode::UNAUTHORIZED,
                "INVALID_TOKEN",
                err.to_string(),
                None,
            ),
            AppError::Validation(reason) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED",
                reason,
                None,
            ),
            AppError::Conflict(reason) => (
                StatusCode::CONFLICT,
                "CONFLICT",
                reason,
                None,
            ),
            AppError::Settlement(SettlementError::TransferInProgress(vendor_id)) => (
                StatusCode::CONFLICT,
                "TRANSFER_IN_PROGRESS",
                "Transfer already in progress for this vendor".to_string(),
                Some(serde_json::json!({ "vendor_id": vendor_id })),
            ),
            AppError::Settlement(SettlementError::BelowMinimumPayout { minimum, available }) => (
                StatusCode::BAD_REQUEST,
                "BELOW_MINIMUM_PAYOUT",
                format!("Minimum transfer amount is {} atomic units", minimum),
                Some(serde_json::json!({
                    "minimum": minimum,
                    "available": available,
                })),
            ),
            AppError::Settlement(err @ SettlementError::NothingToTransfer(_))
            | AppError::Settlement(err @ SettlementError::MissingPayoutAddress(_)) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED",
                err.to_string(),
                None,
            ),
            AppError::Backend(BackendError::Timeout { backend }) => (
                StatusCode::GATEWAY_TIMEOUT,
                "UPSTREAM_TIMEOUT",
                format!("{} did not respond in time", backend),
                None,
            ),
            AppError::Backend(_)
            | AppError::Settlement(SettlementError::NoBackend)
            | AppError::Settlement(SettlementError::PayoutIndeterminate(_)) => (
                StatusCode::BAD_GATEWAY,
                "UPSTREAM_UNAVAILABLE",
                "Payment backend unavailable".to_string(),
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Validation(format!("Malformed JSON: {}", error))
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(error: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match error.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            _ => TokenError::Invalid(error.to_string()),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            AppError::Backend(BackendError::Timeout { backend: "http" })
        } else {
            AppError::Backend(BackendError::Transport {
                backend: "http",
                message: error.to_string(),
            })
        }
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        AppError::Backend(BackendError::Timeout { backend: "upstream" })
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("{:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;

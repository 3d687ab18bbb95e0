use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::ledger::models::PlayerAssetStatus;
use crate::settlement::progress::SettlementPhase;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("External error: {0}")]
    ExternalError(String),
}

/// Ledger-related errors
///
/// Every balance mutation failure is reported through one of these variants;
/// the settlement engine inspects them to decide whether to abort the
/// enclosing batch transaction.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Amount out of range: {0}")]
    AmountOutOfRange(i64),

    #[error("Balance overflow")]
    Overflow,

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("Asset not found: {0}")]
    AssetNotFound(Uuid),

    #[error("Asset is inactive: {0}")]
    AssetInactive(Uuid),

    #[error("Player asset is not usable: status {0:?}")]
    AccountNotUsable(PlayerAssetStatus),
}

/// Settlement pipeline errors
#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Poll not found: {0}")]
    PollNotFound(Uuid),

    #[error("Poll {0} has not closed yet")]
    NotYetClosed(Uuid),

    #[error("Poll {0} is already settled")]
    AlreadySettled(Uuid),

    #[error("Settlement progress missing for poll {0}")]
    MissingProgress(Uuid),

    #[error("Corrupt settlement progress: {0}")]
    CorruptProgress(String),

    #[error("Invalid phase transition: {from:?} -> {to:?}")]
    InvalidPhase {
        from: SettlementPhase,
        to: SettlementPhase,
    },

    #[error("Tick budget exceeded after {elapsed_ms}ms")]
    TimeBudgetExceeded { elapsed_ms: u64 },
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
            AppError::Ledger(LedgerError::InsufficientBalance { required, available }) => (
                StatusCode::BAD_REQUEST,
                "INSUFFICIENT_BALANCE",
                "Insufficient balance".to_string(),
                Some(serde_json::json!({
                    "required": required,
                    "available": available,
                })),
            ),
            AppError::Ledger(LedgerError::Overflow) => (
                StatusCode::BAD_REQUEST,
                "BALANCE_OVERFLOW",
                "Balance mutation would overflow".to_string(),
                None,
            ),
            AppError::Ledger(LedgerError::AssetNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "ASSET_NOT_FOUND",
                format!("Asset not found: {}", id),
                None,
            ),
            AppError::Ledger(LedgerError::AssetInactive(id)) => (
                StatusCode::CONFLICT,
                "ASSET_INACTIVE",
                format!("Asset is inactive: {}", id),
                None,
            ),
            AppError::Ledger(LedgerError::AccountNotUsable(status)) => (
                StatusCode::CONFLICT,
                "ACCOUNT_NOT_USABLE",
                format!("Player asset is not usable: {:?}", status),
                None,
            ),
            AppError::Settlement(SettlementError::PollNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "POLL_NOT_FOUND",
                format!("Poll not found: {}", id),
                None,
            ),
            AppError::Settlement(SettlementError::AlreadySettled(id)) => (
                StatusCode::CONFLICT,
                "ALREADY_SETTLED",
                format!("Poll is already settled: {}", id),
                None,
            ),
            AppError::Settlement(SettlementError::NotYetClosed(id)) => (
                StatusCode::BAD_REQUEST,
                "NOT_YET_CLOSED",
                format!("Poll has not closed yet: {}", id),
                None,
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                msg,
                None,
            ),
            AppError::InvalidInput(msg) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                msg,
                None,
            ),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                msg,
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

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::ExternalError(format!("HTTP request error: {:?}", error))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON serialization error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;

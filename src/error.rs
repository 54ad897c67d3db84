use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::{
    credential::CredentialError, entitlement_store::StoreError, issuance::IssuanceError,
    qr_generator::QrGenerationError,
};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl From<IssuanceError> for AppError {
    fn from(err: IssuanceError) -> Self {
        match err {
            IssuanceError::StoreError(e) => AppError::Store(e),
            IssuanceError::CredentialError(e) => AppError::Internal(e.into()),
            IssuanceError::TicketNotFound => AppError::NotFound("Ticket not found".to_string()),
            IssuanceError::NotEntitled(day) => {
                AppError::NotFound(format!("Ticket has no entitlement on {}", day))
            }
            IssuanceError::TicketInactive => AppError::Conflict("Ticket is not active".to_string()),
            IssuanceError::AlreadyIssued => {
                AppError::Conflict("Ticket already holds its entitlements".to_string())
            }
            IssuanceError::InvalidPlan(msg) => AppError::Validation(msg),
        }
    }
}

impl From<QrGenerationError> for AppError {
    fn from(err: QrGenerationError) -> Self {
        AppError::Internal(err.into())
    }
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        AppError::Internal(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Faults, not decisions: the scanning device should retry
            AppError::Store(e) => {
                tracing::error!(error = %e, "Store failure");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "store_unavailable",
                    "Ticket store unavailable, please retry".to_string(),
                )
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            AppError::Internal(e) => {
                tracing::error!(error = ?e, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

//! Error responses for the participant API.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::domain::errors::DomainError;

/// Seconds a client should wait before repeating a retryable request.
const RETRY_AFTER_SECS: &str = "1";

/// Error body returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    #[error("Invalid header {name}: {value}")]
    InvalidHeader { name: &'static str, value: String },

    #[error("Unknown task: {0}")]
    UnknownTask(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingHeader(_) | Self::InvalidHeader { .. } => StatusCode::BAD_REQUEST,
            Self::UnknownTask(_) => StatusCode::NOT_FOUND,
            Self::Domain(err) if err.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Domain(err) => match err {
                DomainError::ValidationFailed(_)
                | DomainError::DimensionMismatch { .. }
                | DomainError::InvalidChoice(_)
                | DomainError::UnknownCategory(_)
                | DomainError::InvalidCovariance(_) => StatusCode::BAD_REQUEST,
                DomainError::NotYourTurn { .. } => StatusCode::CONFLICT,
                DomainError::ChainNotFound(_) => StatusCode::NOT_FOUND,
                DomainError::GatekeeperLoad { .. }
                | DomainError::GatekeeperRejectionLoop { .. }
                | DomainError::Persistence(_)
                | DomainError::SerializationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Whether repeating the same request unchanged may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Domain(err) if err.is_retryable())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingHeader(_) => "MISSING_HEADER",
            Self::InvalidHeader { .. } => "INVALID_HEADER",
            Self::UnknownTask(_) => "UNKNOWN_TASK",
            Self::Domain(err) => match err {
                DomainError::Persistence(_) => "PERSISTENCE_ERROR",
                DomainError::ValidationFailed(_) => "VALIDATION_ERROR",
                DomainError::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
                DomainError::InvalidChoice(_) => "INVALID_CHOICE",
                DomainError::UnknownCategory(_) => "UNKNOWN_CATEGORY",
                DomainError::InvalidCovariance(_) => "INVALID_COVARIANCE",
                DomainError::NotYourTurn { .. } => "NOT_YOUR_TURN",
                DomainError::ChainNotFound(_) => "CHAIN_NOT_FOUND",
                DomainError::GatekeeperLoad { .. } => "GATEKEEPER_LOAD",
                DomainError::GatekeeperRejectionLoop { .. } => "GATEKEEPER_REJECTION_LOOP",
                DomainError::SerializationError(_) => "SERIALIZATION_ERROR",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        } else {
            tracing::debug!(error = %self, code = self.code(), "request rejected");
        }
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        };
        if self.is_retryable() {
            return (status, [(header::RETRY_AFTER, RETRY_AFTER_SECS)], Json(body)).into_response();
        }
        (status, Json(body)).into_response()
    }
}

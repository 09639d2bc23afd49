//! Webhook ingestion errors.
//!
//! Each error maps to the HTTP status the gateway sees. 2xx acknowledges
//! the delivery, 4xx rejects it for good, 5xx asks the gateway to redeliver.

use axum::http::StatusCode;
use thiserror::Error;

use crate::domain::foundation::DomainError;

#[derive(Debug, Error)]
pub enum WebhookError {
    /// No adapter is registered under the gateway id in the route.
    #[error("Unknown gateway: {0}")]
    UnknownGateway(String),

    #[error("Missing signature header")]
    MissingSignature,

    #[error("Invalid signature")]
    InvalidSignature,

    /// Signed more than five minutes ago.
    #[error("Timestamp out of range")]
    TimestampOutOfRange,

    /// Signed in the future beyond the allowed clock skew.
    #[error("Invalid timestamp")]
    InvalidTimestamp,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// Acknowledged without state change.
    #[error("Event ignored: {0}")]
    Ignored(String),

    #[error("Processing failed: {0}")]
    Processing(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl WebhookError {
    /// True when a redelivery may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WebhookError::Database(_) | WebhookError::Processing(_))
    }

    /// True when the payload never got past authentication/parsing.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            WebhookError::MissingSignature
                | WebhookError::InvalidSignature
                | WebhookError::TimestampOutOfRange
                | WebhookError::InvalidTimestamp
                | WebhookError::ParseError(_)
                | WebhookError::MissingField(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::UnknownGateway(_) => StatusCode::NOT_FOUND,

            WebhookError::MissingSignature
            | WebhookError::InvalidSignature
            | WebhookError::TimestampOutOfRange
            | WebhookError::InvalidTimestamp
            | WebhookError::ParseError(_)
            | WebhookError::MissingField(_) => StatusCode::BAD_REQUEST,

            WebhookError::Ignored(_) => StatusCode::OK,

            WebhookError::Processing(_) | WebhookError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<DomainError> for WebhookError {
    fn from(err: DomainError) -> Self {
        WebhookError::Database(err.to_string())
    }
}

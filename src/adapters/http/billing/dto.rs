//! Response bodies for the billing endpoints.

use serde::Serialize;

use crate::domain::webhook::WebhookOutcome;

/// Body returned for every accepted webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<WebhookOutcome> for WebhookAck {
    fn from(outcome: WebhookOutcome) -> Self {
        match outcome {
            WebhookOutcome::Processed => Self {
                status: "processed",
                reason: None,
            },
            WebhookOutcome::Duplicate => Self {
                status: "duplicate",
                reason: None,
            },
            WebhookOutcome::Ignored(reason) => Self {
                status: "ignored",
                reason: Some(reason),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Standard error response body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub error_code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
        }
    }
}

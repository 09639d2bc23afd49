//! GatewayAdapter port - the pluggable payment-provider strategy.
//!
//! One implementation per provider. The engine only ever charges a vaulted
//! token and reads webhooks through this trait; the provider's wire
//! protocol stays inside the adapter.

use async_trait::async_trait;
use http::HeaderMap;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::domain::billing::{ChargeFailure, FailureReason};
use crate::domain::foundation::{Money, OrderId, SubscriptionId};
use crate::domain::webhook::{NormalizedEvent, WebhookError};

#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    /// Stable id used in routes and stored on payment methods.
    fn gateway_id(&self) -> &str;

    /// Charges a vaulted token.
    ///
    /// A declined charge is `Ok` with `ChargeStatus::Failed`; `Err` means the
    /// call itself did not complete (transport, auth, provider outage).
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeOutcome, GatewayError>;

    /// Checks transport-level authenticity of a webhook.
    fn verify_webhook(&self, payload: &[u8], headers: &HeaderMap) -> Result<(), WebhookError>;

    /// Parses a verified webhook body.
    fn parse_webhook(&self, payload: &[u8]) -> Result<NormalizedEvent, WebhookError>;
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub subscription_id: SubscriptionId,
    pub order_id: OrderId,
    pub token: SecretString,
    pub amount: Money,
    pub idempotency_key: String,
    pub gateway_customer_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeOutcome {
    pub status: ChargeStatus,
    pub transaction_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl ChargeOutcome {
    pub fn succeeded(transaction_id: impl Into<String>) -> Self {
        Self {
            status: ChargeStatus::Succeeded,
            transaction_id: Some(transaction_id.into()),
            error_code: None,
            error_message: None,
        }
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: ChargeStatus::Failed,
            transaction_id: None,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
        }
    }

    pub fn with_transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }
}

/// Gateway call error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorCode {
    NetworkError,
    Timeout,
    Unavailable,
    AuthenticationError,
    InvalidRequest,
    ProviderError,
}

impl fmt::Display for GatewayErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GatewayErrorCode::NetworkError => "network_error",
            GatewayErrorCode::Timeout => "timeout",
            GatewayErrorCode::Unavailable => "gateway_unavailable",
            GatewayErrorCode::AuthenticationError => "authentication_error",
            GatewayErrorCode::InvalidRequest => "invalid_request",
            GatewayErrorCode::ProviderError => "provider_error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct GatewayError {
    pub code: GatewayErrorCode,
    pub message: String,
    /// Provider's own error code, when it sent one.
    pub provider_code: Option<String>,
}

impl GatewayError {
    pub fn new(code: GatewayErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider_code: None,
        }
    }

    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::NetworkError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::Timeout, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::AuthenticationError, message)
    }

    /// Classifies the error for the retry engine.
    pub fn to_failure(&self) -> ChargeFailure {
        let reason = match self.code {
            GatewayErrorCode::NetworkError | GatewayErrorCode::Timeout => {
                FailureReason::NetworkError
            }
            GatewayErrorCode::Unavailable => FailureReason::GatewayUnavailable,
            GatewayErrorCode::AuthenticationError => FailureReason::AuthenticationError,
            GatewayErrorCode::InvalidRequest | GatewayErrorCode::ProviderError => {
                FailureReason::classify(self.provider_code.as_deref(), Some(&self.message))
            }
        };
        ChargeFailure {
            reason,
            code: self
                .provider_code
                .clone()
                .unwrap_or_else(|| self.code.to_string()),
            message: self.message.clone(),
        }
    }
}

/// Adapters registered at startup, looked up by gateway id.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    adapters: HashMap<String, Arc<dyn GatewayAdapter>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, adapter: Arc<dyn GatewayAdapter>) -> Self {
        self.adapters.insert(adapter.gateway_id().to_string(), adapter);
        self
    }

    pub fn get(&self, gateway_id: &str) -> Option<Arc<dyn GatewayAdapter>> {
        self.adapters.get(gateway_id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

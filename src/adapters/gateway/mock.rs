//! Mock gateway for tests and database-less local runs.
//!
//! Charges pop scripted outcomes in order and succeed once the script is
//! empty. Webhooks use the same `t=..,v1=..` HMAC scheme as Stripe under the
//! `Mock-Signature` header, with a small JSON envelope:
//!
//! ```json
//! {"id": "evt_1", "type": "payment.succeeded", "subscription_id": "...",
//!  "order_id": "...", "transaction_id": "...", "error_code": "...",
//!  "error_message": "...", "created": 1704067200}
//! ```

use async_trait::async_trait;
use http::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::domain::foundation::{Money, OrderId, SubscriptionId, Timestamp};
use crate::domain::webhook::{
    HmacSignatureVerifier, NormalizedEvent, WebhookError, WebhookEventType,
};
use crate::ports::{ChargeOutcome, ChargeRequest, GatewayAdapter, GatewayError};

pub const MOCK_SIGNATURE_HEADER: &str = "mock-signature";

/// A recorded `charge` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCharge {
    pub subscription_id: SubscriptionId,
    pub order_id: OrderId,
    pub amount: Money,
    pub idempotency_key: String,
    pub token: String,
}

#[derive(Default)]
struct MockState {
    script: VecDeque<Result<ChargeOutcome, GatewayError>>,
    calls: Vec<MockCharge>,
    latency: Option<Duration>,
    sequence: u64,
}

pub struct MockGateway {
    gateway_id: String,
    verifier: HmacSignatureVerifier,
    state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new(gateway_id: impl Into<String>, webhook_secret: SecretString) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            verifier: HmacSignatureVerifier::new(webhook_secret),
            state: Mutex::new(MockState::default()),
        }
    }

    /// `"mock"` with a fixed test secret.
    pub fn default_for_tests() -> Self {
        Self::new("mock", SecretString::new("mock_webhook_secret".to_string()))
    }

    // === Scripting ===

    /// Queues the result of the next unscripted `charge` call.
    pub fn push_outcome(&self, outcome: Result<ChargeOutcome, GatewayError>) {
        self.state().script.push_back(outcome);
    }

    /// Queues a decline with the gateway's raw code and message.
    pub fn push_decline(&self, code: &str, message: &str) {
        self.push_outcome(Ok(ChargeOutcome::failed(code, message)));
    }

    pub fn push_success(&self, transaction_id: &str) {
        self.push_outcome(Ok(ChargeOutcome::succeeded(transaction_id)));
    }

    /// Makes every subsequent charge sleep before answering.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state().latency = latency;
    }

    // === Inspection ===

    pub fn calls(&self) -> Vec<MockCharge> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    /// Signs `payload` the way this gateway's webhooks are signed.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, WebhookError> {
        self.verifier.sign(payload, timestamp)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Deserialize)]
struct MockEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    subscription_id: Option<String>,
    order_id: Option<String>,
    transaction_id: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    created: Option<i64>,
}

#[async_trait]
impl GatewayAdapter for MockGateway {
    fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    async fn charge(&self, request: ChargeRequest) -> Result<ChargeOutcome, GatewayError> {
        let (latency, scripted, sequence) = {
            let mut state = self.state();
            state.calls.push(MockCharge {
                subscription_id: request.subscription_id,
                order_id: request.order_id,
                amount: request.amount.clone(),
                idempotency_key: request.idempotency_key.clone(),
                token: request.token.expose_secret().clone(),
            });
            state.sequence += 1;
            (state.latency, state.script.pop_front(), state.sequence)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        scripted.unwrap_or_else(|| Ok(ChargeOutcome::succeeded(format!("mock_txn_{}", sequence))))
    }

    fn verify_webhook(&self, payload: &[u8], headers: &HeaderMap) -> Result<(), WebhookError> {
        let header = headers
            .get(MOCK_SIGNATURE_HEADER)
            .ok_or(WebhookError::MissingSignature)?
            .to_str()
            .map_err(|_| WebhookError::ParseError("signature header is not ASCII".to_string()))?;
        self.verifier
            .verify(payload, header, Timestamp::now().as_unix_secs())
    }

    fn parse_webhook(&self, payload: &[u8]) -> Result<NormalizedEvent, WebhookError> {
        let event: MockEvent = serde_json::from_slice(payload)
            .map_err(|e| WebhookError::ParseError(format!("Invalid JSON: {}", e)))?;
        if event.id.is_empty() {
            return Err(WebhookError::MissingField("id"));
        }

        let event_type = match event.event_type.as_str() {
            "payment.succeeded" => WebhookEventType::PaymentSucceeded,
            "payment.failed" => WebhookEventType::PaymentFailed,
            "subscription.cancelled" => WebhookEventType::SubscriptionCancelled,
            "subscription.suspended" => WebhookEventType::SubscriptionSuspended,
            other => WebhookEventType::Other(other.to_string()),
        };

        Ok(NormalizedEvent {
            event_id: event.id,
            event_type,
            raw_type: event.event_type,
            subscription_id: event.subscription_id.and_then(|s| s.parse().ok()),
            order_id: event.order_id.and_then(|s| s.parse().ok()),
            transaction_id: event.transaction_id,
            error_code: event.error_code,
            error_message: event.error_message,
            occurred_at: event
                .created
                .and_then(Timestamp::from_unix_secs)
                .unwrap_or_else(Timestamp::now),
        })
    }
}

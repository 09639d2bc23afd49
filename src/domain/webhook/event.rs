//! Normalized gateway events and the stored webhook record.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{OrderId, SubscriptionId, Timestamp};

/// Gateway-independent event categories the correlator acts on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    PaymentSucceeded,
    PaymentFailed,
    SubscriptionCancelled,
    SubscriptionSuspended,
    /// Recorded for audit, acknowledged, not acted on.
    Other(String),
}

impl WebhookEventType {
    pub fn as_str(&self) -> &str {
        match self {
            WebhookEventType::PaymentSucceeded => "payment_succeeded",
            WebhookEventType::PaymentFailed => "payment_failed",
            WebhookEventType::SubscriptionCancelled => "subscription_cancelled",
            WebhookEventType::SubscriptionSuspended => "subscription_suspended",
            WebhookEventType::Other(raw) => raw,
        }
    }
}

/// Output of a gateway adapter's webhook parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub event_id: String,
    pub event_type: WebhookEventType,
    /// The gateway's own type string, kept for the audit record.
    pub raw_type: String,
    pub subscription_id: Option<SubscriptionId>,
    pub order_id: Option<OrderId>,
    /// Gateway transaction reference for fallback correlation.
    pub transaction_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub occurred_at: Timestamp,
}

/// Stored inbound event. `(gateway_id, event_id)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub gateway_id: String,
    pub event_id: String,
    pub event_type: String,
    pub subscription_id: Option<SubscriptionId>,
    pub order_id: Option<OrderId>,
    pub payload: serde_json::Value,
    pub processed: bool,
    /// Set while a worker holds the event; cleared when processing fails.
    pub claimed_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub processed_at: Option<Timestamp>,
}

impl WebhookEvent {
    pub fn received(
        gateway_id: &str,
        event: &NormalizedEvent,
        payload: serde_json::Value,
        now: Timestamp,
    ) -> Self {
        Self {
            gateway_id: gateway_id.to_string(),
            event_id: event.event_id.clone(),
            event_type: event.raw_type.clone(),
            subscription_id: event.subscription_id,
            order_id: event.order_id,
            payload,
            processed: false,
            claimed_at: Some(now),
            last_error: None,
            created_at: now,
            processed_at: None,
        }
    }
}

/// Result of trying to take ownership of an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResult {
    /// This delivery owns the event and must process it.
    Claimed,
    /// A previous delivery already processed it.
    AlreadyProcessed,
    /// Another delivery is processing it right now.
    InFlight,
}

/// Successful outcome of `ingest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    Duplicate,
    Ignored(String),
}

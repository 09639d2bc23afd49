//! Stripe gateway adapter.
//!
//! Renewals are charged as off-session PaymentIntents confirmed in the same
//! request, keyed by the renewal order's idempotency key. Webhooks are
//! verified with the `Stripe-Signature` HMAC scheme and normalized from
//! `payment_intent.*` and `customer.subscription.*` events carrying our
//! ids in `metadata`.

use async_trait::async_trait;
use http::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;

use crate::domain::foundation::Timestamp;
use crate::domain::webhook::{
    HmacSignatureVerifier, NormalizedEvent, WebhookError, WebhookEventType,
};
use crate::ports::{
    ChargeOutcome, ChargeRequest, GatewayAdapter, GatewayError, GatewayErrorCode,
};

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Clone)]
pub struct StripeConfig {
    /// Secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,

    /// Webhook signing secret (whsec_...).
    webhook_secret: SecretString,

    api_base_url: String,

    /// Reject test-mode events.
    require_livemode: bool,
}

impl StripeConfig {
    pub fn new(api_key: SecretString, webhook_secret: SecretString) -> Self {
        Self {
            api_key,
            webhook_secret,
            api_base_url: "https://api.stripe.com".to_string(),
            require_livemode: false,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_require_livemode(mut self, require: bool) -> Self {
        self.require_livemode = require;
        self
    }
}

pub struct StripeGateway {
    config: StripeConfig,
    verifier: HmacSignatureVerifier,
    http_client: reqwest::Client,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            verifier: HmacSignatureVerifier::new(config.webhook_secret.clone()),
            config,
            http_client: reqwest::Client::new(),
        }
    }

    fn map_send_error(err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::timeout(err.to_string())
        } else {
            GatewayError::network(err.to_string())
        }
    }

    /// Turns a non-2xx PaymentIntent response into an outcome or error.
    ///
    /// Card errors (402) are declines and come back as a failed outcome so
    /// the decline code reaches the classifier; everything else is a
    /// gateway-level error.
    fn map_error_response(
        status: reqwest::StatusCode,
        body: &str,
    ) -> Result<ChargeOutcome, GatewayError> {
        let parsed: Option<StripeErrorBody> = serde_json::from_str(body).ok();
        let error = parsed.map(|b| b.error).unwrap_or_default();
        let provider_code = error
            .decline_code
            .clone()
            .or_else(|| error.code.clone())
            .unwrap_or_else(|| error.error_type.clone().unwrap_or_default());
        let message = error
            .message
            .clone()
            .unwrap_or_else(|| format!("Stripe API error ({})", status));

        if status == reqwest::StatusCode::PAYMENT_REQUIRED
            || error.error_type.as_deref() == Some("card_error")
        {
            let mut outcome = ChargeOutcome::failed(provider_code, message);
            if let Some(intent) = error.payment_intent {
                outcome = outcome.with_transaction_id(intent.id);
            }
            return Ok(outcome);
        }

        let code = match status.as_u16() {
            401 | 403 => GatewayErrorCode::AuthenticationError,
            429 | 500..=599 => GatewayErrorCode::Unavailable,
            400 | 404 => GatewayErrorCode::InvalidRequest,
            _ => GatewayErrorCode::ProviderError,
        };
        let mut err = GatewayError::new(code, message);
        if !provider_code.is_empty() {
            err = err.with_provider_code(provider_code);
        }
        Err(err)
    }
}

#[async_trait]
impl GatewayAdapter for StripeGateway {
    fn gateway_id(&self) -> &str {
        "stripe"
    }

    async fn charge(&self, request: ChargeRequest) -> Result<ChargeOutcome, GatewayError> {
        let url = format!("{}/v1/payment_intents", self.config.api_base_url);

        let mut params = vec![
            ("amount", request.amount.amount_minor().to_string()),
            ("currency", request.amount.currency().to_ascii_lowercase()),
            ("payment_method", request.token.expose_secret().clone()),
            ("off_session", "true".to_string()),
            ("confirm", "true".to_string()),
            ("metadata[subscription_id]", request.subscription_id.to_string()),
            ("metadata[order_id]", request.order_id.to_string()),
        ];
        if let Some(customer) = &request.gateway_customer_id {
            params.push(("customer", customer.clone()));
        }

        let response = self
            .http_client
            .post(&url)
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&params)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        let body = response.text().await.map_err(Self::map_send_error)?;

        if !status.is_success() {
            tracing::warn!(
                subscription_id = %request.subscription_id,
                order_id = %request.order_id,
                status = status.as_u16(),
                "Stripe charge rejected"
            );
            return Self::map_error_response(status, &body);
        }

        let intent: StripePaymentIntent = serde_json::from_str(&body).map_err(|e| {
            GatewayError::new(
                GatewayErrorCode::ProviderError,
                format!("Failed to parse Stripe response: {}", e),
            )
        })?;

        match intent.status.as_str() {
            "succeeded" => Ok(ChargeOutcome::succeeded(intent.id)),
            other => {
                let (code, message) = match intent.last_payment_error {
                    Some(err) => (
                        err.decline_code.or(err.code).unwrap_or_else(|| other.to_string()),
                        err.message.unwrap_or_else(|| format!("payment intent {}", other)),
                    ),
                    None => (other.to_string(), format!("payment intent {}", other)),
                };
                Ok(ChargeOutcome::failed(code, message).with_transaction_id(intent.id))
            }
        }
    }

    fn verify_webhook(&self, payload: &[u8], headers: &HeaderMap) -> Result<(), WebhookError> {
        let header = headers
            .get(STRIPE_SIGNATURE_HEADER)
            .ok_or(WebhookError::MissingSignature)?
            .to_str()
            .map_err(|_| WebhookError::ParseError("signature header is not ASCII".to_string()))?;

        self.verifier
            .verify(payload, header, Timestamp::now().as_unix_secs())
            .map_err(|e| {
                tracing::warn!(error = %e, "Stripe webhook signature rejected");
                e
            })
    }

    fn parse_webhook(&self, payload: &[u8]) -> Result<NormalizedEvent, WebhookError> {
        let event: StripeEvent = serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(error = %e, "Failed to parse Stripe webhook payload");
            WebhookError::ParseError(format!("Invalid JSON: {}", e))
        })?;

        if self.config.require_livemode && !event.livemode {
            return Err(WebhookError::ParseError(
                "test mode events not allowed".to_string(),
            ));
        }

        let event_type = match event.event_type.as_str() {
            "payment_intent.succeeded" => WebhookEventType::PaymentSucceeded,
            "payment_intent.payment_failed" => WebhookEventType::PaymentFailed,
            "customer.subscription.deleted" => WebhookEventType::SubscriptionCancelled,
            "customer.subscription.paused" => WebhookEventType::SubscriptionSuspended,
            other => WebhookEventType::Other(other.to_string()),
        };

        let object: StripeObject = serde_json::from_value(event.data.object)
            .map_err(|e| WebhookError::ParseError(format!("Invalid event object: {}", e)))?;

        let is_payment = matches!(
            event_type,
            WebhookEventType::PaymentSucceeded | WebhookEventType::PaymentFailed
        );
        let (error_code, error_message) = match object.last_payment_error {
            Some(err) => (err.decline_code.or(err.code), err.message),
            None => (None, None),
        };

        Ok(NormalizedEvent {
            event_id: event.id,
            event_type,
            raw_type: event.event_type,
            subscription_id: object
                .metadata
                .get("subscription_id")
                .and_then(|s| s.parse().ok()),
            order_id: object.metadata.get("order_id").and_then(|s| s.parse().ok()),
            transaction_id: if is_payment { object.id } else { None },
            error_code,
            error_message,
            occurred_at: Timestamp::from_unix_secs(event.created).unwrap_or_else(Timestamp::now),
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Wire types
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    #[serde(default)]
    livemode: bool,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

/// The fields we read from a PaymentIntent or Subscription object.
#[derive(Debug, Deserialize)]
struct StripeObject {
    id: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    last_payment_error: Option<StripeApiError>,
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    status: String,
    last_payment_error: Option<StripeApiError>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeApiError,
}

#[derive(Debug, Default, Deserialize)]
struct StripeApiError {
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<String>,
    decline_code: Option<String>,
    message: Option<String>,
    payment_intent: Option<StripeIntentRef>,
}

#[derive(Debug, Deserialize)]
struct StripeIntentRef {
    id: String,
}

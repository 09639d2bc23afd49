//! Payment gateway configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::gateway::{MockGateway, StripeConfig, StripeGateway};
use crate::ports::GatewayRegistry;

use super::error::ValidationError;

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Stripe secret API key; Stripe is registered only when set
    pub stripe_api_key: Option<SecretString>,

    /// Stripe webhook signing secret
    pub stripe_webhook_secret: Option<SecretString>,

    /// Overrides the Stripe API base URL (stripe-mock, proxies)
    pub stripe_api_base_url: Option<String>,

    /// Reject Stripe test-mode webhook events
    #[serde(default)]
    pub stripe_require_livemode: bool,

    /// Registers the scripted `mock` gateway under this webhook secret
    pub mock_webhook_secret: Option<SecretString>,

    /// Upper bound on a single charge call
    #[serde(default = "default_charge_timeout")]
    pub charge_timeout_secs: u64,
}

impl GatewayConfig {
    pub fn charge_timeout(&self) -> Duration {
        Duration::from_secs(self.charge_timeout_secs)
    }

    pub fn is_stripe_test_mode(&self) -> bool {
        self.stripe_api_key
            .as_ref()
            .is_some_and(|k| k.expose_secret().starts_with("sk_test_"))
    }

    /// Adapters for every configured gateway.
    pub fn registry(&self) -> GatewayRegistry {
        let mut registry = GatewayRegistry::new();
        if let (Some(api_key), Some(secret)) = (&self.stripe_api_key, &self.stripe_webhook_secret) {
            let mut config = StripeConfig::new(api_key.clone(), secret.clone())
                .with_require_livemode(self.stripe_require_livemode);
            if let Some(url) = &self.stripe_api_base_url {
                config = config.with_base_url(url.clone());
            }
            registry = registry.register(Arc::new(StripeGateway::new(config)));
        }
        if let Some(secret) = &self.mock_webhook_secret {
            registry = registry.register(Arc::new(MockGateway::new("mock", secret.clone())));
        }
        registry
    }

    pub fn validate(&self, production: bool) -> Result<(), ValidationError> {
        if self.charge_timeout_secs == 0 {
            return Err(ValidationError::MustBePositive("gateways.charge_timeout_secs"));
        }
        match (&self.stripe_api_key, &self.stripe_webhook_secret) {
            (Some(key), Some(secret)) => {
                if !key.expose_secret().starts_with("sk_") {
                    return Err(ValidationError::InvalidStripeKey);
                }
                if !secret.expose_secret().starts_with("whsec_") {
                    return Err(ValidationError::InvalidStripeWebhookSecret);
                }
            }
            (Some(_), None) => {
                return Err(ValidationError::MissingRequired("GATEWAYS__STRIPE_WEBHOOK_SECRET"))
            }
            (None, Some(_)) => {
                return Err(ValidationError::MissingRequired("GATEWAYS__STRIPE_API_KEY"))
            }
            (None, None) => {}
        }
        if production && self.mock_webhook_secret.is_some() {
            return Err(ValidationError::NotAllowedInProduction(
                "GATEWAYS__MOCK_WEBHOOK_SECRET",
            ));
        }
        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            stripe_api_key: None,
            stripe_webhook_secret: None,
            stripe_api_base_url: None,
            stripe_require_livemode: false,
            mock_webhook_secret: None,
            charge_timeout_secs: default_charge_timeout(),
        }
    }
}

fn default_charge_timeout() -> u64 {
    30
}

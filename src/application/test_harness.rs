//! Shared fixture for the application tests: every service wired to the
//! in-memory adapters, a recording bus and the mock gateway.

use http::HeaderMap;
use secrecy::SecretString;
use std::sync::Arc;

use crate::adapters::crypto::AesGcmTokenCipher;
use crate::adapters::events::NotificationBus;
use crate::adapters::gateway::{MockGateway, MOCK_SIGNATURE_HEADER};
use crate::adapters::memory::InMemoryPorts;
use crate::domain::billing::SavePaymentMethod;
use crate::domain::foundation::{SubscriptionId, Timestamp};
use crate::domain::subscription::test_support::{at, monthly_params};
use crate::domain::subscription::Subscription;
use crate::ports::GatewayRegistry;

use super::handlers::subscription::CreateSubscriptionCommand;
use super::{BillingServices, BillingSettings};

pub(crate) struct Harness {
    pub services: BillingServices,
    pub memory: InMemoryPorts,
    pub bus: Arc<NotificationBus>,
    pub gateway: Arc<MockGateway>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(BillingSettings::default())
    }

    pub fn with_grace_days(days: u32) -> Self {
        Self::with_settings(BillingSettings {
            grace_days: days,
            ..BillingSettings::default()
        })
    }

    pub fn with_settings(settings: BillingSettings) -> Self {
        let memory = InMemoryPorts::recording();
        let bus = memory.bus.clone();
        let gateway = Arc::new(MockGateway::default_for_tests());
        let cipher = Arc::new(AesGcmTokenCipher::new([7u8; 32]));
        let services = BillingServices::new(
            memory.ports(cipher),
            GatewayRegistry::new().register(gateway.clone()),
            settings,
        );
        Self {
            services,
            memory,
            bus,
            gateway,
        }
    }

    /// Monthly 19.99 USD subscription started at `start`, with a default
    /// `tok_visa` card on the mock gateway.
    pub async fn active_subscription(&self, start: &str) -> Subscription {
        let sub = self.subscription_without_method(start).await;
        self.services
            .vault
            .save(SavePaymentMethod {
                subscription_id: sub.id,
                gateway_id: "mock".to_string(),
                token: SecretString::new("tok_visa".to_string()),
                customer_id: None,
                gateway_customer_id: Some("cus_test".to_string()),
                is_default: true,
            })
            .await
            .unwrap();
        sub
    }

    pub async fn subscription_without_method(&self, start: &str) -> Subscription {
        self.services
            .subscriptions
            .create
            .handle(CreateSubscriptionCommand {
                params: monthly_params(at(start)),
            })
            .await
            .unwrap()
            .subscription
    }

    pub async fn subscription(&self, id: &SubscriptionId) -> Subscription {
        self.services.lifecycle.load(id).await.unwrap()
    }

    /// Headers carrying a fresh mock-gateway signature for `payload`.
    pub fn signed_headers(&self, payload: &[u8]) -> HeaderMap {
        let signature = self
            .gateway
            .sign(payload, Timestamp::now().as_unix_secs())
            .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(MOCK_SIGNATURE_HEADER, signature.parse().unwrap());
        headers
    }
}

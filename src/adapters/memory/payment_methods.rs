//! In-memory payment method store.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::billing::PaymentMethod;
use crate::domain::foundation::{DomainError, SubscriptionId};
use crate::ports::PaymentMethodStore;

#[derive(Default)]
pub struct InMemoryPaymentMethodStore {
    // A single lock makes clear-then-set atomic.
    methods: RwLock<Vec<PaymentMethod>>,
}

impl InMemoryPaymentMethodStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentMethodStore for InMemoryPaymentMethodStore {
    async fn save(&self, method: &PaymentMethod) -> Result<(), DomainError> {
        let mut methods = self.methods.write().await;
        if method.is_default {
            for existing in methods
                .iter_mut()
                .filter(|m| m.subscription_id == method.subscription_id)
            {
                existing.is_default = false;
            }
        }
        match methods.iter_mut().find(|m| {
            m.subscription_id == method.subscription_id && m.gateway_id == method.gateway_id
        }) {
            Some(existing) => *existing = method.clone(),
            None => methods.push(method.clone()),
        }
        Ok(())
    }

    async fn find(
        &self,
        subscription_id: &SubscriptionId,
        gateway_id: &str,
    ) -> Result<Option<PaymentMethod>, DomainError> {
        Ok(self
            .methods
            .read()
            .await
            .iter()
            .find(|m| m.subscription_id == *subscription_id && m.gateway_id == gateway_id)
            .cloned())
    }

    async fn find_default(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<PaymentMethod>, DomainError> {
        Ok(self
            .methods
            .read()
            .await
            .iter()
            .find(|m| m.subscription_id == *subscription_id && m.is_default)
            .cloned())
    }

    async fn list(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Vec<PaymentMethod>, DomainError> {
        Ok(self
            .methods
            .read()
            .await
            .iter()
            .filter(|m| m.subscription_id == *subscription_id)
            .cloned()
            .collect())
    }

    async fn delete(
        &self,
        subscription_id: &SubscriptionId,
        gateway_id: &str,
    ) -> Result<bool, DomainError> {
        let mut methods = self.methods.write().await;
        let before = methods.len();
        methods.retain(|m| !(m.subscription_id == *subscription_id && m.gateway_id == gateway_id));
        Ok(methods.len() != before)
    }

    async fn delete_all(&self, subscription_id: &SubscriptionId) -> Result<u64, DomainError> {
        let mut methods = self.methods.write().await;
        let before = methods.len();
        methods.retain(|m| m.subscription_id != *subscription_id);
        Ok((before - methods.len()) as u64)
    }
}

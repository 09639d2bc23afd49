//! PaymentVault - encrypted-at-rest store of gateway tokens.
//!
//! Tokens are encrypted by the configured `TokenCipher` before they reach
//! the store and decrypted only on the way to a gateway adapter. `list`
//! returns stored rows as they are, never decrypted.

use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

use crate::domain::billing::{PaymentMethod, SavePaymentMethod, VaultedPaymentMethod};
use crate::domain::foundation::{PaymentMethodId, SubscriptionId, Timestamp};
use crate::domain::subscription::Notification;
use crate::ports::{NotificationPublisher, PaymentMethodStore, TokenCipher};

use super::BillingError;

pub struct PaymentVault {
    store: Arc<dyn PaymentMethodStore>,
    cipher: Arc<dyn TokenCipher>,
    publisher: Arc<dyn NotificationPublisher>,
}

impl PaymentVault {
    pub fn new(
        store: Arc<dyn PaymentMethodStore>,
        cipher: Arc<dyn TokenCipher>,
        publisher: Arc<dyn NotificationPublisher>,
    ) -> Self {
        if !cipher.is_encrypting() {
            tracing::warn!(
                scheme = cipher.scheme(),
                "Payment vault running without an encryption key; tokens are only encoded"
            );
        }
        Self {
            store,
            cipher,
            publisher,
        }
    }

    /// Stores (or replaces) the method for `(subscription_id, gateway_id)`.
    ///
    /// The first method saved for a subscription becomes its default even
    /// when `is_default` is false, so a renewal always has something to
    /// charge.
    pub async fn save(&self, input: SavePaymentMethod) -> Result<PaymentMethod, BillingError> {
        validate_gateway_id(&input.gateway_id)?;
        validate_token(&input.token)?;

        let now = Timestamp::now();
        let existing = self
            .store
            .find(&input.subscription_id, &input.gateway_id)
            .await?;
        let has_default = self
            .store
            .find_default(&input.subscription_id)
            .await?
            .is_some_and(|m| m.gateway_id != input.gateway_id);

        let encrypted_token = self.cipher.encrypt(&input.subscription_id, &input.token)?;
        let method = PaymentMethod {
            id: existing.as_ref().map(|m| m.id).unwrap_or_else(PaymentMethodId::new),
            subscription_id: input.subscription_id,
            gateway_id: input.gateway_id.clone(),
            encrypted_token,
            customer_id: input.customer_id,
            gateway_customer_id: input.gateway_customer_id,
            is_default: input.is_default || !has_default,
            created_at: existing.as_ref().map(|m| m.created_at).unwrap_or(now),
            updated_at: now,
        };
        self.store.save(&method).await?;

        tracing::info!(
            subscription_id = %method.subscription_id,
            gateway_id = %method.gateway_id,
            is_default = method.is_default,
            replaced = existing.is_some(),
            "Payment method saved"
        );

        let notification = if existing.is_some() {
            Notification::PaymentMethodUpdated {
                subscription_id: method.subscription_id,
                gateway_id: method.gateway_id.clone(),
            }
        } else {
            Notification::PaymentMethodSaved {
                subscription_id: method.subscription_id,
                gateway_id: method.gateway_id.clone(),
            }
        };
        self.notify(notification).await;
        Ok(method)
    }

    pub async fn get_default(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<VaultedPaymentMethod>, BillingError> {
        match self.store.find_default(subscription_id).await? {
            Some(method) => Ok(Some(self.reveal(&method)?)),
            None => Ok(None),
        }
    }

    pub async fn get(
        &self,
        subscription_id: &SubscriptionId,
        gateway_id: &str,
    ) -> Result<Option<VaultedPaymentMethod>, BillingError> {
        match self.store.find(subscription_id, gateway_id).await? {
            Some(method) => Ok(Some(self.reveal(&method)?)),
            None => Ok(None),
        }
    }

    /// Replaces the token of an existing method, keeping its default flag.
    pub async fn update(
        &self,
        subscription_id: &SubscriptionId,
        gateway_id: &str,
        new_token: SecretString,
    ) -> Result<PaymentMethod, BillingError> {
        validate_token(&new_token)?;
        let mut method = self
            .store
            .find(subscription_id, gateway_id)
            .await?
            .ok_or(BillingError::PaymentMethodNotFound(*subscription_id))?;

        method.encrypted_token = self.cipher.encrypt(subscription_id, &new_token)?;
        method.updated_at = Timestamp::now();
        self.store.save(&method).await?;

        tracing::info!(
            subscription_id = %subscription_id,
            gateway_id,
            "Payment method token updated"
        );
        self.notify(Notification::PaymentMethodUpdated {
            subscription_id: *subscription_id,
            gateway_id: gateway_id.to_string(),
        })
        .await;
        Ok(method)
    }

    /// Returns false when nothing was vaulted for the pair.
    pub async fn delete(
        &self,
        subscription_id: &SubscriptionId,
        gateway_id: &str,
    ) -> Result<bool, BillingError> {
        let deleted = self.store.delete(subscription_id, gateway_id).await?;
        if deleted {
            tracing::info!(
                subscription_id = %subscription_id,
                gateway_id,
                "Payment method deleted"
            );
            self.notify(Notification::PaymentMethodDeleted {
                subscription_id: *subscription_id,
                gateway_id: gateway_id.to_string(),
            })
            .await;
        }
        Ok(deleted)
    }

    pub async fn list(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Vec<PaymentMethod>, BillingError> {
        Ok(self.store.list(subscription_id).await?)
    }

    /// Removes every method of a subscription; used by hard delete.
    pub async fn purge(&self, subscription_id: &SubscriptionId) -> Result<u64, BillingError> {
        Ok(self.store.delete_all(subscription_id).await?)
    }

    fn reveal(&self, method: &PaymentMethod) -> Result<VaultedPaymentMethod, BillingError> {
        let token = self
            .cipher
            .decrypt(&method.subscription_id, &method.encrypted_token)?;
        Ok(VaultedPaymentMethod::from_stored(method, token))
    }

    async fn notify(&self, notification: Notification) {
        if let Err(e) = self.publisher.publish(notification).await {
            tracing::error!(error = %e, "Failed to publish payment method notification");
        }
    }
}

fn validate_gateway_id(gateway_id: &str) -> Result<(), BillingError> {
    if gateway_id.trim().is_empty() {
        return Err(BillingError::validation("gateway_id", "cannot be empty"));
    }
    Ok(())
}

fn validate_token(token: &SecretString) -> Result<(), BillingError> {
    if token.expose_secret().trim().is_empty() {
        return Err(BillingError::validation("token", "cannot be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::crypto::{AesGcmTokenCipher, Base64TokenEncoding};
    use crate::adapters::events::NotificationBus;
    use crate::adapters::memory::InMemoryPaymentMethodStore;
    use crate::domain::subscription::NotificationKind;
    use proptest::prelude::*;

    struct Fixture {
        vault: PaymentVault,
        store: Arc<InMemoryPaymentMethodStore>,
        bus: Arc<NotificationBus>,
    }

    fn fixture_with(cipher: Arc<dyn TokenCipher>) -> Fixture {
        let store = Arc::new(InMemoryPaymentMethodStore::new());
        let bus = Arc::new(NotificationBus::recording());
        Fixture {
            vault: PaymentVault::new(store.clone(), cipher, bus.clone()),
            store,
            bus,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(AesGcmTokenCipher::new([7u8; 32])))
    }

    fn save_input(
        sub: SubscriptionId,
        gateway: &str,
        token: &str,
        is_default: bool,
    ) -> SavePaymentMethod {
        SavePaymentMethod {
            subscription_id: sub,
            gateway_id: gateway.to_string(),
            token: SecretString::new(token.to_string()),
            customer_id: Some("cust-1".to_string()),
            gateway_customer_id: Some("cus_123".to_string()),
            is_default,
        }
    }

    // ══════════════════════════════════════════════════════════════
    // Save / Get
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn saved_token_is_never_stored_in_clear() {
        let f = fixture();
        let sub = SubscriptionId::new();

        f.vault
            .save(save_input(sub, "stripe", "pm_card_visa", true))
            .await
            .unwrap();

        let stored = f.store.find(&sub, "stripe").await.unwrap().unwrap();
        assert!(!stored.encrypted_token.contains("pm_card_visa"));

        let revealed = f.vault.get_default(&sub).await.unwrap().unwrap();
        assert_eq!(revealed.token.expose_secret(), "pm_card_visa");
        assert_eq!(revealed.gateway_customer_id.as_deref(), Some("cus_123"));
    }

    #[tokio::test]
    async fn first_method_becomes_default() {
        let f = fixture();
        let sub = SubscriptionId::new();

        let method = f
            .vault
            .save(save_input(sub, "stripe", "pm_1", false))
            .await
            .unwrap();

        assert!(method.is_default);
    }

    #[tokio::test]
    async fn new_default_clears_previous_default() {
        let f = fixture();
        let sub = SubscriptionId::new();
        f.vault.save(save_input(sub, "stripe", "pm_1", true)).await.unwrap();
        f.vault.save(save_input(sub, "mock", "tok_2", true)).await.unwrap();

        let methods = f.vault.list(&sub).await.unwrap();
        let defaults: Vec<_> = methods.iter().filter(|m| m.is_default).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].gateway_id, "mock");
    }

    #[tokio::test]
    async fn non_default_save_keeps_existing_default() {
        let f = fixture();
        let sub = SubscriptionId::new();
        f.vault.save(save_input(sub, "stripe", "pm_1", true)).await.unwrap();
        f.vault.save(save_input(sub, "mock", "tok_2", false)).await.unwrap();

        let default = f.vault.get_default(&sub).await.unwrap().unwrap();
        assert_eq!(default.gateway_id, "stripe");
    }

    #[tokio::test]
    async fn saving_same_gateway_twice_replaces_and_notifies_update() {
        let f = fixture();
        let sub = SubscriptionId::new();
        let first = f.vault.save(save_input(sub, "stripe", "pm_1", true)).await.unwrap();
        let second = f.vault.save(save_input(sub, "stripe", "pm_2", true)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(f.vault.list(&sub).await.unwrap().len(), 1);
        assert_eq!(f.bus.count_of_kind(NotificationKind::PaymentMethodSaved), 1);
        assert_eq!(f.bus.count_of_kind(NotificationKind::PaymentMethodUpdated), 1);
    }

    #[tokio::test]
    async fn empty_token_is_rejected() {
        let f = fixture();
        let err = f
            .vault
            .save(save_input(SubscriptionId::new(), "stripe", "  ", true))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BillingError::ValidationFailed { ref field, .. } if field == "token"
        ));
    }

    #[tokio::test]
    async fn get_unknown_returns_none() {
        let f = fixture();
        assert!(f.vault.get(&SubscriptionId::new(), "stripe").await.unwrap().is_none());
        assert!(f.vault.get_default(&SubscriptionId::new()).await.unwrap().is_none());
    }

    // ══════════════════════════════════════════════════════════════
    // Update / Delete
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn update_replaces_token() {
        let f = fixture();
        let sub = SubscriptionId::new();
        f.vault.save(save_input(sub, "stripe", "pm_old", true)).await.unwrap();

        f.vault
            .update(&sub, "stripe", SecretString::new("pm_new".to_string()))
            .await
            .unwrap();

        let revealed = f.vault.get(&sub, "stripe").await.unwrap().unwrap();
        assert_eq!(revealed.token.expose_secret(), "pm_new");
        assert!(revealed.is_default);
    }

    #[tokio::test]
    async fn update_of_missing_method_is_not_found() {
        let f = fixture();
        let sub = SubscriptionId::new();
        let err = f
            .vault
            .update(&sub, "stripe", SecretString::new("pm".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err, BillingError::PaymentMethodNotFound(sub));
    }

    #[tokio::test]
    async fn delete_notifies_only_when_something_was_removed() {
        let f = fixture();
        let sub = SubscriptionId::new();
        f.vault.save(save_input(sub, "stripe", "pm_1", true)).await.unwrap();

        assert!(f.vault.delete(&sub, "stripe").await.unwrap());
        assert!(!f.vault.delete(&sub, "stripe").await.unwrap());
        assert_eq!(f.bus.count_of_kind(NotificationKind::PaymentMethodDeleted), 1);
    }

    // ══════════════════════════════════════════════════════════════
    // Cipher binding
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn ciphertext_moved_to_another_subscription_does_not_decrypt() {
        let f = fixture();
        let owner = SubscriptionId::new();
        let other = SubscriptionId::new();
        let saved = f.vault.save(save_input(owner, "stripe", "pm_1", true)).await.unwrap();

        let mut moved = saved.clone();
        moved.subscription_id = other;
        f.store.save(&moved).await.unwrap();

        let err = f.vault.get(&other, "stripe").await.unwrap_err();
        assert!(matches!(err, BillingError::Encryption(_)));
    }

    #[tokio::test]
    async fn base64_fallback_is_labelled_and_round_trips() {
        let f = fixture_with(Arc::new(Base64TokenEncoding));
        let sub = SubscriptionId::new();
        f.vault.save(save_input(sub, "stripe", "pm_1", true)).await.unwrap();

        let stored = f.store.find(&sub, "stripe").await.unwrap().unwrap();
        assert!(stored.encrypted_token.starts_with("b64:"));
        let revealed = f.vault.get_default(&sub).await.unwrap().unwrap();
        assert_eq!(revealed.token.expose_secret(), "pm_1");
    }

    // ══════════════════════════════════════════════════════════════
    // Single default
    // ══════════════════════════════════════════════════════════════

    const GATEWAYS: [&str; 3] = ["stripe", "mock", "adyen"];

    proptest! {
        #[test]
        fn any_save_sequence_leaves_exactly_one_default(
            saves in proptest::collection::vec((0usize..GATEWAYS.len(), any::<bool>()), 1..12),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let f = fixture();
                let sub = SubscriptionId::new();

                for (i, (gateway, is_default)) in saves.into_iter().enumerate() {
                    let token = format!("tok_{}", i);
                    let gateway = GATEWAYS[gateway];
                    f.vault
                        .save(save_input(sub, gateway, &token, is_default))
                        .await
                        .unwrap();

                    let methods = f.vault.list(&sub).await.unwrap();
                    let defaults: Vec<_> = methods.iter().filter(|m| m.is_default).collect();
                    prop_assert_eq!(defaults.len(), 1);
                    if is_default {
                        prop_assert_eq!(defaults[0].gateway_id.as_str(), gateway);
                    }
                }
                Ok(())
            })?;
        }
    }
}

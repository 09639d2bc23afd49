//! Vaulted payment methods.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{PaymentMethodId, SubscriptionId, Timestamp};

/// A stored payment method. `encrypted_token` is the output of the
/// configured token cipher and is never the raw gateway token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: PaymentMethodId,
    pub subscription_id: SubscriptionId,
    pub gateway_id: String,
    pub encrypted_token: String,
    pub customer_id: Option<String>,
    pub gateway_customer_id: Option<String>,
    pub is_default: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A payment method with its token decrypted, handed to gateway adapters.
#[derive(Debug, Clone)]
pub struct VaultedPaymentMethod {
    pub id: PaymentMethodId,
    pub subscription_id: SubscriptionId,
    pub gateway_id: String,
    pub token: SecretString,
    pub customer_id: Option<String>,
    pub gateway_customer_id: Option<String>,
    pub is_default: bool,
}

impl VaultedPaymentMethod {
    pub fn from_stored(method: &PaymentMethod, token: SecretString) -> Self {
        Self {
            id: method.id,
            subscription_id: method.subscription_id,
            gateway_id: method.gateway_id.clone(),
            token,
            customer_id: method.customer_id.clone(),
            gateway_customer_id: method.gateway_customer_id.clone(),
            is_default: method.is_default,
        }
    }
}

/// Input to `PaymentVault::save`.
#[derive(Debug, Clone)]
pub struct SavePaymentMethod {
    pub subscription_id: SubscriptionId,
    pub gateway_id: String,
    pub token: SecretString,
    pub customer_id: Option<String>,
    pub gateway_customer_id: Option<String>,
    pub is_default: bool,
}

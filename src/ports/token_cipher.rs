//! TokenCipher port - encryption of gateway tokens at rest.

use secrecy::SecretString;

use crate::domain::foundation::{DomainError, SubscriptionId};

/// Encrypts and decrypts payment tokens.
///
/// The subscription id is bound into the key derivation, so a ciphertext
/// copied onto another subscription's row does not decrypt.
pub trait TokenCipher: Send + Sync {
    /// Short label for logs.
    fn scheme(&self) -> &'static str;

    /// False for the labelled plain encoding used when no key is configured.
    fn is_encrypting(&self) -> bool;

    fn encrypt(
        &self,
        subscription_id: &SubscriptionId,
        token: &SecretString,
    ) -> Result<String, DomainError>;

    fn decrypt(
        &self,
        subscription_id: &SubscriptionId,
        stored: &str,
    ) -> Result<SecretString, DomainError>;
}

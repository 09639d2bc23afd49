//! Labelled base64 encoding for tokens when no encryption key is set.
//!
//! This is not encryption. Values carry a `b64:` prefix so they are easy to
//! find and re-encrypt once a master key is configured.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};

use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId};
use crate::ports::TokenCipher;

pub(crate) const PLAIN_PREFIX: &str = "b64:";

#[derive(Debug, Clone, Copy, Default)]
pub struct Base64TokenEncoding;

impl Base64TokenEncoding {
    pub(crate) fn encode(token: &SecretString) -> String {
        format!("{}{}", PLAIN_PREFIX, BASE64.encode(token.expose_secret().as_bytes()))
    }

    pub(crate) fn decode(stored: &str) -> Result<SecretString, DomainError> {
        let encoded = stored.strip_prefix(PLAIN_PREFIX).ok_or_else(|| {
            DomainError::new(ErrorCode::EncryptionError, "Token is not b64-encoded")
        })?;
        let bytes = BASE64.decode(encoded).map_err(|e| {
            DomainError::new(ErrorCode::EncryptionError, format!("Invalid b64 token: {}", e))
        })?;
        let token = String::from_utf8(bytes).map_err(|_| {
            DomainError::new(ErrorCode::EncryptionError, "Decoded token is not UTF-8")
        })?;
        Ok(SecretString::new(token))
    }
}

impl TokenCipher for Base64TokenEncoding {
    fn scheme(&self) -> &'static str {
        "b64"
    }

    fn is_encrypting(&self) -> bool {
        false
    }

    fn encrypt(
        &self,
        _subscription_id: &SubscriptionId,
        token: &SecretString,
    ) -> Result<String, DomainError> {
        Ok(Self::encode(token))
    }

    fn decrypt(
        &self,
        _subscription_id: &SubscriptionId,
        stored: &str,
    ) -> Result<SecretString, DomainError> {
        Self::decode(stored)
    }
}

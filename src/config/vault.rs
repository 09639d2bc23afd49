//! Payment vault configuration

use secrecy::SecretString;
use serde::Deserialize;
use std::sync::Arc;

use crate::adapters::crypto::{AesGcmTokenCipher, Base64TokenEncoding};
use crate::ports::TokenCipher;

use super::error::ValidationError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VaultConfig {
    /// Base64 encoding of a 32-byte AES-256 master key
    pub master_key: Option<SecretString>,
}

impl VaultConfig {
    pub fn is_encrypting(&self) -> bool {
        self.master_key.is_some()
    }

    /// The configured cipher, or the labelled plain encoding without a key.
    pub fn cipher(&self) -> Result<Arc<dyn TokenCipher>, ValidationError> {
        match &self.master_key {
            Some(key) => AesGcmTokenCipher::from_base64(key)
                .map(|c| Arc::new(c) as Arc<dyn TokenCipher>)
                .map_err(|_| ValidationError::InvalidVaultKey),
            None => Ok(Arc::new(Base64TokenEncoding)),
        }
    }

    pub fn validate(&self, production: bool) -> Result<(), ValidationError> {
        if production && self.master_key.is_none() {
            return Err(ValidationError::RequiredInProduction("VAULT__MASTER_KEY"));
        }
        self.cipher().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_without_key_uses_plain_encoding() {
        let config = VaultConfig::default();
        let cipher = config.cipher().unwrap();
        assert!(!cipher.is_encrypting());
        assert!(config.validate(false).is_ok());
    }

    #[test]
    fn test_key_required_in_production() {
        assert!(matches!(
            VaultConfig::default().validate(true),
            Err(ValidationError::RequiredInProduction(_))
        ));
    }

    #[test]
    fn test_generated_key_is_accepted() {
        let config = VaultConfig {
            master_key: Some(SecretString::new(AesGcmTokenCipher::generate_key())),
        };
        assert!(config.cipher().unwrap().is_encrypting());
    }

    #[test]
    fn test_short_key_is_rejected() {
        let config = VaultConfig {
            master_key: Some(SecretString::new("c2hvcnQ=".to_string())),
        };
        assert!(matches!(config.validate(false), Err(ValidationError::InvalidVaultKey)));
    }
}

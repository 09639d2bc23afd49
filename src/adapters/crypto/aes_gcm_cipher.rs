//! AES-256-GCM token cipher.
//!
//! A data key per subscription is derived with HKDF-SHA256 from the master
//! key, using the subscription id as `info`. Stored format, base64 encoded:
//! `ENC1` || nonce (12 bytes) || ciphertext.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use super::base64_encoding::{Base64TokenEncoding, PLAIN_PREFIX};
use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId};
use crate::ports::TokenCipher;

const MASTER_KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const MAGIC: &[u8] = b"ENC1";
const HKDF_SALT: &[u8] = b"subscription-vault-v1";

#[derive(Clone)]
pub struct AesGcmTokenCipher {
    master_key: [u8; MASTER_KEY_SIZE],
}

impl std::fmt::Debug for AesGcmTokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesGcmTokenCipher([REDACTED])")
    }
}

impl AesGcmTokenCipher {
    pub fn new(master_key: [u8; MASTER_KEY_SIZE]) -> Self {
        Self { master_key }
    }

    /// Builds the cipher from a base64-encoded 32-byte key.
    pub fn from_base64(encoded: &SecretString) -> Result<Self, DomainError> {
        let decoded = BASE64.decode(encoded.expose_secret().trim()).map_err(|e| {
            encryption_error(format!("Invalid master key encoding: {}", e))
        })?;
        let key: [u8; MASTER_KEY_SIZE] = decoded.as_slice().try_into().map_err(|_| {
            encryption_error(format!(
                "Master key must be {} bytes, got {}",
                MASTER_KEY_SIZE,
                decoded.len()
            ))
        })?;
        Ok(Self::new(key))
    }

    /// A fresh random key, base64 encoded, for initial setup.
    pub fn generate_key() -> String {
        let mut key = [0u8; MASTER_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        BASE64.encode(key)
    }

    fn cipher_for(&self, subscription_id: &SubscriptionId) -> Result<Aes256Gcm, DomainError> {
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), &self.master_key);
        let mut data_key = [0u8; 32];
        hk.expand(subscription_id.to_string().as_bytes(), &mut data_key)
            .map_err(|e| encryption_error(format!("Key derivation failed: {}", e)))?;
        Aes256Gcm::new_from_slice(&data_key)
            .map_err(|e| encryption_error(format!("Failed to create cipher: {}", e)))
    }
}

impl TokenCipher for AesGcmTokenCipher {
    fn scheme(&self) -> &'static str {
        "aes-256-gcm"
    }

    fn is_encrypting(&self) -> bool {
        true
    }

    fn encrypt(
        &self,
        subscription_id: &SubscriptionId,
        token: &SecretString,
    ) -> Result<String, DomainError> {
        let cipher = self.cipher_for(subscription_id)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), token.expose_secret().as_bytes())
            .map_err(|e| encryption_error(format!("Encryption failed: {}", e)))?;

        let mut blob = Vec::with_capacity(MAGIC.len() + NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(MAGIC);
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    fn decrypt(
        &self,
        subscription_id: &SubscriptionId,
        stored: &str,
    ) -> Result<SecretString, DomainError> {
        // Rows written before a key was configured.
        if stored.starts_with(PLAIN_PREFIX) {
            tracing::warn!(
                subscription_id = %subscription_id,
                "Reading unencrypted b64 token; re-save to encrypt it"
            );
            return Base64TokenEncoding::decode(stored);
        }

        let blob = BASE64
            .decode(stored)
            .map_err(|e| encryption_error(format!("Invalid ciphertext encoding: {}", e)))?;
        if blob.len() < MAGIC.len() + NONCE_SIZE + 1 {
            return Err(encryption_error("Encrypted token too short"));
        }
        if &blob[..MAGIC.len()] != MAGIC {
            return Err(encryption_error("Invalid encrypted token format (missing magic bytes)"));
        }

        let cipher = self.cipher_for(subscription_id)?;
        let nonce_end = MAGIC.len() + NONCE_SIZE;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&blob[MAGIC.len()..nonce_end]), &blob[nonce_end..])
            .map_err(|e| encryption_error(format!("Decryption failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map(SecretString::new)
            .map_err(|_| encryption_error("Decrypted token is not UTF-8"))
    }
}

fn encryption_error(message: impl Into<String>) -> DomainError {
    DomainError::new(ErrorCode::EncryptionError, message)
}

//! Token ciphers for the payment vault.
//!
//! - `AesGcmTokenCipher` - AES-256-GCM with per-subscription keys derived
//!   from a master key
//! - `Base64TokenEncoding` - labelled encoding used only when no master key
//!   is configured

mod aes_gcm_cipher;
mod base64_encoding;

pub use aes_gcm_cipher::AesGcmTokenCipher;
pub use base64_encoding::Base64TokenEncoding;

//! Webhook domain: normalized events, the idempotency record, signature
//! verification and ingestion errors.

mod errors;
mod event;
mod signature;

pub use errors::WebhookError;
pub use event::{ClaimResult, NormalizedEvent, WebhookEvent, WebhookEventType, WebhookOutcome};
pub use signature::{HmacSignatureVerifier, SignatureHeader};

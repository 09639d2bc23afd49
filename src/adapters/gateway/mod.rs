//! Payment gateway adapters.
//!
//! - `StripeGateway` - PaymentIntent charges and signed Stripe webhooks
//! - `MockGateway` - scripted outcomes, latency injection and a call log
//!   for tests and local runs

mod mock;
mod stripe;

pub use mock::{MockCharge, MockGateway, MOCK_SIGNATURE_HEADER};
pub use stripe::{StripeConfig, StripeGateway, STRIPE_SIGNATURE_HEADER};

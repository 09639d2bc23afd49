//! Billing rules: failure taxonomy, retry backoff, grace windows and the
//! payment-method records kept by the vault.

mod failure;
mod grace;
mod payment_method;
mod retry;

pub use failure::{ChargeFailure, FailureReason};
pub use grace::{GraceEvaluation, GracePolicy};
pub use payment_method::{PaymentMethod, SavePaymentMethod, VaultedPaymentMethod};
pub use retry::{RetryDecision, RetryPolicy, RetryState, RetryStatus};

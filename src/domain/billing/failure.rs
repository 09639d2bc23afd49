//! Payment failure taxonomy.
//!
//! Gateways report failures as free-form codes and messages. They are
//! pattern-matched into a small closed set that decides between backoff
//! and suspension. Anything unrecognized is treated as non-retryable.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    // Retryable
    InsufficientFunds,
    CardDeclined,
    ProcessingError,
    NetworkError,
    GatewayUnavailable,

    // Non-retryable
    CardExpired,
    InvalidPaymentMethod,
    AuthenticationError,
    MissingPaymentMethod,
    GatewayNotConfigured,
    Unrecognized,
}

const EXPIRED: &[&str] = &["expired_card", "card_expired", "expired"];
const HARD_DECLINE: &[&str] = &[
    "lost_card",
    "stolen_card",
    "pickup_card",
    "fraudulent",
    "invalid_payment_method",
    "payment_method_not_available",
    "no such payment",
    "invalid_number",
    "incorrect_number",
    "invalid card",
    "invalid_card",
    "invalid_account",
];
const AUTHENTICATION: &[&str] = &[
    "authentication",
    "invalid_api_key",
    "api_key",
    "unauthorized",
    "permission",
    "configuration",
];
const INSUFFICIENT: &[&str] = &["insufficient_funds", "insufficient funds"];
const PROCESSING: &[&str] = &["processing_error", "processing error"];
const NETWORK: &[&str] = &["timeout", "timed out", "network", "connection"];
const UNAVAILABLE: &[&str] = &[
    "unavailable",
    "rate_limit",
    "too many requests",
    "try again",
    "api_error",
];
const SOFT_DECLINE: &[&str] = &["card_declined", "declined", "do_not_honor", "generic_decline"];

impl FailureReason {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureReason::InsufficientFunds
                | FailureReason::CardDeclined
                | FailureReason::ProcessingError
                | FailureReason::NetworkError
                | FailureReason::GatewayUnavailable
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::InsufficientFunds => "insufficient_funds",
            FailureReason::CardDeclined => "card_declined",
            FailureReason::ProcessingError => "processing_error",
            FailureReason::NetworkError => "network_error",
            FailureReason::GatewayUnavailable => "gateway_unavailable",
            FailureReason::CardExpired => "card_expired",
            FailureReason::InvalidPaymentMethod => "invalid_payment_method",
            FailureReason::AuthenticationError => "authentication_error",
            FailureReason::MissingPaymentMethod => "missing_payment_method",
            FailureReason::GatewayNotConfigured => "gateway_not_configured",
            FailureReason::Unrecognized => "unrecognized",
        }
    }

    /// Classifies a gateway error. The code is tried first, then the message.
    pub fn classify(code: Option<&str>, message: Option<&str>) -> Self {
        [code, message]
            .into_iter()
            .flatten()
            .map(Self::classify_text)
            .find(|reason| *reason != FailureReason::Unrecognized)
            .unwrap_or(FailureReason::Unrecognized)
    }

    fn classify_text(text: &str) -> Self {
        let text = text.to_ascii_lowercase();
        let has = |patterns: &[&str]| patterns.iter().any(|p| text.contains(p));

        // Specific non-retryable patterns win over the generic "declined".
        if has(EXPIRED) {
            FailureReason::CardExpired
        } else if has(HARD_DECLINE) {
            FailureReason::InvalidPaymentMethod
        } else if has(AUTHENTICATION) {
            FailureReason::AuthenticationError
        } else if has(INSUFFICIENT) {
            FailureReason::InsufficientFunds
        } else if has(PROCESSING) {
            FailureReason::ProcessingError
        } else if has(NETWORK) {
            FailureReason::NetworkError
        } else if has(UNAVAILABLE) {
            FailureReason::GatewayUnavailable
        } else if has(SOFT_DECLINE) {
            FailureReason::CardDeclined
        } else {
            FailureReason::Unrecognized
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified charge failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeFailure {
    pub reason: FailureReason,
    /// Raw gateway code, or the reason name when none was given.
    pub code: String,
    pub message: String,
}

impl ChargeFailure {
    pub fn from_gateway(code: Option<&str>, message: Option<&str>) -> Self {
        let reason = FailureReason::classify(code, message);
        Self {
            reason,
            code: code.unwrap_or(reason.as_str()).to_string(),
            message: message.unwrap_or_default().to_string(),
        }
    }

    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            code: reason.as_str().to_string(),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.reason.is_retryable()
    }
}

impl fmt::Display for ChargeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_codes_classify_as_retryable() {
        for code in [
            "insufficient_funds",
            "card_declined",
            "processing_error",
            "gateway_timeout",
            "service_unavailable",
            "rate_limit",
        ] {
            let reason = FailureReason::classify(Some(code), None);
            assert!(reason.is_retryable(), "{} -> {:?}", code, reason);
        }
    }

    #[test]
    fn non_retryable_codes_classify_as_non_retryable() {
        for code in ["expired_card", "invalid_payment_method", "stolen_card", "invalid_api_key"] {
            let reason = FailureReason::classify(Some(code), None);
            assert!(!reason.is_retryable(), "{} -> {:?}", code, reason);
        }
    }

    #[test]
    fn unrecognized_error_is_not_retryable() {
        let reason = FailureReason::classify(Some("something_new"), Some("weird"));
        assert_eq!(reason, FailureReason::Unrecognized);
        assert!(!reason.is_retryable());
    }

    #[test]
    fn expired_wins_over_declined() {
        let reason = FailureReason::classify(None, Some("Your card was declined: card expired"));
        assert_eq!(reason, FailureReason::CardExpired);
    }

    #[test]
    fn message_used_when_code_unrecognized() {
        let reason = FailureReason::classify(Some("E1234"), Some("Insufficient funds in account"));
        assert_eq!(reason, FailureReason::InsufficientFunds);
    }

    #[test]
    fn missing_payment_method_is_a_configuration_error() {
        let failure = ChargeFailure::new(FailureReason::MissingPaymentMethod, "no default method");
        assert!(!failure.is_retryable());
        assert_eq!(failure.code, "missing_payment_method");
    }

    #[test]
    fn from_gateway_keeps_raw_code() {
        let failure = ChargeFailure::from_gateway(Some("insufficient_funds"), Some("nope"));
        assert_eq!(failure.code, "insufficient_funds");
        assert_eq!(failure.to_string(), "insufficient_funds: nope");
    }
}

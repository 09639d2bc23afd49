//! Billing service errors.
//!
//! # HTTP Status Mapping
//!
//! | Error | HTTP Status |
//! |-------|-------------|
//! | SubscriptionNotFound / OrderNotFound / PaymentMethodNotFound | 404 |
//! | InvalidTransition | 409 |
//! | ConcurrentModification | 409 |
//! | DeleteNotAllowed | 409 |
//! | Validation | 400 |
//! | Encryption / Infrastructure | 500 |

use crate::domain::foundation::{
    DomainError, ErrorCode, OrderId, SubscriptionId, ValidationError,
};
use crate::domain::subscription::SubscriptionStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingError {
    SubscriptionNotFound(SubscriptionId),

    OrderNotFound(OrderId),

    /// No default payment method is vaulted for the subscription.
    PaymentMethodNotFound(SubscriptionId),

    /// The state machine rejected the move.
    InvalidTransition {
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    },

    /// Another writer updated the record since it was loaded.
    ConcurrentModification(SubscriptionId),

    DeleteNotAllowed {
        id: SubscriptionId,
        reason: String,
    },

    ValidationFailed {
        field: String,
        message: String,
    },

    Encryption(String),

    Infrastructure(String),
}

impl BillingError {
    pub fn subscription_not_found(id: SubscriptionId) -> Self {
        BillingError::SubscriptionNotFound(id)
    }

    pub fn order_not_found(id: OrderId) -> Self {
        BillingError::OrderNotFound(id)
    }

    pub fn invalid_transition(from: SubscriptionStatus, to: SubscriptionStatus) -> Self {
        BillingError::InvalidTransition { from, to }
    }

    pub fn delete_not_allowed(id: SubscriptionId, reason: impl Into<String>) -> Self {
        BillingError::DeleteNotAllowed {
            id,
            reason: reason.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        BillingError::ValidationFailed {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        BillingError::Infrastructure(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            BillingError::SubscriptionNotFound(_) => ErrorCode::SubscriptionNotFound,
            BillingError::OrderNotFound(_) => ErrorCode::OrderNotFound,
            BillingError::PaymentMethodNotFound(_) => ErrorCode::PaymentMethodNotFound,
            BillingError::InvalidTransition { .. } => ErrorCode::InvalidStateTransition,
            BillingError::ConcurrentModification(_) => ErrorCode::ConcurrentModification,
            BillingError::DeleteNotAllowed { .. } => ErrorCode::HardDeleteNotAllowed,
            BillingError::ValidationFailed { .. } => ErrorCode::ValidationFailed,
            BillingError::Encryption(_) => ErrorCode::EncryptionError,
            BillingError::Infrastructure(_) => ErrorCode::DatabaseError,
        }
    }

    pub fn message(&self) -> String {
        match self {
            BillingError::SubscriptionNotFound(id) => format!("Subscription not found: {}", id),
            BillingError::OrderNotFound(id) => format!("Renewal order not found: {}", id),
            BillingError::PaymentMethodNotFound(id) => {
                format!("No default payment method for subscription {}", id)
            }
            BillingError::InvalidTransition { from, to } => {
                format!("Cannot move subscription from {} to {}", from, to)
            }
            BillingError::ConcurrentModification(id) => {
                format!("Subscription {} was modified concurrently", id)
            }
            BillingError::DeleteNotAllowed { id, reason } => {
                format!("Subscription {} cannot be deleted: {}", id, reason)
            }
            BillingError::ValidationFailed { field, message } => {
                format!("Validation failed for '{}': {}", field, message)
            }
            BillingError::Encryption(msg) => format!("Encryption error: {}", msg),
            BillingError::Infrastructure(msg) => format!("Error: {}", msg),
        }
    }

    /// True when repeating the operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::ConcurrentModification(_) | BillingError::Infrastructure(_)
        )
    }
}

impl std::fmt::Display for BillingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for BillingError {}

impl From<ValidationError> for BillingError {
    fn from(err: ValidationError) -> Self {
        let field = match &err {
            ValidationError::EmptyField { field }
            | ValidationError::OutOfRange { field, .. }
            | ValidationError::InvalidFormat { field, .. } => field.clone(),
        };
        BillingError::ValidationFailed {
            field,
            message: err.to_string(),
        }
    }
}

impl From<DomainError> for BillingError {
    fn from(err: DomainError) -> Self {
        match err.code {
            ErrorCode::ValidationFailed
            | ErrorCode::EmptyField
            | ErrorCode::OutOfRange
            | ErrorCode::InvalidFormat => BillingError::ValidationFailed {
                field: err.details.get("field").cloned().unwrap_or_default(),
                message: err.message,
            },
            ErrorCode::EncryptionError => BillingError::Encryption(err.message),
            _ => BillingError::Infrastructure(err.to_string()),
        }
    }
}

impl From<BillingError> for DomainError {
    fn from(err: BillingError) -> Self {
        DomainError::new(err.code(), err.message())
    }
}

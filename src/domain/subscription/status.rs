//! Subscription status state machine.
//!
//! `PendingCancel` (stored as `pe_cancelled`) means "will cancel at period
//! end, still currently entitled". It doubles as the suspended condition
//! when `suspended_reason` is set on the subscription.

use crate::domain::foundation::{StateMachine, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subscription lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Created by an admin, not yet tied to a paid order.
    Draft,

    /// Awaiting the originating order's payment.
    Pending,

    /// Paid up and renewing.
    Active,

    /// Paused, either manually or by the gateway.
    OnHold,

    /// Cancels at period end; entitlement continues until then.
    #[serde(rename = "pe_cancelled")]
    PendingCancel,

    Cancelled,

    Expired,

    /// Soft-deleted. Only an explicit restore brings it back.
    Trash,
}

impl SubscriptionStatus {
    pub const ALL: [SubscriptionStatus; 8] = [
        SubscriptionStatus::Draft,
        SubscriptionStatus::Pending,
        SubscriptionStatus::Active,
        SubscriptionStatus::OnHold,
        SubscriptionStatus::PendingCancel,
        SubscriptionStatus::Cancelled,
        SubscriptionStatus::Expired,
        SubscriptionStatus::Trash,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Draft => "draft",
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::OnHold => "on_hold",
            SubscriptionStatus::PendingCancel => "pe_cancelled",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Trash => "trash",
        }
    }

    /// Statuses the renewal scheduler scans.
    pub fn is_renewable(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::PendingCancel
        )
    }

    /// Cancelled and expired records are the only ones an operator may hard-delete.
    pub fn allows_hard_delete(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Cancelled | SubscriptionStatus::Expired
        )
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                ValidationError::invalid_format("status", format!("unknown status '{}'", s))
            })
    }
}

impl StateMachine for SubscriptionStatus {
    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionStatus::*;
        match self {
            Draft => vec![Pending, Active, Cancelled, Trash],
            Pending => vec![Active, OnHold, Cancelled, Trash],
            Active => vec![OnHold, PendingCancel, Cancelled, Expired, Trash],
            OnHold => vec![Active, Cancelled, Trash],
            PendingCancel => vec![Active, Cancelled, Expired, Trash],
            Cancelled => vec![Active, Trash],
            Expired => vec![Trash],
            Trash => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SubscriptionStatus::*;

    #[test]
    fn active_and_on_hold_toggle() {
        assert!(Active.can_transition_to(&OnHold));
        assert!(OnHold.can_transition_to(&Active));
    }

    #[test]
    fn pending_cancel_runs_to_cancelled_or_expired() {
        assert_eq!(PendingCancel.transition_to(Cancelled), Ok(Cancelled));
        assert_eq!(PendingCancel.transition_to(Expired), Ok(Expired));
    }

    #[test]
    fn cancelled_can_only_resume_or_be_trashed() {
        assert_eq!(Cancelled.valid_transitions(), vec![Active, Trash]);
        assert!(Cancelled.transition_to(OnHold).is_err());
    }

    #[test]
    fn expired_cannot_reactivate() {
        assert!(Expired.transition_to(Active).is_err());
    }

    #[test]
    fn every_non_terminal_status_can_be_cancelled_or_trashed() {
        for status in [Draft, Pending, Active, OnHold, PendingCancel] {
            assert!(status.can_transition_to(&Cancelled), "{:?}", status);
            assert!(status.can_transition_to(&Trash), "{:?}", status);
        }
    }

    #[test]
    fn trash_is_terminal() {
        assert!(Trash.is_terminal());
        assert!(!Expired.is_terminal());
    }

    #[test]
    fn active_to_active_is_not_a_transition() {
        assert!(!Active.can_transition_to(&Active));
    }

    #[test]
    fn status_strings_roundtrip() {
        for status in SubscriptionStatus::ALL {
            assert_eq!(status.as_str().parse::<SubscriptionStatus>(), Ok(status));
        }
        assert_eq!(PendingCancel.as_str(), "pe_cancelled");
        assert!("suspended".parse::<SubscriptionStatus>().is_err());
    }

    #[test]
    fn serde_uses_storage_names() {
        assert_eq!(serde_json::to_string(&PendingCancel).unwrap(), "\"pe_cancelled\"");
        assert_eq!(serde_json::to_string(&OnHold).unwrap(), "\"on_hold\"");
    }
}

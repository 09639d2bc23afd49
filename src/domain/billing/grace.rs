//! Grace window after a missed renewal.

use crate::domain::foundation::Timestamp;
use crate::domain::subscription::Subscription;

/// Where a due, unpaid subscription stands relative to its grace window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraceEvaluation {
    /// Grace is turned off (`grace_days = 0`).
    Disabled,
    /// First time past due: open the window ending at `grace_end`.
    Start { grace_end: Timestamp },
    /// Window already open and not yet over.
    Within { grace_end: Timestamp },
    /// `now >= grace_end` and still unpaid.
    Elapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GracePolicy {
    grace_days: u32,
}

impl GracePolicy {
    pub fn new(grace_days: u32) -> Self {
        Self { grace_days }
    }

    pub fn is_enabled(&self) -> bool {
        self.grace_days > 0
    }

    pub fn grace_days(&self) -> u32 {
        self.grace_days
    }

    pub fn evaluate(&self, subscription: &Subscription, now: Timestamp) -> GraceEvaluation {
        if !self.is_enabled() {
            return GraceEvaluation::Disabled;
        }
        let grace_end = subscription
            .grace_period_end
            .unwrap_or_else(|| subscription.grace_end_for(self.grace_days));

        if now >= grace_end {
            GraceEvaluation::Elapsed
        } else if subscription.grace_period_end.is_none() {
            GraceEvaluation::Start { grace_end }
        } else {
            GraceEvaluation::Within { grace_end }
        }
    }
}

//! Subscription domain: the aggregate, its state machine, billing periods,
//! renewal orders, history notes and lifecycle notifications.

mod aggregate;
mod note;
mod notification;
mod order;
mod schedule;
mod status;

pub use aggregate::{NewSubscription, Subscription};
pub use note::{ActivityType, SubscriptionNote};
pub use notification::{Notification, NotificationKind};
pub use order::{OrderRelation, OrderStatus, RelationType, RenewalOrder};
pub use schedule::{BillingPeriod, IntervalUnit};
pub use status::SubscriptionStatus;

#[cfg(test)]
pub(crate) use aggregate::test_support;

//! Notification delivery adapters.

mod notification_bus;

pub use notification_bus::NotificationBus;

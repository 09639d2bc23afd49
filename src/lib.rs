//! Subscription Renewals - recurring billing orchestration.
//!
//! Drives subscriptions through their billing cycle: scheduled renewal
//! charges, backoff retries of failed payments, optional grace periods,
//! suspension, and reconciliation of asynchronous gateway webhooks.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

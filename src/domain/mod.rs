//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared primitives (IDs, money, timestamps, errors, state machine)
//! - `subscription` - Subscription aggregate, status machine, schedule, orders and notes
//! - `billing` - Failure classification, retry policy, grace periods, payment methods
//! - `webhook` - Normalized gateway events, signatures and ingestion errors

pub mod billing;
pub mod foundation;
pub mod subscription;
pub mod webhook;

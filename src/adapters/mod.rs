//! Adapters - Implementations of port interfaces.
//!
//! - `memory` - in-memory storage and locks (tests, database-less runs)
//! - `postgres` - durable storage and advisory locks
//! - `events` - in-process notification bus
//! - `crypto` - token ciphers for the payment vault
//! - `gateway` - Stripe and mock payment gateways
//! - `http` - webhook, scheduler and health endpoints

pub mod crypto;
pub mod events;
pub mod gateway;
pub mod http;
pub mod memory;
pub mod postgres;

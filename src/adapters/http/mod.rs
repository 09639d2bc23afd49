//! HTTP adapters - REST endpoints, one module per area.

pub mod billing;

pub use billing::{billing_router, AppState, SCHEDULER_TOKEN_HEADER};

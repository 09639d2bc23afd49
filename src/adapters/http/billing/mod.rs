//! HTTP adapter for the billing endpoints.
//!
//! - `POST /webhooks/:gateway_id` - gateway callbacks, signature verified
//! - `POST /scheduler/tick` - run one renewal pass now
//! - `GET /health` - liveness probe

mod dto;
mod handlers;
mod routes;

pub use dto::{ErrorResponse, HealthResponse, WebhookAck};
pub use handlers::{ApiError, AppState, SCHEDULER_TOKEN_HEADER};
pub use routes::{billing_router, REQUEST_ID_HEADER};

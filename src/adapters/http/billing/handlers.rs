//! HTTP handlers: webhook ingestion, the externally triggered renewal tick
//! and a health probe.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

use crate::application::{BillingError, BillingServices, TickReport};
use crate::domain::foundation::{ErrorCode, Timestamp};
use crate::domain::webhook::WebhookError;

use super::dto::{ErrorResponse, HealthResponse, WebhookAck};

pub const SCHEDULER_TOKEN_HEADER: &str = "x-scheduler-token";

/// Shared state for the billing router.
#[derive(Clone)]
pub struct AppState {
    pub services: BillingServices,
    /// When set, `POST /scheduler/tick` requires a matching
    /// `X-Scheduler-Token` header.
    pub scheduler_token: Option<SecretString>,
}

impl AppState {
    pub fn new(services: BillingServices, scheduler_token: Option<SecretString>) -> Self {
        Self {
            services,
            scheduler_token,
        }
    }

    fn tick_authorized(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.scheduler_token else {
            return true;
        };
        let presented = headers
            .get(SCHEDULER_TOKEN_HEADER)
            .map(|v| v.as_bytes())
            .unwrap_or_default();
        presented.ct_eq(expected.expose_secret().as_bytes()).into()
    }
}

/// POST /webhooks/:gateway_id
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(gateway_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    match state
        .services
        .webhooks
        .ingest(&gateway_id, &body, &headers)
        .await
    {
        Ok(outcome) => Ok(Json(outcome.into())),
        // Ignored events are acknowledged so the gateway stops redelivering.
        Err(WebhookError::Ignored(reason)) => Ok(Json(WebhookAck {
            status: "ignored",
            reason: Some(reason),
        })),
        Err(e) => Err(ApiError::Webhook(e)),
    }
}

/// POST /scheduler/tick
pub async fn scheduler_tick(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TickReport>, ApiError> {
    if !state.tick_authorized(&headers) {
        tracing::warn!("Rejected scheduler tick with a bad token");
        return Err(ApiError::Unauthorized);
    }
    let report = state.services.scheduler.tick(Timestamp::now()).await?;
    tracing::info!(
        scanned = report.scanned,
        renewed = report.renewed,
        errors = report.errors,
        "Manual renewal tick finished"
    );
    Ok(Json(report))
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts service errors to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    Webhook(WebhookError),
    Billing(BillingError),
    Unauthorized,
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        ApiError::Billing(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Webhook(err) => {
                let code = if err.is_rejection() {
                    "WEBHOOK_REJECTED"
                } else if matches!(err, WebhookError::UnknownGateway(_)) {
                    "UNKNOWN_GATEWAY"
                } else {
                    "WEBHOOK_FAILED"
                };
                (err.status_code(), ErrorResponse::new(code, err.to_string()))
            }
            ApiError::Billing(err) => {
                let status = match err.code() {
                    ErrorCode::SubscriptionNotFound
                    | ErrorCode::OrderNotFound
                    | ErrorCode::PaymentMethodNotFound => StatusCode::NOT_FOUND,
                    ErrorCode::InvalidStateTransition
                    | ErrorCode::ConcurrentModification
                    | ErrorCode::HardDeleteNotAllowed => StatusCode::CONFLICT,
                    ErrorCode::ValidationFailed => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    tracing::error!(error = %err, "Request failed");
                }
                (status, ErrorResponse::new(err.code().to_string(), err.message()))
            }
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new("UNAUTHORIZED", "Invalid scheduler token"),
            ),
        };
        (status, Json(body)).into_response()
    }
}

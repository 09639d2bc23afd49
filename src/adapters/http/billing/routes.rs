//! Axum routes for the billing endpoints.

use axum::http::{HeaderName, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use std::time::Duration;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{health, receive_webhook, scheduler_tick, AppState};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Builds the application router.
///
/// # Routes
///
/// - `POST /webhooks/:gateway_id` - gateway callbacks, signature verified
/// - `POST /scheduler/tick` - run one renewal pass now (cron, operators)
/// - `GET /health` - liveness probe
pub fn billing_router(state: AppState, request_timeout: Duration) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .route("/webhooks/:gateway_id", post(receive_webhook))
        .route("/scheduler/tick", post(scheduler_tick))
        .route("/health", get(health))
        .fallback(|| async { StatusCode::NOT_FOUND })
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_harness::Harness;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn router(harness: &Harness) -> Router {
        billing_router(
            AppState::new(harness.services.clone(), None),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn health_returns_ok_with_request_id() {
        let harness = Harness::new();
        let response = router(&harness)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn webhook_for_unknown_gateway_is_not_found() {
        let harness = Harness::new();
        let response = router(&harness)
            .oneshot(
                Request::post("/webhooks/paypal")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unsigned_webhook_is_bad_request() {
        let harness = Harness::new();
        let response = router(&harness)
            .oneshot(
                Request::post("/webhooks/mock")
                    .body(Body::from(r#"{"id":"evt_1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn tick_returns_report() {
        let harness = Harness::new();
        let response = router(&harness)
            .oneshot(Request::post("/scheduler/tick").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["scanned"], 0);
    }
}

//! In-process scenario tests for clinic-daemon HTTP endpoints.
//!
//! These tests spin up the Axum router **without** binding a TCP socket.
//! Each test calls `routes::build_router` and drives it via
//! `tower::ServiceExt::oneshot` — no network I/O required. Store/cache/
//! broker/verifier are `clinic-testkit` fakes; the payment gateway is a
//! real `PaymentGateway` built from dummy env vars since its constructor
//! does no I/O, but no test here drives it far enough to reach Stripe.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use clinic_daemon::{routes, state::AppState};
use clinic_pipeline::ports::{BookingPublisher, QueueCache, QueueStore, WebhookVerifier};
use clinic_testkit::{FakeBroker, FakeCache, FakePaymentVerifier, FakeStore};
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt; // oneshot

const WEBHOOK_SECRET: &str = "test-webhook-secret";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build a fresh in-process router backed by fakes for every port.
fn make_router() -> (axum::Router, Arc<FakeBroker>, Arc<FakePaymentVerifier>) {
    let store: Arc<dyn QueueStore> = Arc::new(FakeStore::new());
    let cache: Arc<dyn QueueCache> = Arc::new(FakeCache::new());
    let broker = Arc::new(FakeBroker::new());
    let publisher: Arc<dyn BookingPublisher> = broker.clone();
    let verifier = Arc::new(FakePaymentVerifier::new(WEBHOOK_SECRET));
    let verifier_port: Arc<dyn WebhookVerifier> = verifier.clone();

    std::env::set_var(clinic_payment::PaymentGateway::ENV_SECRET_KEY, "sk_test_dummy");
    std::env::set_var(clinic_payment::PaymentGateway::ENV_WEBHOOK_SECRET, WEBHOOK_SECRET);
    std::env::set_var(
        clinic_payment::PaymentGateway::ENV_SUCCESS_URL,
        "https://example.test/success",
    );
    std::env::set_var(
        clinic_payment::PaymentGateway::ENV_CANCEL_URL,
        "https://example.test/cancel",
    );
    let payment = Arc::new(clinic_payment::PaymentGateway::from_env().unwrap());

    let state = Arc::new(AppState::new(
        store,
        cache,
        publisher,
        verifier_port,
        payment,
        CancellationToken::new(),
    ));

    (routes::build_router(state), broker, verifier)
}

/// Drive the router with a single request and return (status, body_bytes).
async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_true() {
    let (router, _broker, _verifier) = make_router();
    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(axum::body::Body::empty())
        .unwrap();

    let (status, body) = call(router, req).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "clinic-daemon");
}

// ---------------------------------------------------------------------------
// POST /payment/webhook
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completed_webhook_with_valid_signature_publishes_and_returns_200() {
    let (router, broker, verifier) = make_router();
    let payload = serde_json::json!({
        "event_type": clinic_testkit::COMPLETED_EVENT_TYPE,
        "metadata": {
            "patient_id": uuid::Uuid::nil().to_string(),
            "patient_name": "Jane Doe",
            "patient_email": "jane@example.com",
            "patient_phone": "0900000000",
            "service_id": uuid::Uuid::nil().to_string(),
            "service_name": "Checkup",
            "service_code": "CHK",
            "service_cost": "500000",
            "appointment_date": "01/02/2030",
        },
    })
    .to_string();
    let signature = verifier.sign(payload.as_bytes());

    let req = Request::builder()
        .method("POST")
        .uri("/payment/webhook")
        .header("stripe-signature", signature)
        .body(axum::body::Body::from(payload))
        .unwrap();

    let (status, _body) = call(router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(broker.len(), 1);
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected_and_publishes_nothing() {
    let (router, broker, _verifier) = make_router();
    let payload = serde_json::json!({
        "event_type": clinic_testkit::COMPLETED_EVENT_TYPE,
        "metadata": {},
    })
    .to_string();

    let req = Request::builder()
        .method("POST")
        .uri("/payment/webhook")
        .header("stripe-signature", "not-the-right-signature")
        .body(axum::body::Body::from(payload))
        .unwrap();

    let (status, _body) = call(router, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(broker.is_empty());
}

#[tokio::test]
async fn webhook_with_unrecognized_event_type_is_acknowledged_without_publishing() {
    let (router, broker, verifier) = make_router();
    let payload = serde_json::json!({
        "event_type": "checkout.session.expired",
        "metadata": {},
    })
    .to_string();
    let signature = verifier.sign(payload.as_bytes());

    let req = Request::builder()
        .method("POST")
        .uri("/payment/webhook")
        .header("stripe-signature", signature)
        .body(axum::body::Body::from(payload))
        .unwrap();

    let (status, _body) = call(router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(broker.is_empty());
}

// ---------------------------------------------------------------------------
// POST /patient/register-service/:service_id
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_checkout_session_with_malformed_body_is_rejected_before_touching_payment() {
    let (router, _broker, _verifier) = make_router();
    let req = Request::builder()
        .method("POST")
        .uri("/patient/register-service/11111111-1111-1111-1111-111111111111")
        .header("content-type", "application/json")
        .body(axum::body::Body::from("not json"))
        .unwrap();

    let (status, _body) = call(router, req).await;
    assert!(status.is_client_error());
}

// ---------------------------------------------------------------------------
// DELETE /nurse/mark_complete?queueId=
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mark_complete_with_nonpositive_queue_id_is_rejected() {
    let (router, _broker, _verifier) = make_router();
    let req = Request::builder()
        .method("DELETE")
        .uri("/nurse/mark_complete?queueId=0")
        .body(axum::body::Body::empty())
        .unwrap();

    let (status, _body) = call(router, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn mark_complete_on_unknown_queue_id_reports_server_error_not_success() {
    let (router, _broker, _verifier) = make_router();
    let req = Request::builder()
        .method("DELETE")
        .uri("/nurse/mark_complete?queueId=999999")
        .body(axum::body::Body::empty())
        .unwrap();

    let (status, _body) = call(router, req).await;
    assert_ne!(status, StatusCode::OK);
}

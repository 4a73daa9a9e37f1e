//! Axum router and all HTTP handlers for clinic-daemon (§6 external
//! interfaces).
//!
//! `build_router` is the single entry point; `main.rs` calls it and
//! attaches middleware layers. All handlers are `pub(crate)` so the
//! scenario tests in `tests/` can compose the router directly.

use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use clinic_pipeline::{mark_complete, ErrorKind, PipelineError};
use clinic_schemas::{PatientSnapshot, ServiceSnapshot};
use tracing::{info, warn};

use crate::{
    api_types::{
        CreateCheckoutSessionRequest, CreateCheckoutSessionResponse, ErrorResponse,
        HealthResponse, MarkCompleteQuery, MarkCompleteResponse,
    },
    state::AppState,
};

/// Stripe's signature header; named explicitly since the wire contract in
/// §6 treats the header name as part of the external interface.
const SIGNATURE_HEADER: &str = "stripe-signature";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Only the booking-pipeline routes this core owns are registered here:
/// patient/service CRUD, auth, and image upload routes are out of scope
/// (§1) and live in the boundary layer.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/payment/webhook", post(webhook))
        .route(
            "/patient/register-service/:service_id",
            post(create_checkout_session),
        )
        .route("/nurse/queues", get(live_feed_ws))
        .route("/nurse/mark_complete", delete(mark_complete_handler))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

pub(crate) async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: "clinic-daemon",
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /payment/webhook  (§4.5 publish path)
// ---------------------------------------------------------------------------

pub(crate) async fn webhook(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    match clinic_pipeline::handle_webhook(
        st.verifier.as_ref(),
        st.publisher.as_ref(),
        &body[..],
        signature,
    )
    .await
    {
        Ok(outcome) => {
            info!(?outcome, "webhook processed");
            StatusCode::OK.into_response()
        }
        Err(e) => webhook_error_response(e),
    }
}

/// §7 propagation policy: signature failure and validation errors are 400
/// (never published); malformed metadata and transient/permanent failures
/// are 500 so the provider retries, without having published anything.
fn webhook_error_response(err: PipelineError) -> Response {
    warn!(error = %err, "webhook rejected");
    let status = match err.kind() {
        ErrorKind::SignatureInvalid | ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::MalformedMetadata
        | ErrorKind::Transient
        | ErrorKind::Permanent
        | ErrorKind::NotFound => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse::new(err.to_string()))).into_response()
}

// ---------------------------------------------------------------------------
// POST /patient/register-service/:service_id  (§4.4 checkout-session creation)
// ---------------------------------------------------------------------------

pub(crate) async fn create_checkout_session(
    State(st): State<Arc<AppState>>,
    Json(req): Json<CreateCheckoutSessionRequest>,
) -> Response {
    let patient = PatientSnapshot {
        patient_id: req.patient_id,
        patient_name: req.patient_name,
        patient_email: req.patient_email,
        patient_phone: req.patient_phone,
    };
    let service = ServiceSnapshot {
        service_id: req.service_id,
        service_name: req.service_name,
        service_code: req.service_code,
        service_cost: req.service_cost,
    };

    match st
        .payment
        .create_checkout_session(&patient, &service, req.appointment_at)
        .await
    {
        Ok(result) => (
            StatusCode::OK,
            Json(CreateCheckoutSessionResponse {
                url: result.url,
                session_id: result.session_id,
            }),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "checkout session creation failed");
            let status = match e {
                clinic_payment::PaymentError::Validation(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(ErrorResponse::new(e.to_string()))).into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// DELETE /nurse/mark_complete?queueId=  (§4.5 completion path)
// ---------------------------------------------------------------------------

pub(crate) async fn mark_complete_handler(
    State(st): State<Arc<AppState>>,
    Query(params): Query<MarkCompleteQuery>,
) -> Response {
    match mark_complete(st.cache.as_ref(), st.store.as_ref(), params.queue_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(MarkCompleteResponse {
                queue_id: params.queue_id,
                booking_status: "completed",
            }),
        )
            .into_response(),
        Err(e) => {
            let status = match e.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            warn!(error = %e, queue_id = params.queue_id, "mark_complete failed");
            (status, Json(ErrorResponse::new(e.to_string()))).into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// GET /nurse/queues  (§4.6 Live Feed)
// ---------------------------------------------------------------------------

pub(crate) async fn live_feed_ws(
    ws: WebSocketUpgrade,
    State(st): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| live_feed_session(socket, st))
}

/// One Live Feed session (§4.6): handshake, then drive the transport-agnostic
/// subscriber loop from `clinic-pipeline` through a single-slot mailbox,
/// writing whatever it produces as text frames until the client disconnects
/// or the process-wide cancellation signal fires.
async fn live_feed_session(mut socket: WebSocket, state: Arc<AppState>) {
    // Step 1: the handshake message's content is not inspected, only its
    // arrival (liveness/readiness signal).
    match socket.recv().await {
        Some(Ok(_)) => {}
        _ => return,
    }

    let (mailbox_tx, mut mailbox_rx) = tokio::sync::watch::channel(None);
    let session_cancel = state.cancel.child_token();

    let subscriber = tokio::spawn(clinic_pipeline::run_subscriber_loop(
        state.cache.clone(),
        state.store.clone(),
        mailbox_tx,
        session_cancel.clone(),
    ));

    loop {
        tokio::select! {
            _ = session_cancel.cancelled() => break,
            changed = mailbox_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let frame = mailbox_rx.borrow_and_update().clone();
                if let Some(text) = frame {
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    // Step 5: unsubscribe, release the connection.
    session_cancel.cancel();
    let _ = subscriber.await;
}

//! Request and response types for clinic-daemon's HTTP endpoints (§6).
//!
//! No business logic lives here. Field names on the wire match the naming
//! the boundary layer's other (out-of-scope) services already use, not the
//! internal `clinic_schemas` struct names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// POST /patient/register-service/:service_id
// ---------------------------------------------------------------------------

/// Everything the boundary layer has already resolved (authenticated
/// patient, looked-up service) by the time this core is called — patient
/// and service CRUD/lookup themselves are out of scope (§1).
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCheckoutSessionRequest {
    pub patient_id: Uuid,
    pub patient_name: String,
    pub patient_email: String,
    pub patient_phone: String,
    pub service_id: Uuid,
    pub service_name: String,
    pub service_code: String,
    pub service_cost: i64,
    pub appointment_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateCheckoutSessionResponse {
    pub url: String,
    pub session_id: String,
}

// ---------------------------------------------------------------------------
// DELETE /nurse/mark_complete?queueId=
// ---------------------------------------------------------------------------

/// `queueId` (camelCase, query parameter) is carried forward from the
/// original route contract rather than renamed to snake_case (§6).
#[derive(Debug, Clone, Deserialize)]
pub struct MarkCompleteQuery {
    #[serde(rename = "queueId")]
    pub queue_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkCompleteResponse {
    pub queue_id: i64,
    pub booking_status: &'static str,
}

// ---------------------------------------------------------------------------
// Shared error envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

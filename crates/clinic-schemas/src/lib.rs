use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of the payment leg of a booking. `Paid` is terminal with respect
/// to payment; there is no refund/chargeback state in this core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    WaitingForPayment,
    Paid,
}

/// Status of the booking itself, independent of payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Waiting,
    InProgress,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Waiting => "waiting",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(BookingStatus::Waiting),
            "in_progress" => Some(BookingStatus::InProgress),
            "completed" => Some(BookingStatus::Completed),
            _ => None,
        }
    }

    /// True once this status no longer belongs in the live queue cache.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, BookingStatus::Waiting | BookingStatus::InProgress)
    }
}

/// Denormalized patient fields carried inside a booking; immutable once the
/// row is created, since the booking is a snapshot of the transaction at
/// payment time, not a live view of the patient record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientSnapshot {
    pub patient_id: Uuid,
    pub patient_name: String,
    pub patient_email: String,
    pub patient_phone: String,
}

/// Denormalized service fields carried inside a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub service_id: Uuid,
    pub service_name: String,
    pub service_code: String,
    /// Whole VND, never a sub-unit, never a float.
    pub service_cost: i64,
}

/// A booking that has been requested but not yet confirmed paid. Carried as
/// payment-provider metadata; never a persisted row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingIntent {
    pub patient: PatientSnapshot,
    pub service: ServiceSnapshot,
    pub appointment_at: DateTime<Utc>,
}

/// The broker wire payload: what the publish path sends and the consumer
/// decodes. Field names are the external contract (see clinic-pipeline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingEnvelope {
    pub patient_id: Uuid,
    pub patient_name: String,
    pub patient_email: String,
    pub patient_phone_number: String,
    pub service_id: Uuid,
    pub service_name: String,
    pub service_code: String,
    pub cost: i64,
    pub payment_status: PaymentStatus,
    pub booking_status: BookingStatus,
    pub appointment: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<BookingIntent> for BookingEnvelope {
    fn from(intent: BookingIntent) -> Self {
        BookingEnvelope {
            patient_id: intent.patient.patient_id,
            patient_name: intent.patient.patient_name,
            patient_email: intent.patient.patient_email,
            patient_phone_number: intent.patient.patient_phone,
            service_id: intent.service.service_id,
            service_name: intent.service.service_name,
            service_code: intent.service.service_code,
            cost: intent.service.service_cost,
            payment_status: PaymentStatus::Paid,
            booking_status: BookingStatus::Waiting,
            appointment: intent.appointment_at,
            created_at: Utc::now(),
        }
    }
}

/// Optional drug receipt, one-to-optional-one with a booking by `queue_id`.
/// No write path is exposed by this core; it is read-joined only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrugReceipt {
    pub queue_id: i64,
    pub drug_name: String,
    pub usage_instructions: String,
    pub notes: Option<String>,
}

/// A persisted booking row, the core entity of this system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingQueueRow {
    pub queue_id: i64,
    pub patient: PatientSnapshot,
    pub service: ServiceSnapshot,
    pub appointment_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub payment_status: PaymentStatus,
    pub booking_status: BookingStatus,
    pub drug_receipt: Option<DrugReceipt>,
}

/// A single outbound Live Feed frame. Only `QueueList` is emitted by this
/// core; the `Raw` variant models pass-through forwarding of any notification
/// payload this core did not originate (see clinic-pipeline's live feed
/// session loop, which serializes `QueueList` but writes `Raw` payloads
/// verbatim rather than through this enum).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveFeedFrame {
    QueueList { data: Vec<BookingQueueRow> },
}

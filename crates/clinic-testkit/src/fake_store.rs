//! In-memory `QueueStore` fake, standing in for Postgres in scenario tests
//! that exercise `clinic-pipeline` and `clinic-daemon` without a live
//! database (§8 test tooling).

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clinic_pipeline::ports::QueueStore;
use clinic_pipeline::PipelineError;
use clinic_schemas::{BookingEnvelope, BookingQueueRow, BookingStatus, PatientSnapshot, PaymentStatus, ServiceSnapshot};
use uuid::Uuid;

#[derive(Default)]
pub struct FakeStore {
    rows: Mutex<Vec<BookingQueueRow>>,
    next_id: Mutex<i64>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
        }
    }

    fn dedup_key(env: &BookingEnvelope) -> (Uuid, Uuid, DateTime<Utc>, DateTime<Utc>) {
        (env.patient_id, env.service_id, env.appointment, env.created_at)
    }

    fn transition_is_legal(from: BookingStatus, to: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (from, to),
            (Waiting, InProgress) | (Waiting, Completed) | (InProgress, Completed)
        ) || from == to
    }

    /// Snapshot of every row currently held, for assertions in tests.
    pub fn snapshot(&self) -> Vec<BookingQueueRow> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueueStore for FakeStore {
    async fn create(&self, env: &BookingEnvelope) -> Result<BookingQueueRow, PipelineError> {
        let key = Self::dedup_key(env);
        let mut rows = self.rows.lock().unwrap();

        if let Some(existing) = rows.iter().find(|r| {
            (r.patient.patient_id, r.service.service_id, r.appointment_at, r.created_at) == key
        }) {
            return Ok(existing.clone());
        }

        let mut next_id = self.next_id.lock().unwrap();
        let queue_id = *next_id;
        *next_id += 1;

        let row = BookingQueueRow {
            queue_id,
            patient: PatientSnapshot {
                patient_id: env.patient_id,
                patient_name: env.patient_name.clone(),
                patient_email: env.patient_email.clone(),
                patient_phone: env.patient_phone_number.clone(),
            },
            service: ServiceSnapshot {
                service_id: env.service_id,
                service_name: env.service_name.clone(),
                service_code: env.service_code.clone(),
                service_cost: env.cost,
            },
            appointment_at: env.appointment,
            created_at: env.created_at,
            payment_status: PaymentStatus::Paid,
            booking_status: BookingStatus::Waiting,
            drug_receipt: None,
        };

        rows.push(row.clone());
        Ok(row)
    }

    async fn update_status(
        &self,
        queue_id: i64,
        new_status: BookingStatus,
    ) -> Result<(), PipelineError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| r.queue_id == queue_id)
            .ok_or(PipelineError::NotFound)?;

        if !Self::transition_is_legal(row.booking_status, new_status) {
            return Err(PipelineError::Permanent(format!(
                "illegal transition {:?} -> {:?}",
                row.booking_status, new_status
            )));
        }

        row.booking_status = new_status;
        Ok(())
    }

    async fn get_all(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<BookingQueueRow>, i64), PipelineError> {
        let rows = self.rows.lock().unwrap();
        let mut sorted = rows.clone();
        sorted.sort_by_key(|r| r.queue_id);
        let total = sorted.len() as i64;
        let page = sorted
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn get_history_by_patient(
        &self,
        patient_id: Uuid,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<BookingQueueRow>, PipelineError> {
        let rows = self.rows.lock().unwrap();
        let mut matching: Vec<_> = rows
            .iter()
            .filter(|r| r.patient.patient_id == patient_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn get_detail_by_queue_id(
        &self,
        queue_id: i64,
    ) -> Result<Option<BookingQueueRow>, PipelineError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.iter().find(|r| r.queue_id == queue_id).cloned())
    }

    async fn delete_by_queue_id(&self, queue_id: i64) -> Result<(), PipelineError> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| r.queue_id != queue_id);
        if rows.len() == before {
            return Err(PipelineError::NotFound);
        }
        Ok(())
    }
}

//! Marking a booking complete drops it from the Live Feed snapshot but
//! leaves it reachable through patient history (§8 scenario: "completion
//! removes from live view but preserves history").

use std::sync::Arc;

use chrono::Utc;
use clinic_pipeline::ports::QueueStore;
use clinic_pipeline::{build_snapshot, mark_complete};
use clinic_schemas::{BookingEnvelope, BookingStatus, PaymentStatus};
use clinic_testkit::{FakeCache, FakeStore};
use uuid::Uuid;

fn sample_envelope(patient_id: Uuid) -> BookingEnvelope {
    BookingEnvelope {
        patient_id,
        patient_name: "Bob".into(),
        patient_email: "bob@example.com".into(),
        patient_phone_number: "0911111111".into(),
        service_id: Uuid::new_v4(),
        service_name: "Dental".into(),
        service_code: "DNT".into(),
        cost: 200_000,
        payment_status: PaymentStatus::Paid,
        booking_status: BookingStatus::Waiting,
        appointment: Utc::now(),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn completed_booking_leaves_snapshot_but_stays_in_history() {
    let store = Arc::new(FakeStore::new());
    let cache = Arc::new(FakeCache::new());
    let patient_id = Uuid::new_v4();

    let envelope = sample_envelope(patient_id);
    let row = store.create(&envelope).await.unwrap();
    cache
        .hset("queue", &row.queue_id.to_string(), &serde_json::to_string(&row).unwrap())
        .await
        .unwrap();

    let before = build_snapshot(cache.as_ref(), store.as_ref()).await.unwrap();
    assert_eq!(before.len(), 1);

    mark_complete(cache.as_ref(), store.as_ref(), row.queue_id)
        .await
        .unwrap();

    let after = build_snapshot(cache.as_ref(), store.as_ref()).await.unwrap();
    assert!(after.is_empty());

    let history = store
        .get_history_by_patient(patient_id, 0, 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].booking_status, BookingStatus::Completed);
}

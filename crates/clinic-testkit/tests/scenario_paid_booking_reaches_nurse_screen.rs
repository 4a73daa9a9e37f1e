//! A paid booking travels webhook -> broker -> consumer -> store + cache,
//! and shows up in the Live Feed snapshot a nurse would see (§8 scenario:
//! "paid booking reaches a nurse screen").

use std::collections::HashMap;
use std::sync::Arc;

use clinic_broker::MessageHandler;
use clinic_pipeline::{build_snapshot, handle_webhook, ConsumerHandler, PublishOutcome};
use clinic_testkit::{FakeBroker, FakeCache, FakePaymentVerifier, FakeStore, COMPLETED_EVENT_TYPE};

fn completed_event_payload() -> Vec<u8> {
    let mut metadata = HashMap::new();
    metadata.insert("patient_id".into(), uuid::Uuid::nil().to_string());
    metadata.insert("patient_name".into(), "Alice".into());
    metadata.insert("patient_email".into(), "alice@example.com".into());
    metadata.insert("patient_phone".into(), "0900000000".into());
    metadata.insert("service_id".into(), uuid::Uuid::nil().to_string());
    metadata.insert("service_name".into(), "Checkup".into());
    metadata.insert("service_code".into(), "CHK".into());
    metadata.insert("service_cost".into(), "500000".into());
    metadata.insert("appointment_date".into(), "01/06/2025".into());

    let event = serde_json::json!({
        "event_type": COMPLETED_EVENT_TYPE,
        "metadata": metadata,
    });
    serde_json::to_vec(&event).unwrap()
}

#[tokio::test]
async fn paid_booking_is_visible_in_the_live_feed_snapshot() {
    let verifier = FakePaymentVerifier::new("test-secret");
    let broker = FakeBroker::new();
    let store = Arc::new(FakeStore::new());
    let cache = Arc::new(FakeCache::new());

    let payload = completed_event_payload();
    let signature = verifier.sign(&payload);

    let outcome = handle_webhook(&verifier, &broker, &payload, &signature)
        .await
        .unwrap();
    assert_eq!(outcome, PublishOutcome::Published);

    let published = broker.drain_one().expect("one envelope should be queued");

    let handler = ConsumerHandler::new(store.clone(), cache.clone());
    let outcome = handler.handle(&published).await;
    assert!(matches!(outcome, clinic_broker::HandlerOutcome::Ack));

    let snapshot = build_snapshot(cache.as_ref(), store.as_ref()).await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].patient.patient_name, "Alice");
}

//! Publish path (§4.5): webhook -> verify -> branch on event type -> extract
//! intent -> publish. Runs inside the HTTP handler for the webhook; this
//! module contains everything up to "respond 200/400/500", leaving the
//! actual HTTP response mapping to `clinic-daemon`.

use clinic_schemas::BookingEnvelope;
use tracing::info;

use crate::error::PipelineError;
use crate::ports::{BookingPublisher, VerifiedEvent, WebhookVerifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Published a booking intent.
    Published,
    /// Event type was not `checkout.session.completed`; nothing to do.
    Ignored,
}

/// Run the full publish path. Returns `Ok` for both a successful publish
/// and an ignored event type (both map to HTTP 200); returns `Err` for
/// signature failure (400) or malformed metadata / publish failure (500).
pub async fn handle_webhook(
    verifier: &dyn WebhookVerifier,
    publisher: &dyn BookingPublisher,
    payload: &[u8],
    signature_header: &str,
) -> Result<PublishOutcome, PipelineError> {
    // Steps 2-3: verify signature, branch on event type.
    let metadata = match verifier.verify_and_parse(payload, signature_header)? {
        VerifiedEvent::Ignored => return Ok(PublishOutcome::Ignored),
        VerifiedEvent::Completed { metadata } => metadata,
    };

    // Step 4: extract intent. Malformed metadata must not be published
    // (this avoids poisoning the queue) — surfaced as 500 by the caller.
    let intent = clinic_payment::PaymentGateway::extract_intent(&metadata)?;

    // Step 5: publish.
    let envelope: BookingEnvelope = intent.into();
    publisher.publish_intent(&envelope).await?;

    info!(patient_id = %envelope.patient_id, "booking intent published");
    Ok(PublishOutcome::Published)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{BookingPublisher, WebhookVerifier};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedVerifier(VerifiedEventKind);
    enum VerifiedEventKind {
        Ignored,
        SignatureInvalid,
        Completed,
    }

    impl WebhookVerifier for FixedVerifier {
        fn verify_and_parse(
            &self,
            _payload: &[u8],
            _sig: &str,
        ) -> Result<VerifiedEvent, PipelineError> {
            match self.0 {
                VerifiedEventKind::Ignored => Ok(VerifiedEvent::Ignored),
                VerifiedEventKind::SignatureInvalid => Err(PipelineError::SignatureInvalid),
                VerifiedEventKind::Completed => {
                    let mut metadata = std::collections::HashMap::new();
                    metadata.insert("patient_id".into(), uuid::Uuid::nil().to_string());
                    metadata.insert("patient_name".into(), "A".into());
                    metadata.insert("patient_email".into(), "a@example.com".into());
                    metadata.insert("patient_phone".into(), "0900000000".into());
                    metadata.insert("service_id".into(), uuid::Uuid::nil().to_string());
                    metadata.insert("service_name".into(), "Checkup".into());
                    metadata.insert("service_code".into(), "CHK".into());
                    metadata.insert("service_cost".into(), "500000".into());
                    metadata.insert("appointment_date".into(), "01/06/2025".into());
                    Ok(VerifiedEvent::Completed { metadata })
                }
            }
        }
    }

    struct CountingPublisher(Arc<AtomicUsize>);

    #[async_trait]
    impl BookingPublisher for CountingPublisher {
        async fn publish_intent(&self, _env: &BookingEnvelope) -> Result<(), PipelineError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn ignored_event_type_publishes_nothing() {
        let count = Arc::new(AtomicUsize::new(0));
        let outcome = handle_webhook(
            &FixedVerifier(VerifiedEventKind::Ignored),
            &CountingPublisher(count.clone()),
            b"{}",
            "sig",
        )
        .await
        .unwrap();

        assert_eq!(outcome, PublishOutcome::Ignored);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn bad_signature_never_publishes() {
        let count = Arc::new(AtomicUsize::new(0));
        let err = handle_webhook(
            &FixedVerifier(VerifiedEventKind::SignatureInvalid),
            &CountingPublisher(count.clone()),
            b"{}",
            "sig",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::SignatureInvalid));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn completed_event_publishes_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let outcome = handle_webhook(
            &FixedVerifier(VerifiedEventKind::Completed),
            &CountingPublisher(count.clone()),
            b"{}",
            "sig",
        )
        .await
        .unwrap();

        assert_eq!(outcome, PublishOutcome::Published);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

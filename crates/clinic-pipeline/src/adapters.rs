//! Production adapters binding the real Postgres/RabbitMQ/Redis/Stripe
//! clients to this crate's `ports` traits. `clinic-daemon::state::AppState`
//! constructs one of each at startup and passes them down by reference —
//! no global singletons (§9).

use std::collections::HashMap;

use async_trait::async_trait;
use clinic_schemas::{BookingEnvelope, BookingQueueRow, BookingStatus};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::ports::{BookingPublisher, QueueCache, QueueStore, Subscription, VerifiedEvent, WebhookVerifier};

// ---------------------------------------------------------------------------
// QueueStore -> clinic-store
// ---------------------------------------------------------------------------

pub struct StoreAdapter(pub PgPool);

#[async_trait]
impl QueueStore for StoreAdapter {
    async fn create(&self, env: &BookingEnvelope) -> Result<BookingQueueRow, PipelineError> {
        Ok(clinic_store::create(&self.0, env).await?)
    }

    async fn update_status(
        &self,
        queue_id: i64,
        new_status: BookingStatus,
    ) -> Result<(), PipelineError> {
        Ok(clinic_store::update_status(&self.0, queue_id, new_status).await?)
    }

    async fn get_all(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<BookingQueueRow>, i64), PipelineError> {
        Ok(clinic_store::get_all(&self.0, offset, limit).await?)
    }

    async fn get_history_by_patient(
        &self,
        patient_id: Uuid,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<BookingQueueRow>, PipelineError> {
        Ok(clinic_store::get_history_by_patient(&self.0, patient_id, offset, limit).await?)
    }

    async fn get_detail_by_queue_id(
        &self,
        queue_id: i64,
    ) -> Result<Option<BookingQueueRow>, PipelineError> {
        Ok(clinic_store::get_detail_by_queue_id(&self.0, queue_id).await?)
    }

    async fn delete_by_queue_id(&self, queue_id: i64) -> Result<(), PipelineError> {
        Ok(clinic_store::delete_by_queue_id(&self.0, queue_id).await?)
    }
}

// ---------------------------------------------------------------------------
// QueueCache -> clinic-cache
// ---------------------------------------------------------------------------

pub struct CacheAdapter(pub clinic_cache::CacheClient);

#[async_trait]
impl QueueCache for CacheAdapter {
    async fn hset(&self, name: &str, field: &str, value: &str) -> Result<(), PipelineError> {
        self.0
            .hset(name, field, value)
            .await
            .map_err(|e| PipelineError::Transient(e.into()))
    }

    async fn hgetall(&self, name: &str) -> Result<HashMap<String, String>, PipelineError> {
        self.0
            .hgetall(name)
            .await
            .map_err(|e| PipelineError::Transient(e.into()))
    }

    async fn hdel(&self, name: &str, field: &str) -> Result<(), PipelineError> {
        self.0
            .hdel(name, field)
            .await
            .map_err(|e| PipelineError::Transient(e.into()))
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), PipelineError> {
        self.0
            .publish(channel, message)
            .await
            .map_err(|e| PipelineError::Transient(e.into()))
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, PipelineError> {
        let sub = self
            .0
            .subscribe(channel)
            .await
            .map_err(|e| PipelineError::Transient(e.into()))?;
        Ok(Box::new(CacheSubscriptionAdapter(sub)))
    }
}

struct CacheSubscriptionAdapter(clinic_cache::CacheSubscription);

#[async_trait]
impl Subscription for CacheSubscriptionAdapter {
    async fn next_message(&mut self) -> Option<String> {
        self.0.next_message().await
    }
}

// ---------------------------------------------------------------------------
// BookingPublisher -> clinic-broker
// ---------------------------------------------------------------------------

pub struct BrokerPublisherAdapter(pub std::sync::Arc<clinic_broker::BrokerClient>);

#[async_trait]
impl BookingPublisher for BrokerPublisherAdapter {
    async fn publish_intent(&self, env: &BookingEnvelope) -> Result<(), PipelineError> {
        let payload = serde_json::to_vec(env)
            .map_err(|e| PipelineError::Permanent(format!("encode envelope: {e}")))?;
        self.0
            .publish(&payload)
            .await
            .map_err(|e| PipelineError::Transient(e.into()))
    }
}

// ---------------------------------------------------------------------------
// WebhookVerifier -> clinic-payment
// ---------------------------------------------------------------------------

/// Holds an `Arc` rather than an owned `PaymentGateway` so the daemon can
/// share the one Stripe client between webhook verification and checkout
/// session creation without constructing it twice.
pub struct PaymentVerifierAdapter(pub std::sync::Arc<clinic_payment::PaymentGateway>);

impl WebhookVerifier for PaymentVerifierAdapter {
    fn verify_and_parse(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<VerifiedEvent, PipelineError> {
        match self.0.verify_and_parse_webhook(payload, signature_header)? {
            clinic_payment::WebhookOutcome::Completed { metadata } => {
                Ok(VerifiedEvent::Completed { metadata })
            }
            clinic_payment::WebhookOutcome::Ignored => Ok(VerifiedEvent::Ignored),
        }
    }
}

//! Injection seams (§9 "replace global singletons with explicit
//! constructor injection"). Every component this pipeline orchestrates is
//! reached through one of these traits, so `clinic-daemon`'s production
//! wiring and `clinic-testkit`'s in-memory fakes satisfy the same contract.

use std::collections::HashMap;

use async_trait::async_trait;
use clinic_schemas::{BookingEnvelope, BookingQueueRow, BookingStatus};
use uuid::Uuid;

use crate::error::PipelineError;

/// Queue Store (§4.1).
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn create(&self, env: &BookingEnvelope) -> Result<BookingQueueRow, PipelineError>;

    async fn update_status(
        &self,
        queue_id: i64,
        new_status: BookingStatus,
    ) -> Result<(), PipelineError>;

    async fn get_all(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<BookingQueueRow>, i64), PipelineError>;

    async fn get_history_by_patient(
        &self,
        patient_id: Uuid,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<BookingQueueRow>, PipelineError>;

    async fn get_detail_by_queue_id(
        &self,
        queue_id: i64,
    ) -> Result<Option<BookingQueueRow>, PipelineError>;

    async fn delete_by_queue_id(&self, queue_id: i64) -> Result<(), PipelineError>;
}

/// Cache (§4.3): the hash + pub/sub capability groups the pipeline needs.
/// The key/value-with-TTL group has no pipeline caller and is reached
/// directly through `clinic_cache::CacheClient` by whatever boundary code
/// needs session artifacts.
#[async_trait]
pub trait QueueCache: Send + Sync {
    async fn hset(&self, name: &str, field: &str, value: &str) -> Result<(), PipelineError>;
    async fn hgetall(&self, name: &str) -> Result<HashMap<String, String>, PipelineError>;
    async fn hdel(&self, name: &str, field: &str) -> Result<(), PipelineError>;
    async fn publish(&self, channel: &str, message: &str) -> Result<(), PipelineError>;
    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<Box<dyn Subscription>, PipelineError>;
}

/// An active pub/sub subscription, abstracted so the Live Feed session loop
/// doesn't need to know whether it is talking to Redis or an in-memory fake.
#[async_trait]
pub trait Subscription: Send {
    async fn next_message(&mut self) -> Option<String>;
}

/// Broker Client (§4.2), publish side only — the consume side is driven
/// from `clinic_broker::BrokerClient` directly since its supervised
/// reconnect loop is infrastructure, not orchestration logic.
#[async_trait]
pub trait BookingPublisher: Send + Sync {
    async fn publish_intent(&self, env: &BookingEnvelope) -> Result<(), PipelineError>;
}

/// Payment Gateway (§4.4), webhook-verification side. Checkout-session
/// creation has no pipeline-internal caller (the daemon calls
/// `clinic_payment::PaymentGateway` directly from the registration route),
/// so only verification is exposed as a port.
pub trait WebhookVerifier: Send + Sync {
    fn verify_and_parse(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<VerifiedEvent, PipelineError>;
}

pub enum VerifiedEvent {
    Completed { metadata: HashMap<String, String> },
    Ignored,
}

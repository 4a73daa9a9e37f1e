//! Consumer pipeline (§4.5 "Consume path"): decode, persist, cache, notify.

use std::sync::Arc;

use async_trait::async_trait;
use clinic_broker::{HandlerOutcome, MessageHandler};
use clinic_schemas::BookingEnvelope;
use tracing::{error, info, warn};

use crate::ports::{QueueCache, QueueStore};

pub const QUEUE_HASH_NAME: &str = "queue";
pub const UPDATES_CHANNEL: &str = "queue_updates";
pub const UPDATED_MESSAGE: &str = "updated";

pub struct ConsumerHandler {
    store: Arc<dyn QueueStore>,
    cache: Arc<dyn QueueCache>,
}

impl ConsumerHandler {
    pub fn new(store: Arc<dyn QueueStore>, cache: Arc<dyn QueueCache>) -> Self {
        Self { store, cache }
    }
}

#[async_trait]
impl MessageHandler for ConsumerHandler {
    async fn handle(&self, payload: &[u8]) -> HandlerOutcome {
        // Step 2: decode. A malformed payload is permanent — drop it rather
        // than requeue it forever (§7 Permanent, §8 boundary behavior).
        let envelope: BookingEnvelope = match serde_json::from_slice(payload) {
            Ok(env) => env,
            Err(e) => {
                error!(error = %e, "dropping malformed broker message");
                return HandlerOutcome::NackDrop;
            }
        };

        // Step 3-4: persist. Idempotent under redelivery (clinic-store's
        // unique-constraint-driven upsert); a transient store failure
        // requeues so a later redelivery can retry.
        let row = match self.store.create(&envelope).await {
            Ok(row) => row,
            Err(e) => {
                warn!(error = %e, "persist failed, requeueing for retry");
                return HandlerOutcome::NackRequeue;
            }
        };

        // Step 5: cache write. Persistence is authoritative — a cache
        // failure here is logged but does not requeue the message (the
        // booking is already durably persisted).
        let serialized = match serde_json::to_string(&row) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to serialize persisted row for cache");
                return HandlerOutcome::Ack;
            }
        };

        if let Err(e) = self
            .cache
            .hset(QUEUE_HASH_NAME, &row.queue_id.to_string(), &serialized)
            .await
        {
            warn!(error = %e, queue_id = row.queue_id, "cache hset failed, continuing");
        }

        // Step 6: pub/sub notify. Best-effort; failure is logged, not
        // fatal (§4.5, §5 ordering guarantee: cache write precedes this).
        if let Err(e) = self.cache.publish(UPDATES_CHANNEL, UPDATED_MESSAGE).await {
            warn!(error = %e, "pubsub notify failed, continuing");
        }

        info!(queue_id = row.queue_id, "booking persisted and cached");

        // Step 7: acknowledge.
        HandlerOutcome::Ack
    }
}

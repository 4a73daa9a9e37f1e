//! Completion path (§4.5 "Completion path"): invoked from a nurse action.

use clinic_schemas::BookingStatus;
use tracing::warn;

use crate::consumer::QUEUE_HASH_NAME;
use crate::error::PipelineError;
use crate::ports::{QueueCache, QueueStore};

/// Mark a booking complete. Validates `queue_id >= 1`, removes the cache
/// entry (idempotent — a missing field is not an error), then transitions
/// the store. If the store transition fails after the cache entry has
/// already been removed, the next Live Feed snapshot refresh will surface
/// the authoritative store state (§4.5 step 4 reconciliation note).
pub async fn mark_complete(
    cache: &dyn QueueCache,
    store: &dyn QueueStore,
    queue_id: i64,
) -> Result<(), PipelineError> {
    if queue_id < 1 {
        return Err(PipelineError::Validation(format!(
            "queue_id must be >= 1, got {queue_id}"
        )));
    }

    cache.hdel(QUEUE_HASH_NAME, &queue_id.to_string()).await?;

    if let Err(e) = store.update_status(queue_id, BookingStatus::Completed).await {
        warn!(
            error = %e,
            queue_id,
            "store transition failed after cache entry removed; next snapshot reconciles"
        );
        return Err(e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_id_below_one_is_rejected_before_touching_cache_or_store() {
        struct PanicCache;
        #[async_trait::async_trait]
        impl QueueCache for PanicCache {
            async fn hset(&self, _: &str, _: &str, _: &str) -> Result<(), PipelineError> {
                unreachable!()
            }
            async fn hgetall(
                &self,
                _: &str,
            ) -> Result<std::collections::HashMap<String, String>, PipelineError> {
                unreachable!()
            }
            async fn hdel(&self, _: &str, _: &str) -> Result<(), PipelineError> {
                panic!("must not be called for invalid queue_id")
            }
            async fn publish(&self, _: &str, _: &str) -> Result<(), PipelineError> {
                unreachable!()
            }
            async fn subscribe(
                &self,
                _: &str,
            ) -> Result<Box<dyn crate::ports::Subscription>, PipelineError> {
                unreachable!()
            }
        }
        struct PanicStore;
        #[async_trait::async_trait]
        impl QueueStore for PanicStore {
            async fn create(
                &self,
                _: &clinic_schemas::BookingEnvelope,
            ) -> Result<clinic_schemas::BookingQueueRow, PipelineError> {
                unreachable!()
            }
            async fn update_status(&self, _: i64, _: BookingStatus) -> Result<(), PipelineError> {
                panic!("must not be called for invalid queue_id")
            }
            async fn get_all(
                &self,
                _: i64,
                _: i64,
            ) -> Result<(Vec<clinic_schemas::BookingQueueRow>, i64), PipelineError> {
                unreachable!()
            }
            async fn get_history_by_patient(
                &self,
                _: uuid::Uuid,
                _: i64,
                _: i64,
            ) -> Result<Vec<clinic_schemas::BookingQueueRow>, PipelineError> {
                unreachable!()
            }
            async fn get_detail_by_queue_id(
                &self,
                _: i64,
            ) -> Result<Option<clinic_schemas::BookingQueueRow>, PipelineError> {
                unreachable!()
            }
            async fn delete_by_queue_id(&self, _: i64) -> Result<(), PipelineError> {
                unreachable!()
            }
        }

        let err = mark_complete(&PanicCache, &PanicStore, 0).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}

//! Live Feed (§4.6): snapshot construction and the subscriber-side session
//! loop. Transport (accepting the websocket upgrade, reading the handshake
//! message, and the writer loop that actually writes frames) lives in
//! `clinic-daemon`, since it is the only crate that knows about axum's
//! websocket types; everything here is transport-agnostic.

use std::sync::Arc;

use clinic_schemas::{BookingQueueRow, LiveFeedFrame};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::consumer::{QUEUE_HASH_NAME, UPDATED_MESSAGE, UPDATES_CHANNEL};
use crate::error::PipelineError;
use crate::ports::{QueueCache, QueueStore};

pub const DEFAULT_SNAPSHOT_LIMIT: i64 = 1_000;

/// A single-slot outbound mailbox (§9 "snapshot-with-coalescing
/// broadcast"): a newer message always supersedes an unsent older one, so a
/// slow client observes the latest state rather than a growing backlog.
pub type Mailbox = watch::Sender<Option<String>>;

/// Build the initial/refreshed snapshot (§4.6 step 2): read the cache hash;
/// if it is empty, fall through to the store and repopulate the hash as a
/// side effect so future readers hit the cache. Each row is `hset`
/// individually keyed by its own `queue_id`, so repopulation covers every
/// row, not just the last one seen.
pub async fn build_snapshot(
    cache: &dyn QueueCache,
    store: &dyn QueueStore,
) -> Result<Vec<BookingQueueRow>, PipelineError> {
    let hash = cache.hgetall(QUEUE_HASH_NAME).await?;

    if !hash.is_empty() {
        let mut rows: Vec<BookingQueueRow> = hash
            .values()
            .filter_map(|value| match serde_json::from_str(value) {
                Ok(row) => Some(row),
                Err(e) => {
                    warn!(error = %e, "dropping undecodable cached row from snapshot");
                    None
                }
            })
            .collect();
        rows.sort_by_key(|r| r.queue_id);
        return Ok(rows);
    }

    let (rows, _total) = store.get_all(0, DEFAULT_SNAPSHOT_LIMIT).await?;
    for row in &rows {
        let serialized = match serde_json::to_string(row) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, queue_id = row.queue_id, "failed to serialize row for repopulation");
                continue;
            }
        };
        if let Err(e) = cache
            .hset(QUEUE_HASH_NAME, &row.queue_id.to_string(), &serialized)
            .await
        {
            warn!(error = %e, queue_id = row.queue_id, "cache repopulation hset failed");
        }
    }
    Ok(rows)
}

/// Serialize a snapshot as the outbound `{type:"queue_list", data:[...]}`
/// frame (§6).
pub fn snapshot_frame(data: Vec<BookingQueueRow>) -> String {
    let frame = LiveFeedFrame::QueueList { data };
    // A `LiveFeedFrame` is always representable as JSON; this cannot fail.
    serde_json::to_string(&frame).expect("LiveFeedFrame always serializes")
}

/// The subscriber side of one Live Feed session (§4.6 steps 2-4): send the
/// initial snapshot, then subscribe to `queue_updates` and push a rebuilt
/// snapshot (or forward any other payload verbatim) into `mailbox` for the
/// writer task to drain. Returns once `cancel` fires or the subscription
/// closes (step 5).
pub async fn run_subscriber_loop(
    cache: Arc<dyn QueueCache>,
    store: Arc<dyn QueueStore>,
    mailbox: Mailbox,
    cancel: CancellationToken,
) {
    match build_snapshot(cache.as_ref(), store.as_ref()).await {
        Ok(rows) => {
            let _ = mailbox.send(Some(snapshot_frame(rows)));
        }
        Err(e) => {
            warn!(error = %e, "initial snapshot failed, sending empty snapshot");
            let _ = mailbox.send(Some(snapshot_frame(vec![])));
        }
    }

    let mut subscription = match cache.subscribe(UPDATES_CHANNEL).await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to subscribe to queue_updates, ending session");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            message = subscription.next_message() => {
                let Some(message) = message else { return };

                if message == UPDATED_MESSAGE {
                    match build_snapshot(cache.as_ref(), store.as_ref()).await {
                        Ok(rows) => {
                            let _ = mailbox.send(Some(snapshot_frame(rows)));
                        }
                        Err(e) => warn!(error = %e, "snapshot refresh failed"),
                    }
                } else {
                    // Pass-through control message (§4.6 step 4 "otherwise").
                    let _ = mailbox.send(Some(message));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinic_schemas::LiveFeedFrame;

    #[test]
    fn snapshot_frame_round_trips_through_the_type_tag() {
        let json = snapshot_frame(vec![]);
        let parsed: LiveFeedFrame = serde_json::from_str(&json).unwrap();
        match parsed {
            LiveFeedFrame::QueueList { data } => assert!(data.is_empty()),
        }
    }
}

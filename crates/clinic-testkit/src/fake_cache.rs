//! In-memory `QueueCache` + `Subscription` fake, standing in for Redis
//! hash/pub-sub in scenario tests (§8 test tooling).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use clinic_pipeline::ports::{QueueCache, Subscription};
use clinic_pipeline::PipelineError;
use tokio::sync::broadcast;

#[derive(Default)]
pub struct FakeCache {
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl FakeCache {
    pub fn new() -> Self {
        Self {
            hashes: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn channel(&self, name: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

#[async_trait]
impl QueueCache for FakeCache {
    async fn hset(&self, name: &str, field: &str, value: &str) -> Result<(), PipelineError> {
        self.hashes
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hgetall(&self, name: &str) -> Result<HashMap<String, String>, PipelineError> {
        Ok(self
            .hashes
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn hdel(&self, name: &str, field: &str) -> Result<(), PipelineError> {
        if let Some(fields) = self.hashes.lock().unwrap().get_mut(name) {
            fields.remove(field);
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), PipelineError> {
        // No subscribers is not an error, matching Redis PUBLISH semantics.
        let _ = self.channel(channel).send(message.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, PipelineError> {
        let rx = self.channel(channel).subscribe();
        Ok(Box::new(FakeSubscription { rx }))
    }
}

pub struct FakeSubscription {
    rx: broadcast::Receiver<String>,
}

#[async_trait]
impl Subscription for FakeSubscription {
    async fn next_message(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hset_then_hgetall_round_trips() {
        let cache = FakeCache::new();
        cache.hset("queue", "1", "{}").await.unwrap();
        let all = cache.hgetall("queue").await.unwrap();
        assert_eq!(all.get("1"), Some(&"{}".to_string()));
    }

    #[tokio::test]
    async fn hdel_on_missing_field_is_not_an_error() {
        let cache = FakeCache::new();
        cache.hdel("queue", "nonexistent").await.unwrap();
    }

    #[tokio::test]
    async fn published_message_reaches_subscriber() {
        let cache = FakeCache::new();
        let mut sub = cache.subscribe("queue_updates").await.unwrap();
        cache.publish("queue_updates", "updated").await.unwrap();
        assert_eq!(sub.next_message().await, Some("updated".to_string()));
    }
}

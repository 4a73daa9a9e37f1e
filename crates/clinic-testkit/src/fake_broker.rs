//! In-memory `BookingPublisher` fake, standing in for RabbitMQ. Publishes
//! go into a drainable queue so a scenario test can feed them into a real
//! `clinic_pipeline::ConsumerHandler` and exercise the full publish -> consume
//! path without a live broker (§8 test tooling).

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use clinic_pipeline::ports::BookingPublisher;
use clinic_pipeline::PipelineError;
use clinic_schemas::BookingEnvelope;

#[derive(Default)]
pub struct FakeBroker {
    published: Mutex<VecDeque<Vec<u8>>>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self {
            published: Mutex::new(VecDeque::new()),
        }
    }

    /// Pop the oldest published payload, in publish order.
    pub fn drain_one(&self) -> Option<Vec<u8>> {
        self.published.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BookingPublisher for FakeBroker {
    async fn publish_intent(&self, env: &BookingEnvelope) -> Result<(), PipelineError> {
        let payload = serde_json::to_vec(env)
            .map_err(|e| PipelineError::Permanent(format!("encode envelope: {e}")))?;
        self.published.lock().unwrap().push_back(payload);
        Ok(())
    }
}

//! In-memory `WebhookVerifier` fake emulating Stripe's signed-webhook
//! scheme with HMAC-SHA256 over a shared test secret, so scenario tests can
//! exercise signature-mismatch and ignored-event-type paths (§8 scenarios 3
//! and 4) without a live Stripe account.
//!
//! Wire format is this core's own, not Stripe's: a JSON object
//! `{"event_type": "...", "metadata": {...}}`. Only `event_type ==
//! "checkout.session.completed"` yields `VerifiedEvent::Completed`.

use std::collections::HashMap;

use clinic_pipeline::ports::{VerifiedEvent, WebhookVerifier};
use clinic_pipeline::PipelineError;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const COMPLETED_EVENT_TYPE: &str = "checkout.session.completed";

#[derive(Serialize, Deserialize)]
struct FakeEvent {
    event_type: String,
    metadata: HashMap<String, String>,
}

pub struct FakePaymentVerifier {
    secret: String,
}

impl FakePaymentVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Sign a payload the way a test's caller is expected to build the
    /// `signature_header` argument it will then hand to `verify_and_parse`.
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts a key of any length");
        mac.update(payload);
        to_hex(&mac.finalize().into_bytes())
    }
}

impl WebhookVerifier for FakePaymentVerifier {
    fn verify_and_parse(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<VerifiedEvent, PipelineError> {
        let expected = self.sign(payload);
        if !constant_time_eq(expected.as_bytes(), signature_header.as_bytes()) {
            return Err(PipelineError::SignatureInvalid);
        }

        let event: FakeEvent = serde_json::from_slice(payload)
            .map_err(|e| PipelineError::MalformedMetadata(e.to_string()))?;

        if event.event_type != COMPLETED_EVENT_TYPE {
            return Ok(VerifiedEvent::Ignored);
        }

        Ok(VerifiedEvent::Completed {
            metadata: event.metadata,
        })
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

//! Payment Gateway (§4.4): checkout-session creation stamped with
//! booking-intent metadata, and webhook verification/parsing. Backed by
//! Stripe via `async-stripe`.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use clinic_schemas::{BookingIntent, PatientSnapshot, ServiceSnapshot};
use stripe::{
    CheckoutSession, CheckoutSessionMode, Client, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CreateCheckoutSessionLineItemsPriceData,
    CreateCheckoutSessionLineItemsPriceDataProductData, CreateCheckoutSessionPaymentMethodTypes,
    Currency, EventObject, EventType, Webhook,
};
use uuid::Uuid;

/// Max webhook payload size (§4.4, §8).
pub const MAX_WEBHOOK_PAYLOAD_BYTES: usize = 65_536;

/// Below this whole-VND amount, the charge floors to `MONEY_FLOOR_VND`
/// (§4.4, §8).
pub const MONEY_FLOOR_THRESHOLD_VND: i64 = 999;
pub const MONEY_FLOOR_VND: i64 = 1000;

const META_PATIENT_ID: &str = "patient_id";
const META_PATIENT_NAME: &str = "patient_name";
const META_PATIENT_EMAIL: &str = "patient_email";
const META_PATIENT_PHONE: &str = "patient_phone";
const META_SERVICE_ID: &str = "service_id";
const META_SERVICE_NAME: &str = "service_name";
const META_SERVICE_CODE: &str = "service_code";
const META_SERVICE_COST: &str = "service_cost";
const META_APPOINTMENT_DATE: &str = "appointment_date";

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("checkout session request invalid")]
    Validation(#[source] anyhow::Error),
    #[error("payment provider error")]
    Provider(#[source] anyhow::Error),
    #[error("webhook signature invalid")]
    SignatureInvalid,
    #[error("webhook payload exceeds {MAX_WEBHOOK_PAYLOAD_BYTES} bytes")]
    PayloadTooLarge,
    #[error("webhook metadata malformed: {0}")]
    MalformedMetadata(String),
}

pub struct CheckoutSessionResult {
    pub session_id: String,
    pub url: String,
}

/// Decoded webhook outcome. Only `checkout.session.completed` carries
/// metadata through to the booking pipeline; every other event type is
/// acknowledged and ignored (§4.4, §8).
pub enum WebhookOutcome {
    Completed { metadata: HashMap<String, String> },
    Ignored,
}

pub struct PaymentGateway {
    client: Client,
    webhook_secret: String,
    success_url: String,
    cancel_url: String,
}

impl PaymentGateway {
    pub const ENV_SECRET_KEY: &'static str = "CLINIC_STRIPE_SECRET_KEY";
    pub const ENV_WEBHOOK_SECRET: &'static str = "CLINIC_STRIPE_WEBHOOK_SECRET";
    pub const ENV_SUCCESS_URL: &'static str = "CLINIC_STRIPE_SUCCESS_URL";
    pub const ENV_CANCEL_URL: &'static str = "CLINIC_STRIPE_CANCEL_URL";

    pub fn from_env() -> anyhow::Result<Self> {
        let secret_key = std::env::var(Self::ENV_SECRET_KEY)
            .map_err(|_| anyhow::anyhow!("missing env var {}", Self::ENV_SECRET_KEY))?;
        let webhook_secret = std::env::var(Self::ENV_WEBHOOK_SECRET)
            .map_err(|_| anyhow::anyhow!("missing env var {}", Self::ENV_WEBHOOK_SECRET))?;
        let success_url = std::env::var(Self::ENV_SUCCESS_URL)
            .map_err(|_| anyhow::anyhow!("missing env var {}", Self::ENV_SUCCESS_URL))?;
        let cancel_url = std::env::var(Self::ENV_CANCEL_URL)
            .map_err(|_| anyhow::anyhow!("missing env var {}", Self::ENV_CANCEL_URL))?;

        Ok(Self {
            client: Client::new(secret_key),
            webhook_secret,
            success_url,
            cancel_url,
        })
    }

    /// Whole-VND amount, floored to `MONEY_FLOOR_VND` for anything below
    /// `MONEY_FLOOR_THRESHOLD_VND` (§4.4, §8). Never a float, anywhere.
    pub fn billable_amount(cost: i64) -> i64 {
        if cost < MONEY_FLOOR_THRESHOLD_VND {
            MONEY_FLOOR_VND
        } else {
            cost
        }
    }

    pub async fn create_checkout_session(
        &self,
        patient: &PatientSnapshot,
        service: &ServiceSnapshot,
        appointment_at: DateTime<Utc>,
    ) -> Result<CheckoutSessionResult, PaymentError> {
        let amount = Self::billable_amount(service.service_cost);

        let mut metadata = HashMap::new();
        metadata.insert(META_PATIENT_ID.to_string(), patient.patient_id.to_string());
        metadata.insert(META_PATIENT_NAME.to_string(), patient.patient_name.clone());
        metadata.insert(META_PATIENT_EMAIL.to_string(), patient.patient_email.clone());
        metadata.insert(META_PATIENT_PHONE.to_string(), patient.patient_phone.clone());
        metadata.insert(META_SERVICE_ID.to_string(), service.service_id.to_string());
        metadata.insert(META_SERVICE_NAME.to_string(), service.service_name.clone());
        metadata.insert(META_SERVICE_CODE.to_string(), service.service_code.clone());
        metadata.insert(META_SERVICE_COST.to_string(), amount.to_string());
        metadata.insert(
            META_APPOINTMENT_DATE.to_string(),
            format_ddmmyyyy(appointment_at),
        );

        let params = CreateCheckoutSession {
            mode: Some(CheckoutSessionMode::Payment),
            payment_method_types: Some(vec![CreateCheckoutSessionPaymentMethodTypes::Card]),
            billing_address_collection: Some(
                stripe::CreateCheckoutSessionBillingAddressCollection::Auto,
            ),
            success_url: Some(&self.success_url),
            cancel_url: Some(&self.cancel_url),
            line_items: Some(vec![CreateCheckoutSessionLineItems {
                quantity: Some(1),
                price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                    currency: Currency::VND,
                    unit_amount: Some(amount),
                    product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                        name: service.service_name.clone(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            metadata: Some(metadata),
            ..Default::default()
        };

        let session = CheckoutSession::create(&self.client, params)
            .await
            .map_err(|e| PaymentError::Provider(e.into()))?;

        let url = session
            .url
            .ok_or_else(|| PaymentError::Provider(anyhow::anyhow!("session has no url")))?;

        Ok(CheckoutSessionResult {
            session_id: session.id.to_string(),
            url,
        })
    }

    /// Verify the HMAC signature and decode the event. Only
    /// `checkout.session.completed` returns `Completed`; every other event
    /// type (including ones this core has never seen) is `Ignored` (§4.4).
    ///
    /// API-version drift is tolerated: this does not compare
    /// `event.api_version` against a pinned version — only the HMAC
    /// signature is load-bearing for authenticity.
    pub fn verify_and_parse_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookOutcome, PaymentError> {
        if payload.len() > MAX_WEBHOOK_PAYLOAD_BYTES {
            return Err(PaymentError::PayloadTooLarge);
        }

        let payload_str =
            std::str::from_utf8(payload).map_err(|_| PaymentError::SignatureInvalid)?;

        let event = Webhook::construct_event(payload_str, signature_header, &self.webhook_secret)
            .map_err(|_| PaymentError::SignatureInvalid)?;

        if event.type_ != EventType::CheckoutSessionCompleted {
            return Ok(WebhookOutcome::Ignored);
        }

        let EventObject::CheckoutSession(session) = event.data.object else {
            return Ok(WebhookOutcome::Ignored);
        };

        let metadata = session.metadata.unwrap_or_default();
        Ok(WebhookOutcome::Completed { metadata })
    }

    /// Parse the metadata captured at checkout-session creation back into a
    /// `BookingIntent`. The metadata key read here (`patient_phone`) is the
    /// same one written in `create_checkout_session`.
    pub fn extract_intent(metadata: &HashMap<String, String>) -> Result<BookingIntent, PaymentError> {
        let get = |key: &str| -> Result<String, PaymentError> {
            metadata
                .get(key)
                .cloned()
                .ok_or_else(|| PaymentError::MalformedMetadata(format!("missing field {key}")))
        };

        let patient_id = get(META_PATIENT_ID)?;
        let patient_id = Uuid::parse_str(&patient_id)
            .map_err(|_| PaymentError::MalformedMetadata("patient_id not a uuid".into()))?;

        let service_id = get(META_SERVICE_ID)?;
        let service_id = Uuid::parse_str(&service_id)
            .map_err(|_| PaymentError::MalformedMetadata("service_id not a uuid".into()))?;

        let service_cost = get(META_SERVICE_COST)?;
        let service_cost: i64 = service_cost
            .parse()
            .map_err(|_| PaymentError::MalformedMetadata("service_cost not numeric".into()))?;

        let appointment_date = get(META_APPOINTMENT_DATE)?;
        let appointment_at = parse_ddmmyyyy(&appointment_date)
            .ok_or_else(|| PaymentError::MalformedMetadata("appointment_date not DD/MM/YYYY".into()))?;

        Ok(BookingIntent {
            patient: PatientSnapshot {
                patient_id,
                patient_name: get(META_PATIENT_NAME)?,
                patient_email: get(META_PATIENT_EMAIL)?,
                patient_phone: get(META_PATIENT_PHONE)?,
            },
            service: ServiceSnapshot {
                service_id,
                service_name: get(META_SERVICE_NAME)?,
                service_code: get(META_SERVICE_CODE)?,
                service_cost,
            },
            appointment_at,
        })
    }
}

fn format_ddmmyyyy(ts: DateTime<Utc>) -> String {
    ts.format("%d/%m/%Y").to_string()
}

fn parse_ddmmyyyy(s: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%d/%m/%Y").ok()?;
    let naive = date.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_below_threshold_floors_to_minimum() {
        assert_eq!(PaymentGateway::billable_amount(0), MONEY_FLOOR_VND);
        assert_eq!(PaymentGateway::billable_amount(998), MONEY_FLOOR_VND);
    }

    #[test]
    fn cost_at_or_above_threshold_is_unchanged() {
        assert_eq!(PaymentGateway::billable_amount(999), 999);
        assert_eq!(PaymentGateway::billable_amount(500_000), 500_000);
    }

    #[test]
    fn ddmmyyyy_round_trips() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let formatted = format_ddmmyyyy(ts);
        assert_eq!(formatted, "01/06/2025");
        assert_eq!(parse_ddmmyyyy(&formatted), Some(ts));
    }

    #[test]
    fn extract_intent_reads_the_same_phone_key_it_writes() {
        let mut metadata = HashMap::new();
        metadata.insert(META_PATIENT_ID.into(), Uuid::nil().to_string());
        metadata.insert(META_PATIENT_NAME.into(), "Alice".into());
        metadata.insert(META_PATIENT_EMAIL.into(), "alice@example.com".into());
        metadata.insert(META_PATIENT_PHONE.into(), "0900000000".into());
        metadata.insert(META_SERVICE_ID.into(), Uuid::nil().to_string());
        metadata.insert(META_SERVICE_NAME.into(), "Checkup".into());
        metadata.insert(META_SERVICE_CODE.into(), "CHK".into());
        metadata.insert(META_SERVICE_COST.into(), "500000".into());
        metadata.insert(META_APPOINTMENT_DATE.into(), "01/06/2025".into());

        let intent = PaymentGateway::extract_intent(&metadata).unwrap();
        assert_eq!(intent.patient.patient_phone, "0900000000");
        assert_eq!(intent.service.service_cost, 500_000);
    }

    #[test]
    fn extract_intent_fails_closed_on_missing_field() {
        let metadata = HashMap::new();
        assert!(matches!(
            PaymentGateway::extract_intent(&metadata),
            Err(PaymentError::MalformedMetadata(_))
        ));
    }
}

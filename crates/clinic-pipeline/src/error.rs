//! Unified error taxonomy for the booking pipeline (§7). Each crate below
//! this one defines its own typed error (`StoreError`, `BrokerError`,
//! `CacheError`, `PaymentError`); this crate's `PipelineError` is the one
//! taxonomy the orchestration layer and the daemon's HTTP layer match
//! against, carrying an explicit `ErrorKind` so callers can branch on kind
//! without matching every variant.

/// Classification used by the webhook handler (HTTP status) and the
/// consumer (ack/nack) to decide how to react, independent of which
/// component produced the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    SignatureInvalid,
    MalformedMetadata,
    Transient,
    Permanent,
    NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("webhook signature invalid")]
    SignatureInvalid,

    #[error("webhook metadata malformed: {0}")]
    MalformedMetadata(String),

    #[error("transient failure")]
    Transient(#[source] anyhow::Error),

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("not found")]
    NotFound,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::SignatureInvalid => ErrorKind::SignatureInvalid,
            PipelineError::MalformedMetadata(_) => ErrorKind::MalformedMetadata,
            PipelineError::Transient(_) => ErrorKind::Transient,
            PipelineError::Permanent(_) => ErrorKind::Permanent,
            PipelineError::NotFound => ErrorKind::NotFound,
        }
    }
}

impl From<clinic_payment::PaymentError> for PipelineError {
    fn from(err: clinic_payment::PaymentError) -> Self {
        use clinic_payment::PaymentError as P;
        match err {
            P::SignatureInvalid => PipelineError::SignatureInvalid,
            P::PayloadTooLarge => PipelineError::Validation("webhook payload too large".into()),
            P::MalformedMetadata(m) => PipelineError::MalformedMetadata(m),
            P::Validation(e) => PipelineError::Validation(e.to_string()),
            P::Provider(e) => PipelineError::Transient(e),
        }
    }
}

impl From<clinic_store::StoreError> for PipelineError {
    fn from(err: clinic_store::StoreError) -> Self {
        use clinic_store::StoreError as S;
        match err {
            S::NotFound(_) => PipelineError::NotFound,
            S::InvalidTransition { from, to } => {
                PipelineError::Permanent(format!("illegal transition {from} -> {to}"))
            }
            S::Conflict => PipelineError::Transient(anyhow::anyhow!("store conflict")),
            S::Unavailable(e) => PipelineError::Transient(e),
        }
    }
}

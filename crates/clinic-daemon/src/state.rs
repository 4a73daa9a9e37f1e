//! Shared runtime state for clinic-daemon.
//!
//! All types here are `Clone`-able (via `Arc`) so Axum handlers receive
//! `State<Arc<AppState>>` cheaply. `AppState` owns exactly one instance of
//! each client the core needs (§9 "replace global singletons with explicit
//! constructor injection") and is assembled once, in `main`.

use std::sync::Arc;
use std::time::Duration;

use clinic_pipeline::ports::{BookingPublisher, QueueCache, QueueStore, WebhookVerifier};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
pub const ENV_SHUTDOWN_TIMEOUT_SECS: &str = "CLINIC_SHUTDOWN_TIMEOUT_SECS";
pub const ENV_DAEMON_ADDR: &str = "CLINIC_DAEMON_ADDR";

/// Cloneable (Arc) handle shared across all Axum handlers.
///
/// `store`, `cache`, and `publisher` are reached only through
/// `clinic-pipeline`'s ports so production wiring (Postgres/RabbitMQ/Redis)
/// and test wiring (`clinic-testkit`'s fakes) satisfy the same contract.
/// `payment` is held directly because checkout-session creation has no
/// pipeline-internal caller (§9).
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn QueueStore>,
    pub cache: Arc<dyn QueueCache>,
    pub publisher: Arc<dyn BookingPublisher>,
    pub verifier: Arc<dyn WebhookVerifier>,
    pub payment: Arc<clinic_payment::PaymentGateway>,
    /// Process-wide cancellation signal (§5): propagated to the consumer
    /// supervisor and every Live Feed session.
    pub cancel: CancellationToken,
    pub shutdown_timeout: Duration,
}

impl AppState {
    pub fn new(
        store: Arc<dyn QueueStore>,
        cache: Arc<dyn QueueCache>,
        publisher: Arc<dyn BookingPublisher>,
        verifier: Arc<dyn WebhookVerifier>,
        payment: Arc<clinic_payment::PaymentGateway>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            cache,
            publisher,
            verifier,
            payment,
            cancel,
            shutdown_timeout: shutdown_timeout_from_env(),
        }
    }
}

fn shutdown_timeout_from_env() -> Duration {
    std::env::var(ENV_SHUTDOWN_TIMEOUT_SECS)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS))
}

/// Bind address, defaulting to `127.0.0.1:8080` when `CLINIC_DAEMON_ADDR` is
/// unset or unparsable.
pub fn bind_addr_from_env() -> std::net::SocketAddr {
    std::env::var(ENV_DAEMON_ADDR)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| std::net::SocketAddr::from(([127, 0, 0, 1], 8080)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_timeout_defaults_to_thirty_seconds_when_unset() {
        std::env::remove_var(ENV_SHUTDOWN_TIMEOUT_SECS);
        assert_eq!(shutdown_timeout_from_env(), Duration::from_secs(30));
    }

    #[test]
    fn bind_addr_defaults_to_localhost_8080_when_unset() {
        std::env::remove_var(ENV_DAEMON_ADDR);
        assert_eq!(
            bind_addr_from_env(),
            std::net::SocketAddr::from(([127, 0, 0, 1], 8080))
        );
    }
}

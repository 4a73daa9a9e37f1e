//! clinic-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, connects every
//! backing store, wires middleware, spawns the consumer supervisor, and
//! starts the HTTP server. All route handlers live in `routes.rs`; all
//! shared state types live in `state.rs`.

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clinic_daemon::{routes, state};
use clinic_pipeline::adapters::{
    BrokerPublisherAdapter, CacheAdapter, PaymentVerifierAdapter, StoreAdapter,
};
use clinic_pipeline::ConsumerHandler;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // PATCH S1: Load .env.local if present (dev convenience).
    // Silent if the file does not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let pool = clinic_store::connect_from_env()
        .await
        .context("connect to Postgres")?;
    clinic_store::migrate(&pool).await.context("run migrations")?;

    let broker = Arc::new(
        clinic_broker::BrokerClient::connect_from_env()
            .await
            .context("connect to broker")?,
    );
    let cache = clinic_cache::CacheClient::connect_from_env()
        .await
        .context("connect to cache")?;
    let payment = Arc::new(
        clinic_payment::PaymentGateway::from_env().context("construct payment gateway")?,
    );

    let store: Arc<dyn clinic_pipeline::ports::QueueStore> = Arc::new(StoreAdapter(pool.clone()));
    let cache_port: Arc<dyn clinic_pipeline::ports::QueueCache> =
        Arc::new(CacheAdapter(cache.clone()));
    let publisher: Arc<dyn clinic_pipeline::ports::BookingPublisher> =
        Arc::new(BrokerPublisherAdapter(broker.clone()));
    let verifier: Arc<dyn clinic_pipeline::ports::WebhookVerifier> =
        Arc::new(PaymentVerifierAdapter(payment.clone()));

    let cancel = CancellationToken::new();

    let consumer_handler = Arc::new(ConsumerHandler::new(store.clone(), cache_port.clone()));
    let consumer_handle = broker.clone().spawn_consumer_supervisor(
        clinic_broker::QUEUE_NAME.to_string(),
        consumer_handler,
        cancel.clone(),
    );

    let shared = Arc::new(state::AppState::new(
        store,
        cache_port,
        publisher,
        verifier,
        payment,
        cancel.clone(),
    ));
    let shutdown_timeout = shared.shutdown_timeout;

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = state::bind_addr_from_env();
    info!("clinic-daemon listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .context("server crashed")?;

    // §5: graceful shutdown waits up to the configured timeout for the
    // consumer supervisor to finish in-flight work before exiting.
    if tokio::time::timeout(shutdown_timeout, consumer_handle)
        .await
        .is_err()
    {
        warn!("consumer supervisor did not exit within the shutdown timeout");
    }

    Ok(())
}

/// Resolves once `ctrl_c` (or SIGTERM on unix) fires, cancelling `cancel`
/// so every Live Feed session and the consumer supervisor unwind.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
    cancel.cancel();
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}

//! Market Stream Binary
//!
//! Runs the streaming core as a daemon: connects to the configured
//! exchanges, keeps the startup subscriptions alive across reconnects and
//! logs every event.
//!
//! # Usage
//!
//! ```bash
//! MARKET_STREAM_SUBSCRIPTIONS="binance:ticker:BTC/USDT,binance:ohlcv:ETH/USDT:1m" \
//!     cargo run --bin market-stream
//! ```
//!
//! # Environment Variables
//!
//! - `MARKET_STREAM_SUBSCRIPTIONS`: Comma-separated `exchange:channel:SYMBOL[:tf]`
//! - `MARKET_STREAM_MAX_RETRIES`: Reconnection attempts before failing (default: 5)
//! - `MARKET_STREAM_BASE_DELAY_MS`: First backoff delay (default: 500)
//! - `MARKET_STREAM_MAX_DELAY_SECS`: Backoff ceiling (default: 30)
//! - `MARKET_STREAM_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `EXCHANGE_<ID>_API_KEY` / `EXCHANGE_<ID>_API_SECRET`: Per-exchange credentials
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: market-stream)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use market_stream::infrastructure::telemetry;
use market_stream::{
    ConnectionEvent, ConnectionManager, DefaultConnectorFactory, HealthServer, HealthServerState,
    StreamConfig, TracingSink, init_metrics,
};
use tokio::signal;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting market stream");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = StreamConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let factory = Arc::new(DefaultConnectorFactory::new(&config));
    let manager = Arc::new(ConnectionManager::new(config.manager_config(), factory));

    // Log lifecycle events
    let events = manager.events();
    let events_cancel = shutdown_token.clone();
    tokio::spawn(async move {
        log_connection_events(events, events_cancel).await;
    });

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&manager),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Startup subscriptions share one logging consumer
    let consumer = manager.consumer(Arc::new(TracingSink::new()));
    for request in &config.subscriptions {
        match manager.subscribe(request, &consumer).await {
            Ok(id) => tracing::info!(subscription = %id, "Subscribed"),
            Err(e) => tracing::error!(
                exchange = %request.exchange_id,
                symbol = %request.symbol,
                error = %e,
                "Subscription failed"
            ),
        }
    }

    tracing::info!(
        exchanges = manager.exchanges().len(),
        subscriptions = manager.subscription_stats().subscription_count,
        "Market stream ready"
    );

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, manager.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out"
        );
    }

    tracing::info!("Market stream stopped");
    Ok(())
}

/// Log connection lifecycle events until shutdown.
async fn log_connection_events(
    mut events: broadcast::Receiver<ConnectionEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => return,
            event = events.recv() => event,
        };

        match event {
            Ok(ConnectionEvent::StatusChanged {
                exchange_id,
                status,
                reconnect_attempts,
            }) => {
                tracing::info!(
                    exchange = %exchange_id,
                    status = %status,
                    attempt = reconnect_attempts,
                    "Connection status"
                );
            }
            Ok(ConnectionEvent::Error(error)) => {
                tracing::warn!(
                    exchange = %error.exchange_id,
                    kind = %error.kind,
                    error = %error.message,
                    "Connection error"
                );
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Connection event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        max_retries = config.connection.max_retries,
        base_delay_ms = u64::try_from(config.connection.base_delay.as_millis()).unwrap_or(u64::MAX),
        max_delay_secs = config.connection.max_delay.as_secs(),
        health_port = config.server.health_port,
        subscriptions = config.subscriptions.len(),
        "Configuration loaded"
    );
    tracing::debug!(
        credentialed_exchanges = config.credentials.len(),
        heartbeat_interval_secs = config.websocket.heartbeat_interval.as_secs(),
        heartbeat_timeout_secs = config.websocket.heartbeat_timeout.as_secs(),
        "Connection settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}

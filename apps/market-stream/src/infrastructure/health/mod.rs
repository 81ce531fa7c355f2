//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, per-exchange connection status, and
//! Prometheus metrics. Used by container orchestrators, load balancers, and
//! monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks connections)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::manager::ConnectionManager;
use crate::domain::connection::{ConnectionState, ConnectionStatus};
use crate::domain::subscription::TotalSubscriptionStats;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Connection status per exchange, sorted by id.
    pub exchanges: Vec<ExchangeInfo>,
    /// Subscription statistics.
    pub subscriptions: SubscriptionStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Some exchanges reconnecting or failed.
    Degraded,
    /// No exchange is connected.
    Unhealthy,
}

/// Connection status of one exchange.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeInfo {
    /// Exchange id.
    pub exchange_id: String,
    /// Connection status.
    pub status: ConnectionStatus,
    /// Whether a session is live.
    pub connected: bool,
    /// Current reconnect attempt (0 if connected).
    pub reconnect_attempts: u32,
    /// Last error message, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the current or last session was established.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<DateTime<Utc>>,
}

impl From<&ConnectionState> for ExchangeInfo {
    fn from(state: &ConnectionState) -> Self {
        Self {
            exchange_id: state.exchange_id.clone(),
            status: state.status,
            connected: state.status == ConnectionStatus::Connected,
            reconnect_attempts: state.reconnect_attempts,
            last_error: state.last_error.as_ref().map(|e| e.message.clone()),
            last_connected_at: state.last_connected_at,
        }
    }
}

/// Subscription statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    /// Exchanges with desired subscriptions.
    pub exchanges: usize,
    /// Desired subscriptions.
    pub subscriptions: usize,
    /// Distinct consumers.
    pub consumers: usize,
}

impl From<TotalSubscriptionStats> for SubscriptionStatus {
    fn from(stats: TotalSubscriptionStats) -> Self {
        Self {
            exchanges: stats.exchange_count,
            subscriptions: stats.subscription_count,
            consumers: stats.consumer_count,
        }
    }
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    manager: Arc<ConnectionManager>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, manager: Arc<ConnectionManager>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            manager,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Routes served by the health server.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    // Ready if at least one exchange is connected
    let is_ready = state
        .manager
        .states()
        .iter()
        .any(|s| s.status == ConnectionStatus::Connected);

    if is_ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let exchanges: Vec<ExchangeInfo> = state
        .manager
        .states()
        .iter()
        .map(ExchangeInfo::from)
        .collect();

    HealthResponse {
        status: determine_health_status(&exchanges),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        exchanges,
        subscriptions: state.manager.subscription_stats().into(),
    }
}

/// Healthy when every managed exchange is connected (or none is managed
/// yet), degraded when some are reconnecting or failed, unhealthy when none
/// is connected.
fn determine_health_status(exchanges: &[ExchangeInfo]) -> HealthStatus {
    if exchanges.is_empty() {
        return HealthStatus::Healthy;
    }

    let connected = exchanges.iter().filter(|e| e.connected).count();
    let troubled = exchanges.iter().any(|e| {
        matches!(
            e.status,
            ConnectionStatus::Reconnecting | ConnectionStatus::Failed
        )
    });

    if connected == 0 {
        HealthStatus::Unhealthy
    } else if troubled {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

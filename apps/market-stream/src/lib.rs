#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Stream - Exchange Market Data Streaming Core
//!
//! Maintains one supervised session per crypto exchange, multiplexes
//! ticker, trade, order book and OHLCV subscriptions over it, normalizes
//! every message into a unified event and fans it out to the consumers
//! attached to each subscription. Lost sessions are retried with
//! exponential backoff and the desired subscriptions are replayed.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core streaming logic and data types
//!   - `subscription`: Channels, keys, requests and the desired-set registry
//!   - `streaming`: Unified market data events and normalization
//!   - `connection`: Per-exchange lifecycle records and events
//!   - `error`: Error taxonomy and transient/fatal classification
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Connector, factory and event sink interfaces
//!   - `services`: Connection manager, watchers, reconnection supervision
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `exchange`: WebSocket connector and the Binance protocol
//!   - `sinks`: Channel and log event sinks
//!   - `config`: Configuration from the environment
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`: Prometheus counters and gauges
//!   - `telemetry`: Tracing subscriber and OTLP export
//!
//! # Data Flow
//!
//! ```text
//! Exchange WS ──► Connector ──► RawStream ──► ChannelWatcher ──► normalize
//!                    ▲                                              │
//!                    │                                              ▼
//!   ReconnectionSupervisor (backoff, replay)          EventSink (consumer 1..N)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// In-memory connector and sinks for tests.
#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{ConnectionEvent, ConnectionState, ConnectionStatus, ErrorEvent};
pub use domain::error::{ErrorKind, StreamError, SubscriptionError};
pub use domain::streaming::{MarketDataEvent, Payload};
pub use domain::subscription::{
    Channel, ConsumerId, SubscriptionId, SubscriptionKey, SubscriptionRequest, Timeframe,
    TotalSubscriptionStats,
};

// Ports
pub use application::ports::{
    Consumer, ConnectorFactory, EventSink, ExchangeConnector, RawStream, SessionMonitor,
};

// Services
pub use application::services::{
    ConnectionHandle, ConnectionManager, ManagerConfig, ReconnectConfig, ReconnectPolicy,
};

// Exchange adapters
pub use infrastructure::exchange::{BinanceProtocol, DefaultConnectorFactory, WsConnector};

// Sinks
pub use infrastructure::sinks::{ChannelSink, SinkMessage, TracingSink};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, ConnectionSettings, Credentials, ServerSettings, StreamConfig, WebSocketSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};

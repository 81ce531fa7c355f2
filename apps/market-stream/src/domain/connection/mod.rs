//! Connection Lifecycle
//!
//! Per-exchange connection record and the events emitted when it changes.
//!
//! A [`ConnectionState`] is created on the first `connect()` for an exchange
//! and mutated in place across reconnect cycles; it is only dropped by an
//! explicit `disconnect()`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::error::{ErrorKind, StreamError};

/// Lifecycle status of an exchange connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No session and nothing in flight.
    #[default]
    Disconnected,
    /// Initial handshake in progress.
    Connecting,
    /// Session live.
    Connected,
    /// Session lost; the supervisor is retrying.
    Reconnecting,
    /// Terminal until an explicit `connect()`.
    Failed,
}

impl ConnectionStatus {
    /// Label used in logs, metrics and the health endpoint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }

    /// A session is live or being established by someone already.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
    }

    /// Numeric encoding for the status gauge.
    #[must_use]
    pub const fn gauge_value(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Reconnecting => 3.0,
            Self::Failed => 4.0,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The last error seen on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    /// Error classification.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// When it was recorded.
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    /// Record an error as of now.
    #[must_use]
    pub fn from_error(error: &StreamError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            at: Utc::now(),
        }
    }
}

/// Snapshot of an exchange connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    /// Exchange id, unique per connection.
    pub exchange_id: String,
    /// Current status.
    pub status: ConnectionStatus,
    /// Consecutive failed reconnect attempts; 0 after a successful connect.
    pub reconnect_attempts: u32,
    /// Most recent error, kept across successful reconnects.
    pub last_error: Option<ErrorRecord>,
    /// When the current or most recent session was established.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Id of the live session, if any.
    pub session_id: Option<Uuid>,
}

impl ConnectionState {
    /// A fresh, disconnected record.
    #[must_use]
    pub fn new(exchange_id: impl Into<String>) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            status: ConnectionStatus::Disconnected,
            reconnect_attempts: 0,
            last_error: None,
            last_connected_at: None,
            session_id: None,
        }
    }

    /// Enter `Connecting`.
    pub fn begin_connect(&mut self) {
        self.status = ConnectionStatus::Connecting;
        self.session_id = None;
    }

    /// Enter `Connected` with a new session; resets the attempt counter.
    pub fn connected(&mut self, session_id: Uuid) {
        self.status = ConnectionStatus::Connected;
        self.reconnect_attempts = 0;
        self.session_id = Some(session_id);
        self.last_connected_at = Some(Utc::now());
    }

    /// Enter `Reconnecting` for the given attempt number.
    pub fn reconnecting(&mut self, attempt: u32) {
        self.status = ConnectionStatus::Reconnecting;
        self.reconnect_attempts = attempt;
        self.session_id = None;
    }

    /// Record an error without changing status.
    pub fn record_error(&mut self, error: &StreamError) {
        self.last_error = Some(ErrorRecord::from_error(error));
    }

    /// Enter `Failed`, recording the cause.
    pub fn failed(&mut self, error: &StreamError) {
        self.status = ConnectionStatus::Failed;
        self.session_id = None;
        self.record_error(error);
    }

    /// Enter `Disconnected`.
    pub fn disconnected(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.session_id = None;
    }
}

/// An error surfaced to consumers and event listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEvent {
    /// Exchange the error happened on.
    pub exchange_id: String,
    /// Error classification.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// When it happened.
    pub at: DateTime<Utc>,
}

impl ErrorEvent {
    /// Build an event for `error` on `exchange_id`.
    #[must_use]
    pub fn new(exchange_id: impl Into<String>, error: &StreamError) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            kind: error.kind(),
            message: error.to_string(),
            at: Utc::now(),
        }
    }
}

/// Lifecycle notifications published by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// Status transition.
    StatusChanged {
        /// Exchange id.
        exchange_id: String,
        /// New status.
        status: ConnectionStatus,
        /// Reconnect attempt counter after the transition.
        reconnect_attempts: u32,
    },
    /// Error surfaced on a connection.
    Error(ErrorEvent),
}

impl ConnectionEvent {
    /// Exchange the event belongs to.
    #[must_use]
    pub fn exchange_id(&self) -> &str {
        match self {
            Self::StatusChanged { exchange_id, .. } => exchange_id,
            Self::Error(event) => &event.exchange_id,
        }
    }
}

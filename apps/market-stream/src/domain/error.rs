//! Error Taxonomy
//!
//! Every failure raised by connectors, watchers and the connection manager
//! is a [`StreamError`]. Each error maps to an [`ErrorKind`], which is what
//! the reconnection supervisor uses to decide between retrying and giving up.
//!
//! | Kind               | Examples                              | Handling                      |
//! |--------------------|---------------------------------------|-------------------------------|
//! | `Connection`       | socket reset, timeout, unexpected EOF | retried with backoff          |
//! | `Auth`             | rejected or revoked credentials       | fatal, status becomes Failed  |
//! | `Protocol`         | malformed payload                     | message skipped, logged       |
//! | `Subscription`     | bad symbol/timeframe, unknown venue   | rejected at `subscribe()`     |
//! | `ExhaustedRetries` | `max_retries` transient failures      | terminal, status Failed       |

use std::time::Duration;

use serde::Serialize;

use super::subscription::Channel;

/// Classification of a [`StreamError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient network-level failure.
    Connection,
    /// Credentials were rejected.
    Auth,
    /// A single message could not be understood.
    Protocol,
    /// The subscription request itself is invalid.
    Subscription,
    /// Automatic reconnection gave up.
    ExhaustedRetries,
}

impl ErrorKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Auth => "auth",
            Self::Protocol => "protocol",
            Self::Subscription => "subscription",
            Self::ExhaustedRetries => "exhausted_retries",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons a subscription request is rejected before any watcher starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// Exchange id was empty.
    #[error("exchange id must not be empty")]
    EmptyExchange,

    /// Symbol was empty.
    #[error("symbol must not be empty")]
    EmptySymbol,

    /// Symbol is not in `BASE/QUOTE` form.
    #[error("invalid symbol '{0}': expected BASE/QUOTE")]
    InvalidSymbol(String),

    /// OHLCV subscription without a timeframe.
    #[error("channel {0} requires a timeframe")]
    MissingTimeframe(Channel),

    /// Timeframe given for a channel that does not take one.
    #[error("channel {0} does not accept a timeframe")]
    UnexpectedTimeframe(Channel),

    /// Timeframe outside the supported set.
    #[error("unsupported timeframe '{0}'")]
    UnsupportedTimeframe(String),

    /// Channel name could not be parsed.
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),

    /// The exchange adapter cannot stream this symbol.
    #[error("symbol {symbol} is not supported on {exchange}")]
    UnsupportedSymbol {
        /// Exchange id.
        exchange: String,
        /// Offending symbol.
        symbol: String,
    },

    /// The exchange refused the upstream subscription.
    #[error("subscription rejected by {exchange}: {reason}")]
    Rejected {
        /// Exchange id.
        exchange: String,
        /// Exchange-supplied reason.
        reason: String,
    },

    /// Textual subscription spec could not be parsed.
    #[error("malformed subscription '{0}': expected exchange:channel:SYMBOL[:timeframe]")]
    Malformed(String),
}

/// Errors produced by the streaming core.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    /// Network-level failure (socket reset, refused, TLS, etc.).
    #[error("connection failed: {0}")]
    Connection(String),

    /// An operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The session was closed, either by the peer or locally.
    #[error("connection closed")]
    Closed,

    /// Credentials were rejected by the exchange.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// No adapter exists for the requested exchange.
    #[error("unsupported exchange: {0}")]
    UnsupportedExchange(String),

    /// A message could not be decoded or normalized.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid subscription request.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// Reconnection was abandoned after `attempts` consecutive failures.
    #[error("gave up after {attempts} reconnection attempts")]
    ExhaustedRetries {
        /// Number of attempts that were made.
        attempts: u32,
    },
}

impl StreamError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) | Self::Timeout(_) | Self::Closed => ErrorKind::Connection,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Subscription(_) | Self::UnsupportedExchange(_) => ErrorKind::Subscription,
            Self::ExhaustedRetries { .. } => ErrorKind::ExhaustedRetries,
        }
    }

    /// Whether the supervisor may retry after this error.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_failures_are_transient() {
        assert!(StreamError::Connection("reset".into()).is_transient());
        assert!(StreamError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(StreamError::Closed.is_transient());
    }

    #[test]
    fn auth_and_subscription_failures_are_fatal() {
        assert!(!StreamError::Auth("bad key".into()).is_transient());
        assert!(!StreamError::UnsupportedExchange("nowhere".into()).is_transient());
        assert!(!StreamError::from(SubscriptionError::EmptySymbol).is_transient());
        assert!(!StreamError::ExhaustedRetries { attempts: 3 }.is_transient());
    }

    #[test]
    fn kinds_map_to_labels() {
        assert_eq!(StreamError::Closed.kind().as_str(), "connection");
        assert_eq!(StreamError::Auth(String::new()).kind().as_str(), "auth");
        assert_eq!(
            StreamError::ExhaustedRetries { attempts: 1 }.kind(),
            ErrorKind::ExhaustedRetries
        );
        assert_eq!(
            StreamError::Protocol("bad".into()).kind().to_string(),
            "protocol"
        );
    }

    #[test]
    fn subscription_error_message_is_transparent() {
        let err = StreamError::from(SubscriptionError::MissingTimeframe(Channel::Ohlcv));
        assert_eq!(err.to_string(), "channel ohlcv requires a timeframe");
    }
}

//! Exchange Wire Protocol
//!
//! What a WebSocket exchange adapter has to know about one venue: where to
//! connect, how streams are named, how to (un)subscribe and how to turn
//! native frames into the unified raw shape the normalizers read.

use crate::domain::error::SubscriptionError;
use crate::domain::streaming::RawMessage;
use crate::domain::subscription::SubscriptionKey;

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Market data for one exchange stream, already in the unified shape.
    Data {
        /// Exchange stream name, e.g. `btcusdt@ticker`.
        stream: String,
        /// Unified raw message.
        message: RawMessage,
    },
    /// A control request was accepted.
    Ack {
        /// Request id.
        id: u64,
    },
    /// A control request was refused.
    Rejected {
        /// Request id, when the exchange echoes it.
        id: Option<u64>,
        /// Exchange-supplied reason.
        reason: String,
    },
    /// Nothing the session needs to act on.
    Ignored,
}

/// A frame that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("undecodable frame: {reason}")]
pub struct DecodeError {
    /// Stream the frame belonged to, when that much could be read.
    pub stream: Option<String>,
    /// What was wrong.
    pub reason: String,
}

impl DecodeError {
    /// Decode failure for a frame of a known stream.
    #[must_use]
    pub fn for_stream(stream: &str, reason: impl Into<String>) -> Self {
        Self {
            stream: Some(stream.to_string()),
            reason: reason.into(),
        }
    }

    /// Decode failure for a frame that could not be attributed to a stream.
    #[must_use]
    pub fn unrouted(reason: impl Into<String>) -> Self {
        Self {
            stream: None,
            reason: reason.into(),
        }
    }
}

/// Venue-specific half of a WebSocket connector.
pub trait ExchangeProtocol: Send + Sync + 'static {
    /// Exchange id.
    fn exchange_id(&self) -> &str;

    /// WebSocket URL to connect to.
    fn endpoint(&self) -> &str;

    /// Native stream name for a subscription key.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedSymbol` when the venue cannot stream the key.
    fn stream_name(&self, key: &SubscriptionKey) -> Result<String, SubscriptionError>;

    /// Text frame subscribing to `streams`.
    fn subscribe_frame(&self, streams: &[String], request_id: u64) -> String;

    /// Text frame unsubscribing from `streams`.
    fn unsubscribe_frame(&self, streams: &[String], request_id: u64) -> String;

    /// Decode one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] for frames that are not valid for this
    /// venue. The session stays up.
    fn decode(&self, text: &str) -> Result<Inbound, DecodeError>;
}

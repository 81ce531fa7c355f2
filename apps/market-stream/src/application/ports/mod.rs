//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`ExchangeConnector`]: owns the physical session to one exchange
//! - [`ConnectorFactory`]: builds a connector for an exchange id
//! - [`EventSink`]: receives normalized market data and error events
//!
//! ## Stream Handles
//!
//! - [`RawStream`]: per-watch message sequence handed out by a connector
//! - [`SessionMonitor`]: resolves when a connector session is lost

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::domain::connection::ErrorEvent;
use crate::domain::error::{ErrorKind, StreamError};
use crate::domain::streaming::{MarketDataEvent, RawMessage};
use crate::domain::subscription::{ConsumerId, SubscriptionKey};

// =============================================================================
// Event Sink
// =============================================================================

/// Downstream receiver of normalized events.
///
/// Calls are fire-and-forget and must not block: implementations hand the
/// event off (channel, log line, buffer) and return.
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    /// A normalized market data event.
    fn on_market_data_event(&self, event: MarketDataEvent);

    /// An error on a connection this consumer is subscribed through.
    fn on_connection_error(&self, event: ErrorEvent) {
        let _ = event;
    }
}

/// A consumer handle: an id plus the sink events are delivered to.
#[derive(Clone)]
pub struct Consumer {
    id: ConsumerId,
    sink: Arc<dyn EventSink>,
}

impl Consumer {
    /// Wrap a sink under the given id.
    #[must_use]
    pub fn new(id: ConsumerId, sink: Arc<dyn EventSink>) -> Self {
        Self { id, sink }
    }

    /// Consumer id.
    #[must_use]
    pub const fn id(&self) -> ConsumerId {
        self.id
    }

    /// The sink.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer").field("id", &self.id).finish_non_exhaustive()
    }
}

// =============================================================================
// Raw Stream
// =============================================================================

/// Item carried by a [`RawStream`].
pub type RawItem = Result<RawMessage, StreamError>;

type Release = Box<dyn FnOnce() + Send>;

/// Lazy, infinite, non-restartable sequence of raw messages for one watch.
///
/// `next()` suspends until a message arrives or the session ends; after the
/// session ends every call yields an error immediately. Dropping the stream
/// runs its release hook, which lets the connector unsubscribe upstream.
pub struct RawStream {
    rx: mpsc::Receiver<RawItem>,
    release: Option<Release>,
    terminated: bool,
}

impl RawStream {
    /// Create a stream and the sender that feeds it.
    #[must_use]
    pub fn channel(capacity: usize) -> (mpsc::Sender<RawItem>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            tx,
            Self {
                rx,
                release: None,
                terminated: false,
            },
        )
    }

    /// Attach a hook that runs exactly once when the stream is dropped.
    #[must_use]
    pub fn with_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    /// Next raw message.
    ///
    /// # Errors
    ///
    /// A `Protocol` error concerns a single message and the stream stays
    /// usable. Any other error, or the feeding side going away, terminates
    /// the stream; later calls return `Closed`.
    pub async fn next(&mut self) -> Result<RawMessage, StreamError> {
        if self.terminated {
            return Err(StreamError::Closed);
        }

        match self.rx.recv().await {
            Some(Ok(message)) => Ok(message),
            Some(Err(err)) if err.kind() == ErrorKind::Protocol => Err(err),
            Some(Err(err)) => {
                self.terminated = true;
                self.rx.close();
                Err(err)
            }
            None => {
                self.terminated = true;
                Err(StreamError::Closed)
            }
        }
    }

    /// Whether the stream has ended.
    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl Drop for RawStream {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for RawStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawStream")
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Session Monitor
// =============================================================================

/// Resolves when a connector session is lost.
#[derive(Debug)]
pub struct SessionMonitor {
    session_id: Uuid,
    lost: Option<oneshot::Receiver<StreamError>>,
}

/// Connector-side half of a [`SessionMonitor`].
#[derive(Debug)]
pub struct SessionNotifier {
    tx: oneshot::Sender<StreamError>,
}

impl SessionNotifier {
    /// Report the session as lost with `cause`.
    pub fn notify(self, cause: StreamError) {
        // Nobody listening means nobody supervises this session
        let _ = self.tx.send(cause);
    }
}

impl SessionMonitor {
    /// Create a monitor for a fresh session.
    #[must_use]
    pub fn new() -> (SessionNotifier, Self) {
        let (tx, rx) = oneshot::channel();
        (
            SessionNotifier { tx },
            Self {
                session_id: Uuid::new_v4(),
                lost: Some(rx),
            },
        )
    }

    /// Id of the monitored session.
    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Wait for the session to be lost. A notifier dropped without a cause
    /// reports `Closed`. Cancel safe.
    pub async fn lost(&mut self) -> StreamError {
        let Some(rx) = self.lost.as_mut() else {
            return StreamError::Closed;
        };
        let cause = rx.await.unwrap_or(StreamError::Closed);
        self.lost = None;
        cause
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Physical session to one exchange.
///
/// At most one session is live per connector. `open()` on a connector whose
/// previous session was lost starts a fresh one.
#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    /// Exchange this connector talks to.
    fn exchange_id(&self) -> &str;

    /// Perform the handshake and start keepalive.
    ///
    /// # Errors
    ///
    /// Transient errors (`Connection`, `Timeout`) are retried by the
    /// supervisor; `Auth` and `UnsupportedExchange` are fatal.
    async fn open(&self) -> Result<SessionMonitor, StreamError>;

    /// Start receiving raw messages for `key` on the live session.
    ///
    /// # Errors
    ///
    /// Returns `Closed` when no session is live, or a `Subscription` error
    /// when the exchange cannot stream the key.
    async fn watch(&self, key: &SubscriptionKey) -> Result<RawStream, StreamError>;

    /// Stop keepalive, close the transport and terminate every outstanding
    /// stream with `Closed`.
    async fn close(&self);
}

/// Builds connectors by exchange id.
pub trait ConnectorFactory: Send + Sync {
    /// Create a connector for `exchange_id`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedExchange` when no adapter exists.
    fn create(&self, exchange_id: &str) -> Result<Arc<dyn ExchangeConnector>, StreamError>;
}

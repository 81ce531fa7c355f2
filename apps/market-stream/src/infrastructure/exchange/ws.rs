//! WebSocket Connector
//!
//! Generic exchange session over `tokio-tungstenite`. One socket per exchange
//! carries every watch; a routing table maps native stream names to the
//! per-watch channels handed out as [`RawStream`]s.
//!
//! ```text
//! socket reader ──► protocol.decode ──► route table ──► RawStream (watch 1)
//!                                                   └─► RawStream (watch N)
//! watch()/drop  ──► commands ──► SUBSCRIBE/UNSUBSCRIBE ──► socket writer
//! ```
//!
//! The session task owns both socket halves and the keepalive clock. When it
//! ends, every outstanding stream is terminated with the cause and the
//! session monitor resolves.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::heartbeat::{HeartbeatConfig, Keepalive, KeepaliveAction};
use super::protocol::{DecodeError, ExchangeProtocol, Inbound};
use crate::application::ports::{
    ExchangeConnector, RawItem, RawStream, SessionMonitor, SessionNotifier,
};
use crate::domain::error::{StreamError, SubscriptionError};
use crate::domain::subscription::SubscriptionKey;
use crate::infrastructure::config::StreamConfig;
use crate::infrastructure::metrics;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Time allowed for the close handshake on a local close.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

// =============================================================================
// Configuration
// =============================================================================

/// Settings for a WebSocket connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsConnectorConfig {
    /// Keepalive timing.
    pub heartbeat: HeartbeatConfig,
    /// Messages buffered per watch before new ones are dropped.
    pub watch_buffer: usize,
}

impl Default for WsConnectorConfig {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            watch_buffer: 1024,
        }
    }
}

impl WsConnectorConfig {
    /// Derive connector settings from the service configuration.
    #[must_use]
    pub const fn from_stream_config(config: &StreamConfig) -> Self {
        Self {
            heartbeat: HeartbeatConfig::from_websocket_settings(&config.websocket),
            watch_buffer: config.connection.watch_buffer,
        }
    }
}

// =============================================================================
// Route Table
// =============================================================================

enum Command {
    Subscribe(String),
    Unsubscribe(String),
}

struct Route {
    id: u64,
    tx: mpsc::Sender<RawItem>,
}

#[derive(Default)]
struct Routes {
    by_stream: HashMap<String, Vec<Route>>,
    closed: bool,
}

/// Stream name to watch channels for one session.
struct RouteTable {
    exchange_id: String,
    routes: Mutex<Routes>,
    commands: mpsc::UnboundedSender<Command>,
    next_route: AtomicU64,
}

impl RouteTable {
    fn new(exchange_id: String, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            exchange_id,
            routes: Mutex::new(Routes::default()),
            commands,
            next_route: AtomicU64::new(1),
        }
    }

    /// Register a watch. The first watch of a stream subscribes upstream.
    fn add(&self, stream: &str, tx: mpsc::Sender<RawItem>) -> Result<u64, StreamError> {
        let id = self.next_route.fetch_add(1, Ordering::Relaxed);
        let mut routes = self.routes.lock();
        if routes.closed {
            return Err(StreamError::Closed);
        }

        let watchers = routes.by_stream.entry(stream.to_string()).or_default();
        let first = watchers.is_empty();
        watchers.push(Route { id, tx });
        if first && self.commands.send(Command::Subscribe(stream.to_string())).is_err() {
            routes.by_stream.remove(stream);
            return Err(StreamError::Closed);
        }
        Ok(id)
    }

    /// Drop a watch. The last watch of a stream unsubscribes upstream.
    fn remove(&self, stream: &str, id: u64) {
        let mut routes = self.routes.lock();
        let Some(watchers) = routes.by_stream.get_mut(stream) else {
            return;
        };
        watchers.retain(|route| route.id != id);
        if watchers.is_empty() {
            routes.by_stream.remove(stream);
            // Session may already be gone
            let _ = self.commands.send(Command::Unsubscribe(stream.to_string()));
        }
    }

    /// Hand an item to every watch of `stream`. A full watch loses the item.
    fn dispatch(&self, stream: &str, item: &RawItem) {
        let mut dropped = 0;
        {
            let routes = self.routes.lock();
            let Some(watchers) = routes.by_stream.get(stream) else {
                return;
            };
            for route in watchers {
                if let Err(mpsc::error::TrySendError::Full(_)) = route.tx.try_send(item.clone()) {
                    dropped += 1;
                }
            }
        }
        if dropped > 0 {
            warn!(exchange = %self.exchange_id, stream, dropped, "Watch buffer full, message dropped");
            metrics::record_events_dropped("watch_buffer", dropped);
        }
    }

    /// End every watch of `stream` with `error`.
    fn reject(&self, stream: &str, error: &StreamError) {
        let rejected = self.routes.lock().by_stream.remove(stream);
        for route in rejected.into_iter().flatten() {
            let _ = route.tx.try_send(Err(error.clone()));
        }
    }

    /// End every watch with `cause` and refuse new ones.
    fn terminate(&self, cause: &StreamError) {
        let routes = {
            let mut routes = self.routes.lock();
            routes.closed = true;
            std::mem::take(&mut routes.by_stream)
        };
        for route in routes.into_values().flatten() {
            let _ = route.tx.try_send(Err(cause.clone()));
        }
    }

    fn stream_count(&self) -> usize {
        self.routes.lock().by_stream.len()
    }
}

// =============================================================================
// Session Task
// =============================================================================

struct SessionDriver<P> {
    protocol: Arc<P>,
    routes: Arc<RouteTable>,
    keepalive: Keepalive,
    cancel: CancellationToken,
    session_id: Uuid,
    next_request: u64,
    pending: HashMap<u64, String>,
}

impl<P: ExchangeProtocol> SessionDriver<P> {
    #[tracing::instrument(
        name = "ws_session",
        skip_all,
        fields(exchange = %self.protocol.exchange_id(), session = %self.session_id)
    )]
    async fn run(
        mut self,
        socket: Socket,
        mut commands: mpsc::UnboundedReceiver<Command>,
        notifier: SessionNotifier,
    ) {
        let (mut write, mut read) = socket.split();

        let cause = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    let _ = tokio::time::timeout(CLOSE_GRACE, write.send(Message::Close(None))).await;
                    self.routes.terminate(&StreamError::Closed);
                    debug!("Session closed locally");
                    // Dropping the notifier resolves the monitor with Closed
                    return;
                }
                Some(command) = commands.recv() => {
                    let frame = self.encode(command);
                    if let Err(err) = write.send(Message::Text(frame.into())).await {
                        break transport_error(&err);
                    }
                }
                action = self.keepalive.tick() => match action {
                    KeepaliveAction::Ping => {
                        if let Err(err) = write.send(Message::Ping(Vec::new().into())).await {
                            break transport_error(&err);
                        }
                    }
                    KeepaliveAction::Expired(silence) => break StreamError::Timeout(silence),
                },
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.keepalive.record_activity();
                        self.handle_text(text.as_str());
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        self.keepalive.record_activity();
                        if let Err(err) = write.send(Message::Pong(payload)).await {
                            break transport_error(&err);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(frame = ?frame, "Server sent close frame");
                        break StreamError::Closed;
                    }
                    Some(Ok(_)) => self.keepalive.record_activity(),
                    Some(Err(err)) => break transport_error(&err),
                    None => break StreamError::Closed,
                },
            }
        };

        warn!(error = %cause, "Session lost");
        self.routes.terminate(&cause);
        notifier.notify(cause);
    }

    fn encode(&mut self, command: Command) -> String {
        let id = self.next_request;
        self.next_request += 1;

        match command {
            Command::Subscribe(stream) => {
                debug!(stream = %stream, request = id, "Subscribing");
                let frame = self.protocol.subscribe_frame(std::slice::from_ref(&stream), id);
                self.pending.insert(id, stream);
                frame
            }
            Command::Unsubscribe(stream) => {
                debug!(stream = %stream, request = id, "Unsubscribing");
                self.protocol.unsubscribe_frame(std::slice::from_ref(&stream), id)
            }
        }
    }

    fn handle_text(&mut self, text: &str) {
        match self.protocol.decode(text) {
            Ok(Inbound::Data { stream, message }) => self.routes.dispatch(&stream, &Ok(message)),
            Ok(Inbound::Ack { id }) => {
                self.pending.remove(&id);
            }
            Ok(Inbound::Rejected { id, reason }) => {
                let stream = id.and_then(|id| self.pending.remove(&id));
                warn!(stream = ?stream, reason = %reason, "Request rejected by exchange");
                if let Some(stream) = stream {
                    let error = SubscriptionError::Rejected {
                        exchange: self.protocol.exchange_id().to_string(),
                        reason,
                    };
                    self.routes.reject(&stream, &error.into());
                }
            }
            Ok(Inbound::Ignored) => {}
            Err(DecodeError {
                stream: Some(stream),
                reason,
            }) => self.routes.dispatch(&stream, &Err(StreamError::Protocol(reason))),
            Err(err) => warn!(error = %err, "Dropping undecodable frame"),
        }
    }
}

/// Errors while the session is up are transient.
fn transport_error(err: &tungstenite::Error) -> StreamError {
    StreamError::Connection(err.to_string())
}

/// Handshake failures: refused credentials are fatal, the rest transient.
fn handshake_error(err: tungstenite::Error) -> StreamError {
    match err {
        tungstenite::Error::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            StreamError::Auth(format!("handshake rejected with HTTP {}", response.status()))
        }
        other => StreamError::Connection(other.to_string()),
    }
}

// =============================================================================
// Connector
// =============================================================================

struct LiveSession {
    routes: Arc<RouteTable>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// [`ExchangeConnector`] over a single multiplexed WebSocket.
pub struct WsConnector<P> {
    protocol: Arc<P>,
    config: WsConnectorConfig,
    session: Mutex<Option<LiveSession>>,
}

impl<P: ExchangeProtocol> WsConnector<P> {
    /// Create a connector. No socket is opened until `open()`.
    #[must_use]
    pub fn new(protocol: P, config: WsConnectorConfig) -> Self {
        Self {
            protocol: Arc::new(protocol),
            config,
            session: Mutex::new(None),
        }
    }

    /// Upstream streams currently subscribed on the live session.
    #[must_use]
    pub fn subscribed_streams(&self) -> usize {
        self.session
            .lock()
            .as_ref()
            .map_or(0, |session| session.routes.stream_count())
    }

    fn live_routes(&self) -> Option<Arc<RouteTable>> {
        self.session
            .lock()
            .as_ref()
            .filter(|session| !session.task.is_finished())
            .map(|session| Arc::clone(&session.routes))
    }
}

#[async_trait]
impl<P: ExchangeProtocol> ExchangeConnector for WsConnector<P> {
    fn exchange_id(&self) -> &str {
        self.protocol.exchange_id()
    }

    async fn open(&self) -> Result<SessionMonitor, StreamError> {
        // At most one session per connector
        self.close().await;

        let exchange = self.protocol.exchange_id().to_string();
        let url = self.protocol.endpoint();
        info!(exchange = %exchange, url = %url, "Opening WebSocket session");

        let (socket, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(handshake_error)?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let routes = Arc::new(RouteTable::new(exchange, commands_tx));
        let (notifier, monitor) = SessionMonitor::new();
        let cancel = CancellationToken::new();

        let driver = SessionDriver {
            protocol: Arc::clone(&self.protocol),
            routes: Arc::clone(&routes),
            keepalive: Keepalive::new(self.config.heartbeat.clone()),
            cancel: cancel.clone(),
            session_id: monitor.session_id(),
            next_request: 1,
            pending: HashMap::new(),
        };
        let task = tokio::spawn(driver.run(socket, commands_rx, notifier));

        *self.session.lock() = Some(LiveSession {
            routes,
            cancel,
            task,
        });
        Ok(monitor)
    }

    async fn watch(&self, key: &SubscriptionKey) -> Result<RawStream, StreamError> {
        let stream_name = self.protocol.stream_name(key)?;
        let routes = self.live_routes().ok_or(StreamError::Closed)?;

        let (tx, stream) = RawStream::channel(self.config.watch_buffer);
        let route = routes.add(&stream_name, tx)?;

        let table = Arc::downgrade(&routes);
        Ok(stream.with_release(move || {
            if let Some(table) = table.upgrade() {
                table.remove(&stream_name, route);
            }
        }))
    }

    async fn close(&self) {
        let session = self.session.lock().take();
        let Some(session) = session else {
            return;
        };
        session.cancel.cancel();
        if let Err(err) = session.task.await
            && err.is_panic()
        {
            warn!(exchange = %self.protocol.exchange_id(), "Session task panicked");
        }
        // A task that ended on its own already did this
        session.routes.terminate(&StreamError::Closed);
    }
}

//! Test Kit
//!
//! In-memory connector, factory and sink for exercising the streaming core
//! without a network. Compiled for unit tests and behind the `testkit`
//! feature for integration tests and downstream crates.
//!
//! ```rust
//! # async fn example() {
//! use std::sync::Arc;
//! use market_stream::testkit::{RecordingSink, ScriptedFactory};
//! use market_stream::{ConnectionManager, ManagerConfig, SubscriptionRequest};
//!
//! let factory = Arc::new(ScriptedFactory::new());
//! let manager = ConnectionManager::new(ManagerConfig::default(), factory.clone());
//! let sink = Arc::new(RecordingSink::new());
//! let consumer = manager.consumer(sink.clone());
//!
//! let request = SubscriptionRequest::ticker("binance", "BTC/USDT");
//! manager.subscribe(&request, &consumer).await.unwrap();
//! # }
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::application::ports::{
    ConnectorFactory, EventSink, ExchangeConnector, RawItem, RawStream, SessionMonitor,
    SessionNotifier,
};
use crate::domain::connection::ErrorEvent;
use crate::domain::error::{StreamError, SubscriptionError};
use crate::domain::streaming::MarketDataEvent;
use crate::domain::subscription::SubscriptionKey;

const DEFAULT_BUFFER: usize = 64;

// =============================================================================
// Scripted Connector
// =============================================================================

#[derive(Default)]
struct ScriptState {
    open_failures: VecDeque<StreamError>,
    open_delay: Option<Duration>,
    rejected: HashSet<String>,
    session: Option<SessionNotifier>,
    routes: HashMap<SubscriptionKey, Vec<(u64, mpsc::Sender<RawItem>)>>,
    next_route: u64,
    watches_opened: usize,
}

/// Connector whose sessions and messages are driven by the test.
pub struct ScriptedConnector {
    exchange_id: String,
    state: Arc<Mutex<ScriptState>>,
    opens: AtomicUsize,
}

impl ScriptedConnector {
    /// A connector that opens successfully until told otherwise.
    #[must_use]
    pub fn new(exchange_id: impl Into<String>) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            state: Arc::new(Mutex::new(ScriptState::default())),
            opens: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` calls to `open()` with `error`.
    pub fn fail_next_opens(&self, count: usize, error: StreamError) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.open_failures.push_back(error.clone());
        }
    }

    /// Delay every `open()` by `delay`.
    pub fn set_open_delay(&self, delay: Duration) {
        self.state.lock().open_delay = Some(delay);
    }

    /// Refuse watches for `symbol` with `UnsupportedSymbol`.
    pub fn reject_symbol(&self, symbol: &str) {
        self.state.lock().rejected.insert(symbol.to_string());
    }

    /// Number of `open()` calls so far.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of successful `watch()` calls so far.
    #[must_use]
    pub fn watches_opened(&self) -> usize {
        self.state.lock().watches_opened
    }

    /// Whether a session is live.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.lock().session.is_some()
    }

    /// Outstanding raw streams for `key`.
    #[must_use]
    pub fn watch_count(&self, key: &SubscriptionKey) -> usize {
        self.state.lock().routes.get(key).map_or(0, Vec::len)
    }

    /// Outstanding raw streams across all keys.
    #[must_use]
    pub fn total_watches(&self) -> usize {
        self.state.lock().routes.values().map(Vec::len).sum()
    }

    /// Simulate the session dying with `cause`. Every stream ends.
    pub fn drop_session(&self, cause: StreamError) {
        let notifier = {
            let mut state = self.state.lock();
            state.routes.clear();
            state.session.take()
        };
        if let Some(notifier) = notifier {
            notifier.notify(cause);
        }
    }

    /// Deliver a raw message to every stream watching `key`. Returns how
    /// many streams accepted it.
    pub fn push(&self, key: &SubscriptionKey, message: Value) -> usize {
        self.send(key, &Ok(message))
    }

    /// Deliver an error to every stream watching `key`.
    pub fn push_error(&self, key: &SubscriptionKey, error: StreamError) -> usize {
        self.send(key, &Err(error))
    }

    fn send(&self, key: &SubscriptionKey, item: &RawItem) -> usize {
        let state = self.state.lock();
        state.routes.get(key).map_or(0, |routes| {
            routes
                .iter()
                .filter(|(_, tx)| tx.try_send(item.clone()).is_ok())
                .count()
        })
    }
}

#[async_trait]
impl ExchangeConnector for ScriptedConnector {
    fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    async fn open(&self) -> Result<SessionMonitor, StreamError> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let delay = self.state.lock().open_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(error) = state.open_failures.pop_front() {
            return Err(error);
        }

        // A new session replaces whatever was left of the old one
        state.routes.clear();
        let (notifier, monitor) = SessionMonitor::new();
        state.session = Some(notifier);
        Ok(monitor)
    }

    async fn watch(&self, key: &SubscriptionKey) -> Result<RawStream, StreamError> {
        let mut state = self.state.lock();
        if state.session.is_none() {
            return Err(StreamError::Closed);
        }
        if state.rejected.contains(key.symbol()) {
            return Err(SubscriptionError::UnsupportedSymbol {
                exchange: self.exchange_id.clone(),
                symbol: key.symbol().to_string(),
            }
            .into());
        }

        let route = state.next_route;
        state.next_route += 1;
        state.watches_opened += 1;

        let (tx, stream) = RawStream::channel(DEFAULT_BUFFER);
        state.routes.entry(key.clone()).or_default().push((route, tx));

        let shared = Arc::downgrade(&self.state);
        let key = key.clone();
        Ok(stream.with_release(move || {
            if let Some(shared) = shared.upgrade() {
                let mut state = shared.lock();
                if let Some(routes) = state.routes.get_mut(&key) {
                    routes.retain(|(id, _)| *id != route);
                    if routes.is_empty() {
                        state.routes.remove(&key);
                    }
                }
            }
        }))
    }

    async fn close(&self) {
        let mut state = self.state.lock();
        state.routes.clear();
        state.session = None;
    }
}

// =============================================================================
// Scripted Factory
// =============================================================================

/// Factory handing out [`ScriptedConnector`]s, one per exchange id.
#[derive(Default)]
pub struct ScriptedFactory {
    connectors: Mutex<HashMap<String, Arc<ScriptedConnector>>>,
    allowed: Option<HashSet<String>>,
}

impl ScriptedFactory {
    /// A factory that supports every exchange id.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory that only supports the listed exchange ids.
    #[must_use]
    pub fn only(exchange_ids: &[&str]) -> Self {
        Self {
            connectors: Mutex::new(HashMap::new()),
            allowed: Some(exchange_ids.iter().map(ToString::to_string).collect()),
        }
    }

    /// The connector for `exchange_id`, created on first use so tests can
    /// script it before connecting.
    pub fn connector(&self, exchange_id: &str) -> Arc<ScriptedConnector> {
        Arc::clone(
            self.connectors
                .lock()
                .entry(exchange_id.to_string())
                .or_insert_with(|| Arc::new(ScriptedConnector::new(exchange_id))),
        )
    }
}

impl ConnectorFactory for ScriptedFactory {
    fn create(&self, exchange_id: &str) -> Result<Arc<dyn ExchangeConnector>, StreamError> {
        if let Some(allowed) = &self.allowed
            && !allowed.contains(exchange_id)
        {
            return Err(StreamError::UnsupportedExchange(exchange_id.to_string()));
        }
        Ok(self.connector(exchange_id))
    }
}

// =============================================================================
// Recording Sink
// =============================================================================

/// Sink that keeps everything it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<MarketDataEvent>>,
    errors: Mutex<Vec<ErrorEvent>>,
}

impl RecordingSink {
    /// An empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Market data events received so far.
    #[must_use]
    pub fn events(&self) -> Vec<MarketDataEvent> {
        self.events.lock().clone()
    }

    /// Error events received so far.
    #[must_use]
    pub fn errors(&self) -> Vec<ErrorEvent> {
        self.errors.lock().clone()
    }

    /// Forget everything received.
    pub fn clear(&self) {
        self.events.lock().clear();
        self.errors.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn on_market_data_event(&self, event: MarketDataEvent) {
        self.events.lock().push(event);
    }

    fn on_connection_error(&self, event: ErrorEvent) {
        self.errors.lock().push(event);
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Poll `check` until it holds or `timeout` elapses. Works with paused time.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

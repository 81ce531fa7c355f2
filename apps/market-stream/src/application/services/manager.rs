//! Connection Manager
//!
//! Public façade of the streaming core. One instance per process, built
//! explicitly and shared by `Arc`; there is no global state.
//!
//! # Lifecycle
//!
//! ```text
//! ConnectionManager::new(config, factory)
//!   -> connect / subscribe / unsubscribe / disconnect ...
//!   -> shutdown()            (disconnects every exchange)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use market_stream::{
//!     ConnectionManager, DefaultConnectorFactory, ManagerConfig, StreamConfig,
//!     SubscriptionRequest, TracingSink,
//! };
//!
//! async fn example() -> anyhow::Result<()> {
//!     let config = StreamConfig::default();
//!     let factory = Arc::new(DefaultConnectorFactory::new(&config));
//!     let manager = ConnectionManager::new(ManagerConfig::default(), factory);
//!
//!     let consumer = manager.consumer(Arc::new(TracingSink::new()));
//!     let id = manager
//!         .subscribe(&SubscriptionRequest::ticker("binance", "BTC/USDT"), &consumer)
//!         .await?;
//!
//!     manager.unsubscribe(&id, consumer.id());
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::reconnect::ReconnectConfig;
use super::runtime::ExchangeRuntime;
use crate::application::ports::{Consumer, ConnectorFactory, EventSink};
use crate::domain::connection::{ConnectionEvent, ConnectionState, ConnectionStatus};
use crate::domain::error::StreamError;
use crate::domain::subscription::{
    ConsumerId, Removed, SubscriptionId, SubscriptionKey, SubscriptionRegistry,
    SubscriptionRequest, TotalSubscriptionStats, normalize_exchange_id,
};

/// Settings for the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    /// Backoff and retry budget for supervised reconnection.
    pub reconnect: ReconnectConfig,
    /// Time allowed for a connector handshake.
    pub open_timeout: Duration,
    /// Capacity of the connection event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            open_timeout: Duration::from_secs(10),
            event_capacity: 256,
        }
    }
}

/// Handle to a managed exchange connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    runtime: Arc<ExchangeRuntime>,
}

impl ConnectionHandle {
    /// Exchange id.
    #[must_use]
    pub fn exchange_id(&self) -> &str {
        self.runtime.exchange_id()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.runtime.snapshot()
    }

    /// Whether a session is live right now.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.runtime.status() == ConnectionStatus::Connected
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("exchange_id", &self.exchange_id())
            .field("status", &self.runtime.status())
            .finish()
    }
}

/// Connections, subscriptions and watchers for every exchange.
pub struct ConnectionManager {
    config: ManagerConfig,
    factory: Arc<dyn ConnectorFactory>,
    registry: Arc<SubscriptionRegistry<Consumer>>,
    exchanges: RwLock<HashMap<String, Arc<ExchangeRuntime>>>,
    events: broadcast::Sender<ConnectionEvent>,
    next_consumer_id: AtomicU64,
}

impl ConnectionManager {
    /// Create a manager. No connection is opened until `connect` or
    /// `subscribe` is called.
    #[must_use]
    pub fn new(config: ManagerConfig, factory: Arc<dyn ConnectorFactory>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            factory,
            registry: Arc::new(SubscriptionRegistry::new()),
            exchanges: RwLock::new(HashMap::new()),
            events,
            next_consumer_id: AtomicU64::new(1),
        }
    }

    /// Register a sink and get a consumer handle for it.
    pub fn consumer(&self, sink: Arc<dyn EventSink>) -> Consumer {
        let id = self.next_consumer_id.fetch_add(1, Ordering::Relaxed);
        Consumer::new(id, sink)
    }

    /// Lifecycle notifications for every exchange.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Connect to an exchange.
    ///
    /// Idempotent: if a session is live or already being established
    /// (`Connected`, `Connecting`, `Reconnecting`) the existing handle is
    /// returned with no side effects. Otherwise the connector is opened
    /// once; on failure the connection is marked `Failed` and the error is
    /// returned without retrying.
    ///
    /// # Errors
    ///
    /// Returns the connector's error, `UnsupportedExchange` when no adapter
    /// exists, or a `Subscription` error for a malformed exchange id.
    pub async fn connect(&self, exchange_id: &str) -> Result<ConnectionHandle, StreamError> {
        let exchange_id = normalize_exchange_id(exchange_id)?;
        let runtime = self.runtime_for(&exchange_id)?;
        runtime.connect().await?;
        Ok(ConnectionHandle { runtime })
    }

    /// Disconnect an exchange and forget everything about it.
    ///
    /// Cancels its watchers, stops the supervisor, closes the connector and
    /// clears its desired subscriptions. Unknown exchanges are a no-op.
    pub async fn disconnect(&self, exchange_id: &str) {
        let Ok(exchange_id) = normalize_exchange_id(exchange_id) else {
            return;
        };
        // The desired set goes with the runtime so a concurrent subscribe
        // either lands before both or after both.
        let (removed, cleared) = {
            let mut exchanges = self.exchanges.write();
            let removed = exchanges.remove(&exchange_id);
            (removed, self.registry.clear(&exchange_id))
        };
        let Some(runtime) = removed else {
            return;
        };

        runtime.shutdown().await;
        info!(exchange = %exchange_id, cleared, "Exchange disconnected");
    }

    /// Disconnect every exchange.
    pub async fn shutdown(&self) {
        let runtimes: Vec<Arc<ExchangeRuntime>> = {
            let mut exchanges = self.exchanges.write();
            exchanges
                .drain()
                .map(|(id, rt)| {
                    self.registry.clear(&id);
                    rt
                })
                .collect()
        };

        for runtime in runtimes {
            runtime.shutdown().await;
        }
        info!("Connection manager shut down");
    }

    /// Snapshot of an exchange's connection. Unknown exchanges report
    /// `Disconnected`.
    #[must_use]
    pub fn status(&self, exchange_id: &str) -> ConnectionState {
        let id = normalize_exchange_id(exchange_id).unwrap_or_else(|_| exchange_id.to_string());
        self.exchanges
            .read()
            .get(&id)
            .map_or_else(|| ConnectionState::new(id.clone()), |rt| rt.snapshot())
    }

    /// Snapshots of every managed exchange, sorted by id.
    #[must_use]
    pub fn states(&self) -> Vec<ConnectionState> {
        let mut states: Vec<ConnectionState> = self
            .exchanges
            .read()
            .values()
            .map(|rt| rt.snapshot())
            .collect();
        states.sort_by(|a, b| a.exchange_id.cmp(&b.exchange_id));
        states
    }

    /// Ids of every managed exchange, sorted.
    #[must_use]
    pub fn exchanges(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.exchanges.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn runtime_for(&self, exchange_id: &str) -> Result<Arc<ExchangeRuntime>, StreamError> {
        if let Some(runtime) = self.exchanges.read().get(exchange_id) {
            return Ok(Arc::clone(runtime));
        }

        let mut exchanges = self.exchanges.write();
        if let Some(runtime) = exchanges.get(exchange_id) {
            return Ok(Arc::clone(runtime));
        }

        let connector = self.factory.create(exchange_id)?;
        let runtime = Arc::new(ExchangeRuntime::new(
            exchange_id.to_string(),
            connector,
            Arc::clone(&self.registry),
            self.events.clone(),
            self.config.clone(),
        ));
        exchanges.insert(exchange_id.to_string(), Arc::clone(&runtime));
        debug!(exchange = %exchange_id, "Exchange registered");
        Ok(runtime)
    }

    fn is_current(&self, runtime: &Arc<ExchangeRuntime>) -> bool {
        self.exchanges
            .read()
            .get(runtime.exchange_id())
            .is_some_and(|current| Arc::ptr_eq(current, runtime))
    }

    fn runtime(&self, exchange_id: &str) -> Option<Arc<ExchangeRuntime>> {
        self.exchanges.read().get(exchange_id).cloned()
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe a consumer to a channel.
    ///
    /// The request is validated before anything else happens. The exchange
    /// is connected first if needed. Identical requests share one id and one
    /// watcher.
    ///
    /// # Errors
    ///
    /// Returns a `Subscription` error for an invalid request, the connect
    /// error if the exchange cannot be reached, or the connector's fatal
    /// error if it refuses the channel.
    pub async fn subscribe(
        &self,
        request: &SubscriptionRequest,
        consumer: &Consumer,
    ) -> Result<SubscriptionId, StreamError> {
        let (exchange_id, key) = request.resolve()?;
        let mut handle = self.connect(&exchange_id).await?;

        let added = self
            .registry
            .add(&exchange_id, key.clone(), consumer.id(), consumer.clone());
        if added.first_consumer {
            info!(exchange = %exchange_id, subscription = %added.id, "Subscription added");
        }

        // Disconnected between connect and add: the subscription belongs to
        // whichever runtime serves the exchange now.
        if !self.is_current(&handle.runtime) {
            handle = match self.connect(&exchange_id).await {
                Ok(handle) => handle,
                Err(err) => {
                    if added.new_consumer {
                        self.unsubscribe(&added.id, consumer.id());
                    }
                    return Err(err);
                }
            };
        }

        if let Err(err) = handle.runtime.ensure_watcher(&added.id, &key).await {
            if !err.is_transient() {
                warn!(
                    exchange = %exchange_id,
                    subscription = %added.id,
                    error = %err,
                    "Subscription rejected"
                );
                if added.new_consumer {
                    self.unsubscribe(&added.id, consumer.id());
                }
                return Err(err);
            }
            // Session dropped meanwhile; replay after reconnect starts it
            debug!(subscription = %added.id, error = %err, "Watcher deferred");
        }

        Ok(added.id)
    }

    /// Detach a consumer from a subscription. The watcher stops when the
    /// last consumer leaves. Unknown ids or consumers are a no-op.
    pub fn unsubscribe(&self, id: &SubscriptionId, consumer_id: ConsumerId) {
        match self.registry.remove(id, consumer_id) {
            Removed::NotSubscribed => {}
            Removed::ConsumerRemoved { remaining } => {
                debug!(subscription = %id, remaining, "Consumer detached");
            }
            Removed::SubscriptionRemoved => {
                if let Some(runtime) = self.runtime(id.exchange_id()) {
                    runtime.stop_watcher(id);
                }
                info!(subscription = %id, "Subscription removed");
            }
        }
    }

    /// Detach a consumer from everything.
    pub fn remove_consumer(&self, consumer_id: ConsumerId) {
        for id in self.registry.remove_consumer(consumer_id) {
            if let Some(runtime) = self.runtime(id.exchange_id()) {
                runtime.stop_watcher(&id);
            }
            info!(subscription = %id, "Subscription removed");
        }
    }

    /// Desired subscriptions for an exchange.
    #[must_use]
    pub fn subscriptions(&self, exchange_id: &str) -> Vec<(SubscriptionId, SubscriptionKey)> {
        normalize_exchange_id(exchange_id)
            .map(|id| self.registry.replay(&id))
            .unwrap_or_default()
    }

    /// Subscriptions with a running watcher on an exchange.
    #[must_use]
    pub fn active_watchers(&self, exchange_id: &str) -> Vec<SubscriptionId> {
        normalize_exchange_id(exchange_id)
            .ok()
            .and_then(|id| self.runtime(&id))
            .map(|rt| rt.active_watchers())
            .unwrap_or_default()
    }

    /// Consumers attached to a subscription.
    #[must_use]
    pub fn consumer_count(&self, id: &SubscriptionId) -> usize {
        self.registry.consumers(id).len()
    }

    /// Subscription statistics across every exchange.
    #[must_use]
    pub fn subscription_stats(&self) -> TotalSubscriptionStats {
        self.registry.total_stats()
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("exchanges", &self.exchanges())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::{ErrorKind, SubscriptionError};
    use crate::testkit::{RecordingSink, ScriptedFactory};

    fn manager() -> (ConnectionManager, Arc<ScriptedFactory>) {
        let factory = Arc::new(ScriptedFactory::new());
        let config = ManagerConfig {
            reconnect: ReconnectConfig {
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(100),
                max_retries: 3,
                ..ReconnectConfig::default()
            },
            ..ManagerConfig::default()
        };
        (ConnectionManager::new(config, factory.clone()), factory)
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let (manager, factory) = manager();

        let first = manager.connect("binance").await.unwrap();
        let second = manager.connect("BINANCE").await.unwrap();

        assert!(first.is_connected());
        assert_eq!(second.exchange_id(), "binance");
        assert_eq!(factory.connector("binance").open_count(), 1);
    }

    #[tokio::test]
    async fn connect_failure_marks_failed_without_retry() {
        let (manager, factory) = manager();
        factory
            .connector("kraken")
            .fail_next_opens(1, StreamError::Connection("refused".into()));

        let err = manager.connect("kraken").await.unwrap_err();

        assert!(matches!(err, StreamError::Connection(_)));
        let state = manager.status("kraken");
        assert_eq!(state.status, ConnectionStatus::Failed);
        assert_eq!(state.last_error.unwrap().kind, ErrorKind::Connection);
        assert_eq!(factory.connector("kraken").open_count(), 1);
    }

    #[tokio::test]
    async fn unsupported_exchange_is_rejected() {
        let factory = Arc::new(ScriptedFactory::only(&["binance"]));
        let manager = ConnectionManager::new(ManagerConfig::default(), factory);

        let err = manager.connect("nowhere").await.unwrap_err();
        assert!(matches!(err, StreamError::UnsupportedExchange(_)));
        assert!(manager.exchanges().is_empty());
    }

    #[tokio::test]
    async fn invalid_requests_fail_before_connecting() {
        let (manager, factory) = manager();
        let consumer = manager.consumer(Arc::new(RecordingSink::new()));

        let err = manager
            .subscribe(&SubscriptionRequest::ticker("binance", ""), &consumer)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StreamError::Subscription(SubscriptionError::EmptySymbol)
        ));
        assert_eq!(factory.connector("binance").open_count(), 0);
    }

    #[tokio::test]
    async fn unknown_exchange_status_is_disconnected() {
        let (manager, _) = manager();
        let state = manager.status("bitstamp");
        assert_eq!(state.exchange_id, "bitstamp");
        assert_eq!(state.status, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn consumer_ids_are_unique() {
        let (manager, _) = manager();
        let a = manager.consumer(Arc::new(RecordingSink::new()));
        let b = manager.consumer(Arc::new(RecordingSink::new()));
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn rejected_symbol_rolls_back_subscription() {
        let (manager, factory) = manager();
        factory.connector("binance").reject_symbol("DOGE/USDT");
        let consumer = manager.consumer(Arc::new(RecordingSink::new()));

        let err = manager
            .subscribe(&SubscriptionRequest::ticker("binance", "DOGE/USDT"), &consumer)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Subscription);
        assert!(manager.subscriptions("binance").is_empty());
        assert!(manager.active_watchers("binance").is_empty());
    }

    #[tokio::test]
    async fn shutdown_disconnects_everything() {
        let (manager, factory) = manager();
        let consumer = manager.consumer(Arc::new(RecordingSink::new()));
        manager
            .subscribe(&SubscriptionRequest::ticker("binance", "BTC/USDT"), &consumer)
            .await
            .unwrap();
        manager.connect("kraken").await.unwrap();

        manager.shutdown().await;

        assert!(manager.exchanges().is_empty());
        assert_eq!(manager.subscription_stats().subscription_count, 0);
        assert!(!factory.connector("binance").is_open());
        assert!(!factory.connector("kraken").is_open());
    }
}

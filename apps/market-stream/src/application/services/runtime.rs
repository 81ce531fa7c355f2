//! Per-Exchange Runtime
//!
//! Everything the connection manager keeps for one exchange: the connector,
//! the lifecycle record, the running watchers and the supervisor task.
//!
//! Locks here are `parking_lot` and are only held for the duration of a map
//! or record mutation, never across an `.await`. When both are needed the
//! watcher map is locked before the state record.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::manager::ManagerConfig;
use super::supervisor::ReconnectionSupervisor;
use super::watcher::{ChannelWatcher, WatcherExit};
use crate::application::ports::{Consumer, ExchangeConnector, SessionMonitor};
use crate::domain::connection::{ConnectionEvent, ConnectionState, ConnectionStatus, ErrorEvent};
use crate::domain::error::{ErrorKind, StreamError};
use crate::domain::subscription::{SubscriptionId, SubscriptionKey, SubscriptionRegistry};
use crate::infrastructure::metrics;

struct WatcherHandle {
    cancel: CancellationToken,
    task: JoinHandle<WatcherExit>,
    session_id: Uuid,
}

impl WatcherHandle {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Watchers whose task has not finished yet.
fn running_count(watchers: &HashMap<SubscriptionId, WatcherHandle>) -> usize {
    watchers.values().filter(|w| w.is_running()).count()
}

struct SupervisorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// State and tasks for one managed exchange.
pub(crate) struct ExchangeRuntime {
    exchange_id: String,
    connector: Arc<dyn ExchangeConnector>,
    registry: Arc<SubscriptionRegistry<Consumer>>,
    events: broadcast::Sender<ConnectionEvent>,
    config: ManagerConfig,
    state: RwLock<ConnectionState>,
    watchers: Mutex<HashMap<SubscriptionId, WatcherHandle>>,
    supervisor: Mutex<Option<SupervisorHandle>>,
    lifetime: CancellationToken,
}

impl ExchangeRuntime {
    pub(crate) fn new(
        exchange_id: String,
        connector: Arc<dyn ExchangeConnector>,
        registry: Arc<SubscriptionRegistry<Consumer>>,
        events: broadcast::Sender<ConnectionEvent>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            state: RwLock::new(ConnectionState::new(exchange_id.clone())),
            exchange_id,
            connector,
            registry,
            events,
            config,
            watchers: Mutex::new(HashMap::new()),
            supervisor: Mutex::new(None),
            lifetime: CancellationToken::new(),
        }
    }

    pub(crate) fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    pub(crate) fn snapshot(&self) -> ConnectionState {
        self.state.read().clone()
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        self.state.read().status
    }

    /// Session id while `Connected`.
    fn live_session(&self) -> Option<Uuid> {
        let state = self.state.read();
        (state.status == ConnectionStatus::Connected)
            .then_some(state.session_id)
            .flatten()
    }

    // =========================================================================
    // Connect / shutdown
    // =========================================================================

    /// Establish a session unless one is live or already being established.
    pub(crate) async fn connect(self: &Arc<Self>) -> Result<(), StreamError> {
        if self.lifetime.is_cancelled() {
            return Err(StreamError::Closed);
        }
        if !self.try_begin_connect() {
            return Ok(());
        }

        // Left over from a previous session that ended in Failed
        self.stop_supervisor().await;

        match self.open_session().await {
            Ok(monitor) => {
                if !self.mark_connected(monitor.session_id()) {
                    self.connector.close().await;
                    return Err(StreamError::Closed);
                }
                info!(
                    exchange = %self.exchange_id,
                    session = %monitor.session_id(),
                    "Connected"
                );
                self.start_supervisor(monitor);
                self.replay().await;
                Ok(())
            }
            Err(err) => {
                warn!(exchange = %self.exchange_id, error = %err, "Connect failed");
                self.mark_failed(&err);
                Err(err)
            }
        }
    }

    /// Handshake with the configured timeout.
    pub(crate) async fn open_session(&self) -> Result<SessionMonitor, StreamError> {
        let timeout = self.config.open_timeout;
        tokio::time::timeout(timeout, self.connector.open())
            .await
            .map_err(|_| StreamError::Timeout(timeout))?
    }

    pub(crate) async fn close_connector(&self) {
        self.connector.close().await;
    }

    /// Tear everything down. The runtime is unusable afterwards.
    pub(crate) async fn shutdown(&self) {
        self.lifetime.cancel();
        self.stop_all_watchers();
        self.stop_supervisor().await;
        self.connector.close().await;
        self.transition(ConnectionState::disconnected);
        info!(exchange = %self.exchange_id, "Disconnected");
    }

    fn start_supervisor(self: &Arc<Self>, monitor: SessionMonitor) {
        let cancel = self.lifetime.child_token();
        let supervisor =
            ReconnectionSupervisor::new(Arc::clone(self), self.config.reconnect.clone(), cancel.clone());
        let task = tokio::spawn(supervisor.run(monitor));

        if let Some(previous) = self.supervisor.lock().replace(SupervisorHandle { cancel, task }) {
            previous.cancel.cancel();
        }
    }

    async fn stop_supervisor(&self) {
        let handle = self.supervisor.lock().take();
        let Some(handle) = handle else {
            return;
        };
        handle.cancel.cancel();
        if let Err(err) = handle.task.await
            && err.is_panic()
        {
            warn!(exchange = %self.exchange_id, "Supervisor task panicked");
        }
    }

    // =========================================================================
    // Status transitions
    // =========================================================================

    fn transition(&self, apply: impl FnOnce(&mut ConnectionState)) -> ConnectionState {
        let snapshot = {
            let mut state = self.state.write();
            apply(&mut state);
            state.clone()
        };

        metrics::set_connection_status(&self.exchange_id, snapshot.status);
        debug!(
            exchange = %self.exchange_id,
            status = %snapshot.status,
            attempt = snapshot.reconnect_attempts,
            "Connection status changed"
        );
        // No receivers is fine
        let _ = self.events.send(ConnectionEvent::StatusChanged {
            exchange_id: self.exchange_id.clone(),
            status: snapshot.status,
            reconnect_attempts: snapshot.reconnect_attempts,
        });
        snapshot
    }

    fn try_begin_connect(&self) -> bool {
        {
            let mut state = self.state.write();
            if state.status.is_active() {
                return false;
            }
            state.begin_connect();
        }
        self.transition(|_| {});
        true
    }

    /// Returns `false` if the runtime was shut down meanwhile.
    pub(crate) fn mark_connected(&self, session_id: Uuid) -> bool {
        if self.lifetime.is_cancelled() {
            return false;
        }
        self.transition(|state| state.connected(session_id));
        true
    }

    pub(crate) fn mark_reconnecting(&self, attempt: u32) {
        self.transition(|state| state.reconnecting(attempt));
    }

    pub(crate) fn mark_failed(&self, error: &StreamError) {
        self.transition(|state| state.failed(error));
        self.report_error(error);
    }

    /// Record a non-terminal error without changing status.
    pub(crate) fn record_error(&self, error: &StreamError) {
        self.state.write().record_error(error);
        self.report_error(error);
    }

    fn report_error(&self, error: &StreamError) {
        metrics::record_connection_error(&self.exchange_id, error.kind());

        let event = ErrorEvent::new(&self.exchange_id, error);
        let _ = self.events.send(ConnectionEvent::Error(event.clone()));

        for consumer in self.registry.exchange_consumers(&self.exchange_id) {
            let sink = consumer.sink();
            let delivered =
                catch_unwind(AssertUnwindSafe(|| sink.on_connection_error(event.clone())));
            if delivered.is_err() {
                warn!(
                    exchange = %self.exchange_id,
                    consumer = consumer.id(),
                    "Consumer panicked while handling error event"
                );
                metrics::record_consumer_panic(&self.exchange_id);
            }
        }
    }

    // =========================================================================
    // Watchers
    // =========================================================================

    /// Start the watcher for a subscription unless one is already running on
    /// the live session. Does nothing while not `Connected`; replay after the
    /// next successful connect picks the subscription up.
    pub(crate) async fn ensure_watcher(
        self: &Arc<Self>,
        id: &SubscriptionId,
        key: &SubscriptionKey,
    ) -> Result<(), StreamError> {
        let Some(session_id) = self.live_session() else {
            return Ok(());
        };
        if self.watcher_running(id, session_id) {
            return Ok(());
        }

        let stream = self.connector.watch(key).await?;

        let mut watchers = self.watchers.lock();
        // Re-check: a concurrent start, a reconnect or an unsubscribe may have
        // happened while the watch was being set up. Dropping the stream
        // releases it.
        if watchers
            .get(id)
            .is_some_and(|w| w.session_id == session_id && w.is_running())
            || self.live_session() != Some(session_id)
            || !self.registry.contains(id)
            || self.lifetime.is_cancelled()
        {
            return Ok(());
        }

        let cancel = self.lifetime.child_token();
        let watcher = ChannelWatcher::new(
            self.exchange_id.clone(),
            key.clone(),
            stream,
            Arc::clone(&self.registry),
            cancel.clone(),
        );
        let task = tokio::spawn(watch_until_exit(
            watcher,
            Arc::downgrade(self),
            id.clone(),
            session_id,
        ));

        if let Some(stale) = watchers.insert(
            id.clone(),
            WatcherHandle {
                cancel,
                task,
                session_id,
            },
        ) {
            stale.cancel.cancel();
        }
        let running = running_count(&watchers);
        drop(watchers);

        metrics::set_active_watchers(&self.exchange_id, running);
        debug!(exchange = %self.exchange_id, subscription = %id, "Watcher started");
        Ok(())
    }

    fn watcher_running(&self, id: &SubscriptionId, session_id: Uuid) -> bool {
        self.watchers
            .lock()
            .get(id)
            .is_some_and(|w| w.session_id == session_id && w.is_running())
    }

    pub(crate) fn stop_watcher(&self, id: &SubscriptionId) {
        let (stopped, running) = {
            let mut watchers = self.watchers.lock();
            let stopped = watchers.remove(id);
            (stopped, running_count(&watchers))
        };

        if let Some(handle) = stopped {
            handle.cancel.cancel();
            metrics::set_active_watchers(&self.exchange_id, running);
            debug!(exchange = %self.exchange_id, subscription = %id, "Watcher stopped");
        }
    }

    pub(crate) fn stop_all_watchers(&self) {
        let stopped: Vec<WatcherHandle> = self.watchers.lock().drain().map(|(_, w)| w).collect();
        if stopped.is_empty() {
            return;
        }

        for handle in &stopped {
            handle.cancel.cancel();
        }
        metrics::set_active_watchers(&self.exchange_id, 0);
        debug!(
            exchange = %self.exchange_id,
            count = stopped.len(),
            "All watchers stopped"
        );
    }

    /// The exchange refused a subscription on the live session. Replaying it
    /// would be refused again, so it leaves the desired set and every
    /// consumer on the exchange hears about it.
    fn watcher_refused(&self, id: &SubscriptionId, session_id: Uuid, error: &StreamError) {
        let running = {
            let mut watchers = self.watchers.lock();
            if watchers.get(id).is_some_and(|w| w.session_id == session_id) {
                watchers.remove(id);
            }
            running_count(&watchers)
        };
        metrics::set_active_watchers(&self.exchange_id, running);

        warn!(
            exchange = %self.exchange_id,
            subscription = %id,
            error = %error,
            "Subscription refused by exchange"
        );
        self.record_error(error);
        if self.registry.discard(id) {
            info!(exchange = %self.exchange_id, subscription = %id, "Subscription removed");
        }
    }

    /// Subscriptions with a running watcher.
    pub(crate) fn active_watchers(&self) -> Vec<SubscriptionId> {
        let mut ids: Vec<SubscriptionId> = self
            .watchers
            .lock()
            .iter()
            .filter(|(_, w)| w.is_running())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Start a watcher for every desired subscription.
    pub(crate) async fn replay(self: &Arc<Self>) {
        let desired = self.registry.replay(&self.exchange_id);
        if desired.is_empty() {
            return;
        }
        info!(
            exchange = %self.exchange_id,
            count = desired.len(),
            "Replaying subscriptions"
        );

        for (id, key) in desired {
            if let Err(err) = self.ensure_watcher(&id, &key).await {
                warn!(
                    exchange = %self.exchange_id,
                    subscription = %id,
                    error = %err,
                    "Failed to restore subscription"
                );
                if err.is_transient() {
                    // Session is gone; the supervisor replays again after reconnect
                    break;
                }
                self.report_error(&err);
            }
        }
    }
}

/// Run a watcher and hand a refused subscription back to its runtime.
/// Session-level endings are left to the supervisor.
async fn watch_until_exit(
    watcher: ChannelWatcher,
    runtime: Weak<ExchangeRuntime>,
    id: SubscriptionId,
    session_id: Uuid,
) -> WatcherExit {
    let exit = watcher.run().await;
    if let WatcherExit::StreamEnded(err) = &exit
        && err.kind() == ErrorKind::Subscription
        && let Some(runtime) = runtime.upgrade()
    {
        runtime.watcher_refused(&id, session_id, err);
    }
    exit
}

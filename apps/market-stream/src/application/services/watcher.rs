//! Channel Watcher
//!
//! One task per active subscription. Drains the connector's raw stream,
//! normalizes every message and fans it out to the consumers attached to
//! the subscription at the time the message is handled.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::application::ports::{Consumer, RawStream};
use crate::domain::error::{ErrorKind, StreamError};
use crate::domain::streaming::{MarketDataEvent, RawMessage, normalize};
use crate::domain::subscription::{SubscriptionId, SubscriptionKey, SubscriptionRegistry};
use crate::infrastructure::metrics;

/// Why a watcher stopped.
#[derive(Debug)]
pub enum WatcherExit {
    /// Cancelled by unsubscribe, reconnect or disconnect.
    Cancelled,
    /// The raw stream ended; the subscription stays desired.
    StreamEnded(StreamError),
}

/// Drains one subscription's raw stream.
pub struct ChannelWatcher {
    exchange_id: String,
    id: SubscriptionId,
    key: SubscriptionKey,
    stream: RawStream,
    registry: Arc<SubscriptionRegistry<Consumer>>,
    cancel: CancellationToken,
}

impl ChannelWatcher {
    /// Create a watcher for `key` on `exchange_id`.
    #[must_use]
    pub fn new(
        exchange_id: impl Into<String>,
        key: SubscriptionKey,
        stream: RawStream,
        registry: Arc<SubscriptionRegistry<Consumer>>,
        cancel: CancellationToken,
    ) -> Self {
        let exchange_id = exchange_id.into();
        Self {
            id: SubscriptionId::new(&exchange_id, &key),
            exchange_id,
            key,
            stream,
            registry,
            cancel,
        }
    }

    /// Spawn the watcher onto the runtime.
    pub fn spawn(self) -> JoinHandle<WatcherExit> {
        tokio::spawn(self.run())
    }

    /// Run until cancelled or the stream ends.
    ///
    /// The raw stream is owned by this future, so it is released on every
    /// exit path, including a panic unwinding through the task.
    #[tracing::instrument(
        name = "channel_watcher",
        skip_all,
        fields(exchange = %self.exchange_id, subscription = %self.id)
    )]
    pub async fn run(mut self) -> WatcherExit {
        debug!("Watcher started");

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!("Watcher cancelled");
                    return WatcherExit::Cancelled;
                }
                next = self.stream.next() => next,
            };

            match next {
                Ok(raw) => self.publish(&raw),
                Err(err) if err.kind() == ErrorKind::Protocol => {
                    warn!(error = %err, "Skipping undecodable message");
                    metrics::record_malformed_message(&self.exchange_id, self.key.channel());
                }
                Err(err) => {
                    debug!(error = %err, "Raw stream ended");
                    return WatcherExit::StreamEnded(err);
                }
            }
        }
    }

    fn publish(&self, raw: &RawMessage) {
        let received_at = Utc::now();
        let event = match normalize(&self.exchange_id, &self.key, raw, received_at) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "Skipping malformed message");
                metrics::record_malformed_message(&self.exchange_id, self.key.channel());
                return;
            }
        };

        metrics::record_event_latency(&self.exchange_id, event.channel, event.latency());

        // Consumers attached right now; later joiners get the next message
        let consumers = self.registry.consumers(&self.id);
        let delivered = deliver(&self.exchange_id, &consumers, &event);
        metrics::record_event_published(&self.exchange_id, event.channel, delivered);
    }
}

/// Hand `event` to every consumer. A panicking consumer is logged and does
/// not affect the others. Returns how many consumers accepted the event.
fn deliver(exchange_id: &str, consumers: &[Consumer], event: &MarketDataEvent) -> u64 {
    let mut delivered = 0;
    for consumer in consumers {
        let sink = consumer.sink();
        let outcome = catch_unwind(AssertUnwindSafe(|| sink.on_market_data_event(event.clone())));
        if outcome.is_ok() {
            delivered += 1;
        } else {
            warn!(
                exchange = exchange_id,
                consumer = consumer.id(),
                "Consumer panicked while handling event"
            );
            metrics::record_consumer_panic(exchange_id);
        }
    }
    delivered
}

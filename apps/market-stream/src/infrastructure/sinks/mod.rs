//! Event Sink Adapters
//!
//! Concrete implementations of the `EventSink` port.
//!
//! - [`ChannelSink`]: hands events to a bounded tokio channel, never blocks
//! - [`TracingSink`]: logs every event, used by the daemon binary

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::application::ports::EventSink;
use crate::domain::connection::ErrorEvent;
use crate::domain::streaming::{MarketDataEvent, Payload};
use crate::infrastructure::metrics;

// =============================================================================
// Channel Sink
// =============================================================================

/// What a [`ChannelSink`] forwards.
#[derive(Debug, Clone)]
pub enum SinkMessage {
    /// Normalized market data.
    MarketData(MarketDataEvent),
    /// Connection error on a subscribed exchange.
    ConnectionError(ErrorEvent),
}

/// Sink backed by a bounded channel.
///
/// Delivery uses `try_send`: when the receiver falls behind the event is
/// dropped and counted rather than stalling the watcher.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<SinkMessage>,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SinkMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Events dropped because the channel was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn forward(&self, message: SinkMessage) {
        if self.tx.try_send(message).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::record_events_dropped("channel", 1);
        }
    }
}

impl EventSink for ChannelSink {
    fn on_market_data_event(&self, event: MarketDataEvent) {
        self.forward(SinkMessage::MarketData(event));
    }

    fn on_connection_error(&self, event: ErrorEvent) {
        self.forward(SinkMessage::ConnectionError(event));
    }
}

// =============================================================================
// Tracing Sink
// =============================================================================

/// Sink that writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TracingSink {
    /// Create a new tracing sink.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl EventSink for TracingSink {
    fn on_market_data_event(&self, event: MarketDataEvent) {
        let latency_ms = u64::try_from(event.latency().as_millis()).unwrap_or(u64::MAX);
        match &event.payload {
            Payload::Ticker(ticker) => debug!(
                subscription = %event.subscription_id,
                last = %ticker.last,
                bid = ?ticker.bid,
                ask = ?ticker.ask,
                latency_ms,
                "Ticker"
            ),
            Payload::Trades(trades) => debug!(
                subscription = %event.subscription_id,
                count = trades.len(),
                latency_ms,
                "Trades"
            ),
            Payload::OrderBook(book) => debug!(
                subscription = %event.subscription_id,
                best_bid = ?book.best_bid().map(|level| level.price),
                best_ask = ?book.best_ask().map(|level| level.price),
                depth = book.bids.len().max(book.asks.len()),
                latency_ms,
                "Order book"
            ),
            Payload::Candle(candle) => debug!(
                subscription = %event.subscription_id,
                open_time = %candle.open_time,
                close = %candle.close,
                volume = %candle.volume,
                latency_ms,
                "Candle"
            ),
        }
    }

    fn on_connection_error(&self, event: ErrorEvent) {
        warn!(
            exchange = %event.exchange_id,
            kind = %event.kind,
            message = %event.message,
            "Connection error"
        );
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::domain::error::StreamError;
    use crate::domain::streaming::normalize;
    use crate::domain::subscription::SubscriptionKey;

    fn event() -> MarketDataEvent {
        let key = SubscriptionKey::ticker("BTC/USDT").unwrap();
        let raw = json!({"timestamp": 1_700_000_000_000_i64, "last": "1"});
        normalize("binance", &key, &raw, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelSink::new(4);
        sink.on_market_data_event(event());
        sink.on_connection_error(ErrorEvent::new("binance", &StreamError::Closed));

        assert!(matches!(rx.recv().await, Some(SinkMessage::MarketData(_))));
        assert!(matches!(rx.recv().await, Some(SinkMessage::ConnectionError(_))));
        assert_eq!(sink.dropped(), 0);
    }

    #[test]
    fn channel_sink_drops_when_full() {
        let (sink, _rx) = ChannelSink::new(1);
        sink.on_market_data_event(event());
        sink.on_market_data_event(event());
        sink.on_market_data_event(event());
        assert_eq!(sink.dropped(), 2);
    }

    #[test]
    fn channel_sink_drops_when_closed() {
        let (sink, rx) = ChannelSink::new(4);
        drop(rx);
        sink.on_market_data_event(event());
        assert_eq!(sink.dropped(), 1);
    }

    #[test]
    fn tracing_sink_accepts_everything() {
        let sink = TracingSink::new();
        sink.on_market_data_event(event());
        sink.on_connection_error(ErrorEvent::new("binance", &StreamError::Closed));
    }
}

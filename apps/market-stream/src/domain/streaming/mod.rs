//! Market Data Streaming Types
//!
//! Core domain types for market data: tickers, trades, order books and
//! candles. These are exchange-agnostic and represent the canonical
//! event handed to every downstream consumer.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::subscription::{Channel, SubscriptionId, Timeframe};

/// Per-channel normalization of raw messages.
pub mod normalize;

pub use normalize::{NormalizeError, RawMessage, normalize};

// =============================================================================
// Payloads
// =============================================================================

/// Best bid/ask and rolling statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ticker {
    /// Best bid price.
    pub bid: Option<Decimal>,
    /// Size at the best bid.
    pub bid_volume: Option<Decimal>,
    /// Best ask price.
    pub ask: Option<Decimal>,
    /// Size at the best ask.
    pub ask_volume: Option<Decimal>,
    /// Last traded price.
    pub last: Decimal,
    /// Open of the rolling window.
    pub open: Option<Decimal>,
    /// High of the rolling window.
    pub high: Option<Decimal>,
    /// Low of the rolling window.
    pub low: Option<Decimal>,
    /// Volume in base currency.
    pub base_volume: Option<Decimal>,
    /// Volume in quote currency.
    pub quote_volume: Option<Decimal>,
    /// Absolute change over the window.
    pub change: Option<Decimal>,
    /// Percentage change over the window.
    pub percentage: Option<Decimal>,
}

/// Aggressor side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Buyer initiated.
    Buy,
    /// Seller initiated.
    Sell,
}

/// A single trade print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeTick {
    /// Exchange trade id, when provided.
    pub id: Option<String>,
    /// Execution time.
    pub timestamp: DateTime<Utc>,
    /// Aggressor side, when known.
    pub side: Option<Side>,
    /// Execution price.
    pub price: Decimal,
    /// Executed amount in base currency.
    pub amount: Decimal,
}

/// One price level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceLevel {
    /// Level price.
    pub price: Decimal,
    /// Resting amount.
    pub amount: Decimal,
}

/// Order book snapshot, best levels first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct OrderBookSnapshot {
    /// Bids, highest price first.
    pub bids: Vec<PriceLevel>,
    /// Asks, lowest price first.
    pub asks: Vec<PriceLevel>,
    /// Exchange sequence number, when provided.
    pub nonce: Option<u64>,
}

impl OrderBookSnapshot {
    /// Best bid level.
    #[must_use]
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Best ask level.
    #[must_use]
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Ask minus bid, if both sides are present.
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }
}

/// OHLCV candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Candle {
    /// Candle timeframe.
    pub timeframe: Timeframe,
    /// Open time.
    pub open_time: DateTime<Utc>,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Volume in base currency.
    pub volume: Decimal,
}

/// Channel-specific event body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// Ticker update.
    Ticker(Ticker),
    /// One or more trades.
    Trades(Vec<TradeTick>),
    /// Order book snapshot.
    OrderBook(OrderBookSnapshot),
    /// Latest candle.
    Candle(Candle),
}

impl Payload {
    /// Channel this payload belongs to.
    #[must_use]
    pub const fn channel(&self) -> Channel {
        match self {
            Self::Ticker(_) => Channel::Ticker,
            Self::Trades(_) => Channel::Trades,
            Self::OrderBook(_) => Channel::OrderBook,
            Self::Candle(_) => Channel::Ohlcv,
        }
    }
}

// =============================================================================
// Event
// =============================================================================

/// A normalized market data event.
///
/// Immutable once built. Every consumer gets its own clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketDataEvent {
    /// Subscription that produced the event.
    pub subscription_id: SubscriptionId,
    /// Exchange id.
    pub exchange_id: String,
    /// Channel kind.
    pub channel: Channel,
    /// Unified symbol.
    pub symbol: String,
    /// Event time reported by the exchange. Authoritative for ordering.
    pub timestamp: DateTime<Utc>,
    /// Local receipt time.
    pub received_at: DateTime<Utc>,
    /// Channel-specific body.
    pub payload: Payload,
}

impl MarketDataEvent {
    /// Receipt time minus event time. Negative skew clamps to zero.
    #[must_use]
    pub fn latency(&self) -> std::time::Duration {
        (self.received_at - self.timestamp)
            .to_std()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn d(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn level(price: &str, amount: &str) -> PriceLevel {
        PriceLevel {
            price: d(price),
            amount: d(amount),
        }
    }

    #[test]
    fn spread_uses_best_levels() {
        let book = OrderBookSnapshot {
            bids: vec![level("100.5", "1"), level("100.0", "2")],
            asks: vec![level("101.0", "3")],
            nonce: None,
        };
        assert_eq!(book.spread(), Some(d("0.5")));
        assert_eq!(OrderBookSnapshot::default().spread(), None);
    }

    #[test]
    fn payload_reports_channel() {
        assert_eq!(Payload::Trades(vec![]).channel(), Channel::Trades);
        assert_eq!(
            Payload::OrderBook(OrderBookSnapshot::default()).channel(),
            Channel::OrderBook
        );
    }
}

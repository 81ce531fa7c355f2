//! Raw Message Normalization
//!
//! Exchange adapters decode their native frames into a unified JSON shape;
//! this module turns that shape into a [`MarketDataEvent`]. One function per
//! channel, dispatched on [`Channel`].
//!
//! # Unified shapes
//!
//! ```text
//! ticker    {"timestamp": ms, "last": "..", "bid": "..", "ask": "..", ...}
//! trades    [{"id": "..", "timestamp": ms, "side": "buy", "price": "..", "amount": ".."}]
//! orderbook {"timestamp": ms?, "nonce": n?, "bids": [[p, a]], "asks": [[p, a]]}
//! ohlcv     [[open_time_ms, o, h, l, c, v], ...]   (last row is current)
//! ```
//!
//! Numbers may be JSON strings or JSON numbers.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use super::{
    Candle, MarketDataEvent, OrderBookSnapshot, Payload, PriceLevel, Side, Ticker, TradeTick,
};
use crate::domain::error::StreamError;
use crate::domain::subscription::{Channel, SubscriptionId, SubscriptionKey};

/// A decoded but not yet normalized exchange message.
pub type RawMessage = Value;

/// Reasons a raw message cannot be normalized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// A required field is absent.
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    /// A field has the wrong type or an unparseable value.
    #[error("invalid field '{field}': {value}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Offending value, rendered.
        value: String,
    },

    /// The message had the wrong top-level shape.
    #[error("expected {expected} for {channel} message")]
    UnexpectedShape {
        /// Channel being normalized.
        channel: Channel,
        /// Expected JSON type.
        expected: &'static str,
    },

    /// The message carried no data.
    #[error("empty {0} message")]
    Empty(Channel),
}

impl From<NormalizeError> for StreamError {
    fn from(err: NormalizeError) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Normalize a raw message for `key` on `exchange_id`.
///
/// # Errors
///
/// Returns a `NormalizeError` when the message does not match the unified
/// shape for the key's channel.
pub fn normalize(
    exchange_id: &str,
    key: &SubscriptionKey,
    raw: &RawMessage,
    received_at: DateTime<Utc>,
) -> Result<MarketDataEvent, NormalizeError> {
    let (timestamp, payload) = match key.channel() {
        Channel::Ticker => normalize_ticker(raw)?,
        Channel::Trades => normalize_trades(raw)?,
        Channel::OrderBook => normalize_order_book(raw, received_at)?,
        Channel::Ohlcv => normalize_ohlcv(key, raw)?,
    };

    Ok(MarketDataEvent {
        subscription_id: SubscriptionId::new(exchange_id, key),
        exchange_id: exchange_id.to_string(),
        channel: key.channel(),
        symbol: key.symbol().to_string(),
        timestamp,
        received_at,
        payload,
    })
}

fn normalize_ticker(raw: &Value) -> Result<(DateTime<Utc>, Payload), NormalizeError> {
    if !raw.is_object() {
        return Err(NormalizeError::UnexpectedShape {
            channel: Channel::Ticker,
            expected: "object",
        });
    }

    let timestamp = required_timestamp(raw, "timestamp")?;
    let ticker = Ticker {
        bid: optional_decimal(raw, "bid")?,
        bid_volume: optional_decimal(raw, "bidVolume")?,
        ask: optional_decimal(raw, "ask")?,
        ask_volume: optional_decimal(raw, "askVolume")?,
        last: required_decimal(raw, "last")?,
        open: optional_decimal(raw, "open")?,
        high: optional_decimal(raw, "high")?,
        low: optional_decimal(raw, "low")?,
        base_volume: optional_decimal(raw, "baseVolume")?,
        quote_volume: optional_decimal(raw, "quoteVolume")?,
        change: optional_decimal(raw, "change")?,
        percentage: optional_decimal(raw, "percentage")?,
    };

    Ok((timestamp, Payload::Ticker(ticker)))
}

fn normalize_trades(raw: &Value) -> Result<(DateTime<Utc>, Payload), NormalizeError> {
    let rows = raw.as_array().ok_or(NormalizeError::UnexpectedShape {
        channel: Channel::Trades,
        expected: "array",
    })?;

    let trades = rows
        .iter()
        .map(|row| -> Result<TradeTick, NormalizeError> {
            Ok(TradeTick {
                id: row.get("id").and_then(|id| match id {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                }),
                timestamp: required_timestamp(row, "timestamp")?,
                side: parse_side(row)?,
                price: required_decimal(row, "price")?,
                amount: required_decimal(row, "amount")?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    // Event time is the most recent print in the batch
    let timestamp = trades
        .iter()
        .map(|t| t.timestamp)
        .max()
        .ok_or(NormalizeError::Empty(Channel::Trades))?;

    Ok((timestamp, Payload::Trades(trades)))
}

fn normalize_order_book(
    raw: &Value,
    received_at: DateTime<Utc>,
) -> Result<(DateTime<Utc>, Payload), NormalizeError> {
    if !raw.is_object() {
        return Err(NormalizeError::UnexpectedShape {
            channel: Channel::OrderBook,
            expected: "object",
        });
    }

    // Some venues omit the book timestamp; receipt time stands in
    let timestamp = match raw.get("timestamp") {
        None | Some(Value::Null) => received_at,
        Some(_) => required_timestamp(raw, "timestamp")?,
    };

    let nonce = match raw.get("nonce") {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.as_u64().ok_or_else(|| invalid("nonce", value))?),
    };

    let book = OrderBookSnapshot {
        bids: parse_levels(raw, "bids")?,
        asks: parse_levels(raw, "asks")?,
        nonce,
    };

    Ok((timestamp, Payload::OrderBook(book)))
}

fn normalize_ohlcv(
    key: &SubscriptionKey,
    raw: &Value,
) -> Result<(DateTime<Utc>, Payload), NormalizeError> {
    let rows = raw.as_array().ok_or(NormalizeError::UnexpectedShape {
        channel: Channel::Ohlcv,
        expected: "array",
    })?;
    let row = rows.last().ok_or(NormalizeError::Empty(Channel::Ohlcv))?;
    let fields = row
        .as_array()
        .filter(|fields| fields.len() >= 6)
        .ok_or_else(|| invalid("ohlcv", row))?;

    let timeframe = key
        .timeframe()
        .ok_or(NormalizeError::MissingField("timeframe"))?;
    let open_time = timestamp_from(&fields[0], "open_time")?;

    let candle = Candle {
        timeframe,
        open_time,
        open: decimal_from(&fields[1], "open")?,
        high: decimal_from(&fields[2], "high")?,
        low: decimal_from(&fields[3], "low")?,
        close: decimal_from(&fields[4], "close")?,
        volume: decimal_from(&fields[5], "volume")?,
    };

    Ok((open_time, Payload::Candle(candle)))
}

// =============================================================================
// Field helpers
// =============================================================================

fn invalid(field: &'static str, value: &Value) -> NormalizeError {
    NormalizeError::InvalidField {
        field,
        value: value.to_string(),
    }
}

fn decimal_from(value: &Value, field: &'static str) -> Result<Decimal, NormalizeError> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return Err(invalid(field, value)),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| invalid(field, value))
}

fn required_decimal(raw: &Value, field: &'static str) -> Result<Decimal, NormalizeError> {
    match raw.get(field) {
        None | Some(Value::Null) => Err(NormalizeError::MissingField(field)),
        Some(value) => decimal_from(value, field),
    }
}

fn optional_decimal(raw: &Value, field: &'static str) -> Result<Option<Decimal>, NormalizeError> {
    match raw.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => decimal_from(value, field).map(Some),
    }
}

fn timestamp_from(value: &Value, field: &'static str) -> Result<DateTime<Utc>, NormalizeError> {
    let millis = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    };
    millis
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| invalid(field, value))
}

fn required_timestamp(raw: &Value, field: &'static str) -> Result<DateTime<Utc>, NormalizeError> {
    match raw.get(field) {
        None | Some(Value::Null) => Err(NormalizeError::MissingField(field)),
        Some(value) => timestamp_from(value, field),
    }
}

fn parse_side(raw: &Value) -> Result<Option<Side>, NormalizeError> {
    match raw.get("side") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("buy") => Ok(Some(Side::Buy)),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("sell") => Ok(Some(Side::Sell)),
        Some(other) => Err(invalid("side", other)),
    }
}

fn parse_levels(raw: &Value, field: &'static str) -> Result<Vec<PriceLevel>, NormalizeError> {
    let rows = match raw.get(field) {
        None | Some(Value::Null) => return Err(NormalizeError::MissingField(field)),
        Some(Value::Array(rows)) => rows,
        Some(other) => return Err(invalid(field, other)),
    };

    rows.iter()
        .map(|row| match row.as_array().map(Vec::as_slice) {
            Some([price, amount, ..]) => Ok(PriceLevel {
                price: decimal_from(price, field)?,
                amount: decimal_from(amount, field)?,
            }),
            _ => Err(invalid(field, row)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::domain::subscription::Timeframe;

    fn d(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_001_000).unwrap()
    }

    #[test]
    fn ticker_from_strings_and_numbers() {
        let key = SubscriptionKey::ticker("BTC/USDT").unwrap();
        let raw = json!({
            "symbol": "BTC/USDT",
            "timestamp": 1_700_000_000_000_i64,
            "bid": "42000.10",
            "ask": 42000.2,
            "last": "42000.15",
            "baseVolume": "1234.5",
            "percentage": "1E-2"
        });

        let event = normalize("binance", &key, &raw, now()).unwrap();

        assert_eq!(event.subscription_id.as_str(), "binance:ticker:BTC/USDT");
        assert_eq!(event.timestamp.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(event.latency(), std::time::Duration::from_secs(1));
        let Payload::Ticker(ticker) = event.payload else {
            panic!("expected ticker payload");
        };
        assert_eq!(ticker.last, d("42000.15"));
        assert_eq!(ticker.ask, Some(d("42000.2")));
        assert_eq!(ticker.percentage, Some(d("0.01")));
        assert_eq!(ticker.high, None);
    }

    #[test]
    fn ticker_requires_last_price() {
        let key = SubscriptionKey::ticker("BTC/USDT").unwrap();
        let raw = json!({"timestamp": 1_700_000_000_000_i64, "bid": "1"});

        assert_eq!(
            normalize("binance", &key, &raw, now()),
            Err(NormalizeError::MissingField("last"))
        );
    }

    #[test]
    fn trades_use_latest_print_as_event_time() {
        let key = SubscriptionKey::trades("ETH/USD").unwrap();
        let raw = json!([
            {"id": 1, "timestamp": 1_700_000_000_000_i64, "side": "buy", "price": "2000", "amount": "0.5"},
            {"id": "2", "timestamp": 1_700_000_000_500_i64, "side": "SELL", "price": "2001", "amount": "1"}
        ]);

        let event = normalize("kraken", &key, &raw, now()).unwrap();

        assert_eq!(event.timestamp.timestamp_millis(), 1_700_000_000_500);
        let Payload::Trades(trades) = event.payload else {
            panic!("expected trades payload");
        };
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].id.as_deref(), Some("1"));
        assert_eq!(trades[1].side, Some(Side::Sell));
    }

    #[test]
    fn empty_trade_batch_is_rejected() {
        let key = SubscriptionKey::trades("ETH/USD").unwrap();
        assert_eq!(
            normalize("kraken", &key, &json!([]), now()),
            Err(NormalizeError::Empty(Channel::Trades))
        );
    }

    #[test]
    fn order_book_falls_back_to_receipt_time() {
        let key = SubscriptionKey::order_book("BTC/USDT").unwrap();
        let raw = json!({
            "nonce": 42,
            "bids": [["100.5", "1"], [100.0, 2]],
            "asks": [["101", "3"]]
        });

        let event = normalize("binance", &key, &raw, now()).unwrap();

        assert_eq!(event.timestamp, now());
        let Payload::OrderBook(book) = event.payload else {
            panic!("expected order book payload");
        };
        assert_eq!(book.nonce, Some(42));
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.spread(), Some(d("0.5")));
    }

    #[test]
    fn order_book_rejects_bad_levels() {
        let key = SubscriptionKey::order_book("BTC/USDT").unwrap();
        let raw = json!({"bids": [["100"]], "asks": []});

        assert!(matches!(
            normalize("binance", &key, &raw, now()),
            Err(NormalizeError::InvalidField { field: "bids", .. })
        ));
    }

    #[test]
    fn ohlcv_takes_last_row() {
        let key = SubscriptionKey::ohlcv("BTC/USDT", Timeframe::M1).unwrap();
        let raw = json!([
            [1_699_999_940_000_i64, "1", "2", "0.5", "1.5", "10"],
            [1_700_000_000_000_i64, "1.5", "3", "1", "2.5", "20"]
        ]);

        let event = normalize("binance", &key, &raw, now()).unwrap();

        assert_eq!(event.timestamp.timestamp_millis(), 1_700_000_000_000);
        let Payload::Candle(candle) = event.payload else {
            panic!("expected candle payload");
        };
        assert_eq!(candle.timeframe, Timeframe::M1);
        assert_eq!(candle.close, d("2.5"));
        assert_eq!(candle.volume, d("20"));
    }

    #[test]
    fn wrong_shape_is_reported() {
        let key = SubscriptionKey::ohlcv("BTC/USDT", Timeframe::H1).unwrap();
        assert_eq!(
            normalize("binance", &key, &json!({"close": 1}), now()),
            Err(NormalizeError::UnexpectedShape {
                channel: Channel::Ohlcv,
                expected: "array",
            })
        );
    }

    #[test]
    fn normalize_error_is_a_protocol_error() {
        let err: StreamError = NormalizeError::MissingField("last").into();
        assert!(matches!(err, StreamError::Protocol(_)));
        assert!(!err.is_transient());
    }
}

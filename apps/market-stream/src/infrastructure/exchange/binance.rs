//! Binance Spot Protocol
//!
//! Combined-stream WebSocket API. Streams are added to and removed from a
//! single socket with `SUBSCRIBE`/`UNSUBSCRIBE` requests, and every data
//! frame arrives wrapped as `{"stream": "<name>", "data": {...}}`.
//!
//! # Stream names
//!
//! | Channel   | Stream                     |
//! |-----------|----------------------------|
//! | ticker    | `btcusdt@ticker`           |
//! | trades    | `btcusdt@trade`            |
//! | orderbook | `btcusdt@depth20@100ms`    |
//! | ohlcv     | `btcusdt@kline_1m`         |

use serde::Serialize;
use serde_json::{Map, Value, json};

use super::protocol::{DecodeError, ExchangeProtocol, Inbound};
use crate::domain::error::SubscriptionError;
use crate::domain::subscription::{Channel, SubscriptionKey};

/// Production combined-stream endpoint.
pub const BINANCE_ENDPOINT: &str = "wss://stream.binance.com:9443/stream";

const EXCHANGE_ID: &str = "binance";

/// Native 24h ticker field and the unified name it maps to.
const TICKER_FIELDS: [(&str, &str); 11] = [
    ("b", "bid"),
    ("B", "bidVolume"),
    ("a", "ask"),
    ("A", "askVolume"),
    ("o", "open"),
    ("h", "high"),
    ("l", "low"),
    ("v", "baseVolume"),
    ("q", "quoteVolume"),
    ("p", "change"),
    ("P", "percentage"),
];

/// Binance spot market data.
#[derive(Debug, Clone)]
pub struct BinanceProtocol {
    endpoint: String,
}

impl Default for BinanceProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl BinanceProtocol {
    /// Protocol pointed at the production endpoint.
    #[must_use]
    pub fn new() -> Self {
        Self::with_endpoint(BINANCE_ENDPOINT)
    }

    /// Protocol pointed at another endpoint (testnet, local server).
    #[must_use]
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Serialize)]
struct ControlFrame<'a> {
    method: &'static str,
    params: &'a [String],
    id: u64,
}

impl ControlFrame<'_> {
    fn encode(&self) -> String {
        // Only strings and integers; serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl ExchangeProtocol for BinanceProtocol {
    fn exchange_id(&self) -> &str {
        EXCHANGE_ID
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn stream_name(&self, key: &SubscriptionKey) -> Result<String, SubscriptionError> {
        // Spot only: settled (derivative) symbols are not on this socket
        if key.symbol().contains(':') {
            return Err(SubscriptionError::UnsupportedSymbol {
                exchange: EXCHANGE_ID.to_string(),
                symbol: key.symbol().to_string(),
            });
        }

        let (base, quote) = key.base_quote();
        let market = format!("{base}{quote}").to_lowercase();
        let stream = match (key.channel(), key.timeframe()) {
            (Channel::Ticker, _) => format!("{market}@ticker"),
            (Channel::Trades, _) => format!("{market}@trade"),
            (Channel::OrderBook, _) => format!("{market}@depth20@100ms"),
            (Channel::Ohlcv, Some(timeframe)) => format!("{market}@kline_{timeframe}"),
            (Channel::Ohlcv, None) => return Err(SubscriptionError::MissingTimeframe(Channel::Ohlcv)),
        };
        Ok(stream)
    }

    fn subscribe_frame(&self, streams: &[String], request_id: u64) -> String {
        ControlFrame {
            method: "SUBSCRIBE",
            params: streams,
            id: request_id,
        }
        .encode()
    }

    fn unsubscribe_frame(&self, streams: &[String], request_id: u64) -> String {
        ControlFrame {
            method: "UNSUBSCRIBE",
            params: streams,
            id: request_id,
        }
        .encode()
    }

    fn decode(&self, text: &str) -> Result<Inbound, DecodeError> {
        let frame: Value = serde_json::from_str(text)
            .map_err(|e| DecodeError::unrouted(format!("invalid JSON: {e}")))?;

        if let Some(stream) = frame.get("stream").and_then(Value::as_str) {
            let data = frame
                .get("data")
                .ok_or_else(|| DecodeError::for_stream(stream, "missing data"))?;
            let message = translate(stream, data).map_err(|reason| DecodeError::for_stream(stream, reason))?;
            return Ok(Inbound::Data {
                stream: stream.to_string(),
                message,
            });
        }

        let id = frame.get("id").and_then(Value::as_u64);
        if let Some(error) = frame.get("error") {
            let reason = error
                .get("msg")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), ToString::to_string);
            return Ok(Inbound::Rejected { id, reason });
        }

        Ok(id.map_or(Inbound::Ignored, |id| Inbound::Ack { id }))
    }
}

// =============================================================================
// Native -> unified translation
// =============================================================================

fn translate(stream: &str, data: &Value) -> Result<Value, String> {
    let (_, topic) = stream
        .split_once('@')
        .ok_or_else(|| format!("unrecognised stream name '{stream}'"))?;

    if topic == "ticker" {
        ticker(data)
    } else if topic == "trade" {
        trade(data)
    } else if topic.starts_with("depth") {
        depth(data)
    } else if topic.starts_with("kline_") {
        kline(data)
    } else {
        Err(format!("unrecognised stream name '{stream}'"))
    }
}

fn field<'a>(data: &'a Value, name: &str) -> Result<&'a Value, String> {
    data.get(name).ok_or_else(|| format!("missing field '{name}'"))
}

fn ticker(data: &Value) -> Result<Value, String> {
    let mut unified = Map::new();
    unified.insert("timestamp".into(), field(data, "E")?.clone());
    unified.insert("last".into(), field(data, "c")?.clone());
    for (native, name) in TICKER_FIELDS {
        if let Some(value) = data.get(native) {
            unified.insert(name.into(), value.clone());
        }
    }
    Ok(Value::Object(unified))
}

fn trade(data: &Value) -> Result<Value, String> {
    // `m` is "buyer is maker": the aggressor sold
    let side = match data.get("m").and_then(Value::as_bool) {
        Some(true) => json!("sell"),
        Some(false) => json!("buy"),
        None => Value::Null,
    };
    Ok(json!([{
        "id": field(data, "t")?,
        "timestamp": field(data, "T")?,
        "side": side,
        "price": field(data, "p")?,
        "amount": field(data, "q")?,
    }]))
}

fn depth(data: &Value) -> Result<Value, String> {
    let mut unified = Map::new();
    if let Some(time) = data.get("E") {
        unified.insert("timestamp".into(), time.clone());
    }
    if let Some(nonce) = data.get("lastUpdateId") {
        unified.insert("nonce".into(), nonce.clone());
    }
    unified.insert("bids".into(), field(data, "bids")?.clone());
    unified.insert("asks".into(), field(data, "asks")?.clone());
    Ok(Value::Object(unified))
}

fn kline(data: &Value) -> Result<Value, String> {
    let candle = field(data, "k")?;
    Ok(json!([[
        field(candle, "t")?,
        field(candle, "o")?,
        field(candle, "h")?,
        field(candle, "l")?,
        field(candle, "c")?,
        field(candle, "v")?,
    ]]))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use test_case::test_case;

    use super::*;
    use crate::domain::streaming::{Payload, normalize};
    use crate::domain::subscription::Timeframe;

    fn protocol() -> BinanceProtocol {
        BinanceProtocol::with_endpoint("ws://127.0.0.1:1/stream")
    }

    #[test_case(SubscriptionKey::ticker("BTC/USDT").unwrap(), "btcusdt@ticker" ; "ticker")]
    #[test_case(SubscriptionKey::trades("ETH/BTC").unwrap(), "ethbtc@trade" ; "trades")]
    #[test_case(SubscriptionKey::order_book("SOL/USDT").unwrap(), "solusdt@depth20@100ms" ; "order book")]
    #[test_case(SubscriptionKey::ohlcv("BTC/USDT", Timeframe::H4).unwrap(), "btcusdt@kline_4h" ; "ohlcv")]
    #[test_case(SubscriptionKey::ohlcv("BTC/USDT", Timeframe::Mo1).unwrap(), "btcusdt@kline_1M" ; "monthly ohlcv")]
    fn stream_names(key: SubscriptionKey, expected: &str) {
        assert_eq!(protocol().stream_name(&key).unwrap(), expected);
    }

    #[test]
    fn settled_symbols_are_unsupported() {
        let key = SubscriptionKey::ticker("BTC/USDT:USDT").unwrap();
        assert!(matches!(
            protocol().stream_name(&key),
            Err(SubscriptionError::UnsupportedSymbol { .. })
        ));
    }

    #[test]
    fn control_frames() {
        let streams = vec!["btcusdt@ticker".to_string()];
        let frame: Value = serde_json::from_str(&protocol().subscribe_frame(&streams, 7)).unwrap();
        assert_eq!(
            frame,
            json!({"method": "SUBSCRIBE", "params": ["btcusdt@ticker"], "id": 7})
        );

        let frame: Value = serde_json::from_str(&protocol().unsubscribe_frame(&streams, 8)).unwrap();
        assert_eq!(frame["method"], "UNSUBSCRIBE");
    }

    #[test]
    fn acks_and_rejections() {
        assert_eq!(
            protocol().decode(r#"{"result":null,"id":3}"#).unwrap(),
            Inbound::Ack { id: 3 }
        );
        assert_eq!(
            protocol()
                .decode(r#"{"error":{"code":2,"msg":"Invalid request"},"id":4}"#)
                .unwrap(),
            Inbound::Rejected {
                id: Some(4),
                reason: "Invalid request".into()
            }
        );
    }

    #[test]
    fn ticker_frame_normalizes() {
        let text = r#"{"stream":"btcusdt@ticker","data":{"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","p":"10.0","P":"0.02","c":"42000.5","b":"42000.4","B":"1.5","a":"42000.6","A":"2","o":"41990","h":"42100","l":"41900","v":"1000","q":"42000000"}}"#;
        let Inbound::Data { stream, message } = protocol().decode(text).unwrap() else {
            panic!("expected data");
        };
        assert_eq!(stream, "btcusdt@ticker");

        let key = SubscriptionKey::ticker("BTC/USDT").unwrap();
        let event = normalize("binance", &key, &message, Utc::now()).unwrap();
        let Payload::Ticker(ticker) = event.payload else {
            panic!("expected ticker");
        };
        assert_eq!(ticker.last.to_string(), "42000.5");
        assert_eq!(ticker.bid.unwrap().to_string(), "42000.4");
        assert_eq!(ticker.percentage.unwrap().to_string(), "0.02");
    }

    #[test]
    fn trade_frame_maps_aggressor_side() {
        let text = r#"{"stream":"btcusdt@trade","data":{"e":"trade","E":1700000000001,"s":"BTCUSDT","t":12345,"p":"42000.1","q":"0.25","T":1700000000000,"m":true}}"#;
        let Inbound::Data { message, .. } = protocol().decode(text).unwrap() else {
            panic!("expected data");
        };
        assert_eq!(message[0]["side"], "sell");
        assert_eq!(message[0]["id"], 12345);

        let key = SubscriptionKey::trades("BTC/USDT").unwrap();
        let event = normalize("binance", &key, &message, Utc::now()).unwrap();
        let Payload::Trades(trades) = event.payload else {
            panic!("expected trades");
        };
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].amount.to_string(), "0.25");
    }

    #[test]
    fn depth_frame_keeps_update_id() {
        let text = r#"{"stream":"btcusdt@depth20@100ms","data":{"lastUpdateId":160,"bids":[["0.0024","10"]],"asks":[["0.0026","100"]]}}"#;
        let Inbound::Data { message, .. } = protocol().decode(text).unwrap() else {
            panic!("expected data");
        };

        let key = SubscriptionKey::order_book("BTC/USDT").unwrap();
        let event = normalize("binance", &key, &message, Utc::now()).unwrap();
        let Payload::OrderBook(book) = event.payload else {
            panic!("expected order book");
        };
        assert_eq!(book.nonce, Some(160));
        assert_eq!(book.bids.len(), 1);
    }

    #[test]
    fn kline_frame_becomes_ohlcv_row() {
        let text = r#"{"stream":"btcusdt@kline_1m","data":{"e":"kline","E":1700000000500,"s":"BTCUSDT","k":{"t":1699999980000,"T":1700000039999,"i":"1m","o":"1","c":"2","h":"3","l":"0.5","v":"100","x":false}}}"#;
        let Inbound::Data { message, .. } = protocol().decode(text).unwrap() else {
            panic!("expected data");
        };
        assert_eq!(message, json!([[1_699_999_980_000_i64, "1", "3", "0.5", "2", "100"]]));
    }

    #[test]
    fn broken_frames_report_their_stream() {
        let err = protocol()
            .decode(r#"{"stream":"btcusdt@ticker","data":{"E":1}}"#)
            .unwrap_err();
        assert_eq!(err.stream.as_deref(), Some("btcusdt@ticker"));

        let err = protocol().decode("not json").unwrap_err();
        assert!(err.stream.is_none());
    }
}

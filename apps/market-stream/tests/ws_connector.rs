//! WebSocket Connector Integration Tests
//!
//! Drives the Binance connector against a local WebSocket server: stream
//! multiplexing, upstream subscribe/unsubscribe, rejections, keepalive
//! expiry, and handshake failures.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use market_stream::infrastructure::exchange::{HeartbeatConfig, WsConnectorConfig};
use market_stream::{
    BinanceProtocol, ExchangeConnector, StreamError, SubscriptionError, SubscriptionKey,
    WsConnector,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{self, StatusCode};

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Local exchange
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Mode {
    /// Acks subscriptions, rejects `badusdt@*`, forwards pushed frames.
    Normal,
    /// Completes the handshake and never reads again.
    Silent,
    /// Refuses the handshake with 401.
    Unauthorized,
}

struct FakeExchange {
    url: String,
    requests: mpsc::UnboundedReceiver<Value>,
    outbound: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
}

impl FakeExchange {
    async fn start(mode: Mode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let outbound = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&outbound);

        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((tcp, _)) = listener.accept().await {
                match mode {
                    Mode::Unauthorized => {
                        let _ = tokio_tungstenite::accept_hdr_async(
                            tcp,
                            |_request: &Request, _response: Response| -> Result<Response, ErrorResponse> {
                                Err(http::Response::builder()
                                    .status(StatusCode::UNAUTHORIZED)
                                    .body(None)
                                    .unwrap())
                            },
                        )
                        .await;
                    }
                    Mode::Silent => {
                        held.push(tokio_tungstenite::accept_async(tcp).await.unwrap());
                    }
                    Mode::Normal => {
                        let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
                        let (tx, rx) = mpsc::unbounded_channel();
                        *slot.lock() = Some(tx);
                        tokio::spawn(serve(ws, rx, requests_tx.clone()));
                    }
                }
            }
        });

        Self {
            url: format!("ws://{addr}/stream"),
            requests,
            outbound,
        }
    }

    fn connector(&self, heartbeat: HeartbeatConfig) -> WsConnector<BinanceProtocol> {
        WsConnector::new(
            BinanceProtocol::with_endpoint(self.url.clone()),
            WsConnectorConfig {
                heartbeat,
                watch_buffer: 16,
            },
        )
    }

    async fn next_request(&mut self) -> Value {
        timeout(WAIT, self.requests.recv()).await.unwrap().unwrap()
    }

    fn send(&self, message: Message) {
        self.outbound
            .lock()
            .as_ref()
            .expect("no client connected")
            .send(message)
            .unwrap();
    }

    fn push(&self, stream: &str, data: Value) {
        let frame = json!({"stream": stream, "data": data}).to_string();
        self.send(Message::Text(frame.into()));
    }
}

async fn serve(
    ws: WebSocketStream<TcpStream>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    requests: mpsc::UnboundedSender<Value>,
) {
    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else { return };
                let closing = matches!(message, Message::Close(_));
                if write.send(message).await.is_err() || closing {
                    return;
                }
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let request: Value = serde_json::from_str(text.as_str()).unwrap();
                    let reply = reply_to(&request);
                    let _ = requests.send(request);
                    if write.send(Message::Text(reply.to_string().into())).await.is_err() {
                        return;
                    }
                }
                Some(Ok(_)) => {}
                _ => return,
            },
        }
    }
}

fn reply_to(request: &Value) -> Value {
    let id = request["id"].clone();
    let rejected = request["params"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .any(|stream| stream.starts_with("badusdt"));
    if request["method"] == "SUBSCRIBE" && rejected {
        json!({"error": {"code": 2, "msg": "Invalid symbol."}, "id": id})
    } else {
        json!({"result": null, "id": id})
    }
}

fn ticker_data(last: &str) -> Value {
    json!({"e": "24hrTicker", "E": 1_700_000_000_000_i64, "s": "BTCUSDT", "c": last, "b": "41999.9", "a": "42000.2"})
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn watch_subscribes_and_receives_data() {
    let mut exchange = FakeExchange::start(Mode::Normal).await;
    let connector = exchange.connector(HeartbeatConfig::default());
    let _monitor = connector.open().await.unwrap();

    let mut stream = connector
        .watch(&SubscriptionKey::ticker("BTC/USDT").unwrap())
        .await
        .unwrap();

    let request = exchange.next_request().await;
    assert_eq!(
        request,
        json!({"method": "SUBSCRIBE", "params": ["btcusdt@ticker"], "id": 1})
    );

    exchange.push("btcusdt@ticker", ticker_data("42000.1"));
    let message = timeout(WAIT, stream.next()).await.unwrap().unwrap();
    assert_eq!(message["last"], "42000.1");
    assert_eq!(message["bid"], "41999.9");
    assert_eq!(message["timestamp"], 1_700_000_000_000_i64);

    connector.close().await;
}

#[tokio::test]
async fn trades_are_translated() {
    let mut exchange = FakeExchange::start(Mode::Normal).await;
    let connector = exchange.connector(HeartbeatConfig::default());
    let _monitor = connector.open().await.unwrap();

    let mut stream = connector
        .watch(&SubscriptionKey::trades("ETH/USDT").unwrap())
        .await
        .unwrap();
    assert_eq!(exchange.next_request().await["params"][0], "ethusdt@trade");

    exchange.push(
        "ethusdt@trade",
        json!({"e": "trade", "E": 1, "t": 99, "p": "2200.5", "q": "1.25", "T": 1_700_000_000_123_i64, "m": true}),
    );
    let message = timeout(WAIT, stream.next()).await.unwrap().unwrap();
    assert_eq!(message[0]["side"], "sell");
    assert_eq!(message[0]["price"], "2200.5");
    assert_eq!(message[0]["id"], 99);

    connector.close().await;
}

#[tokio::test]
async fn watches_of_one_stream_share_the_upstream_subscription() {
    let mut exchange = FakeExchange::start(Mode::Normal).await;
    let connector = exchange.connector(HeartbeatConfig::default());
    let _monitor = connector.open().await.unwrap();
    let key = SubscriptionKey::ticker("BTC/USDT").unwrap();

    let mut first = connector.watch(&key).await.unwrap();
    let mut second = connector.watch(&key).await.unwrap();
    assert_eq!(exchange.next_request().await["method"], "SUBSCRIBE");
    assert_eq!(connector.subscribed_streams(), 1);

    exchange.push("btcusdt@ticker", ticker_data("1"));
    assert_eq!(timeout(WAIT, first.next()).await.unwrap().unwrap()["last"], "1");
    assert_eq!(timeout(WAIT, second.next()).await.unwrap().unwrap()["last"], "1");

    drop(first);
    drop(second);

    // Only the last release unsubscribes; no second SUBSCRIBE was sent
    let request = exchange.next_request().await;
    assert_eq!(
        request,
        json!({"method": "UNSUBSCRIBE", "params": ["btcusdt@ticker"], "id": 2})
    );
    assert_eq!(connector.subscribed_streams(), 0);

    connector.close().await;
}

#[tokio::test]
async fn undecodable_frames_do_not_end_the_watch() {
    let mut exchange = FakeExchange::start(Mode::Normal).await;
    let connector = exchange.connector(HeartbeatConfig::default());
    let _monitor = connector.open().await.unwrap();

    let mut stream = connector
        .watch(&SubscriptionKey::ticker("BTC/USDT").unwrap())
        .await
        .unwrap();
    exchange.next_request().await;

    exchange.push("btcusdt@ticker", json!({"E": 1}));
    exchange.send(Message::Text("not json".into()));
    exchange.push("btcusdt@ticker", ticker_data("7"));

    let err = timeout(WAIT, stream.next()).await.unwrap().unwrap_err();
    assert!(matches!(err, StreamError::Protocol(_)));
    let message = timeout(WAIT, stream.next()).await.unwrap().unwrap();
    assert_eq!(message["last"], "7");
    assert!(!stream.is_terminated());

    connector.close().await;
}

#[tokio::test]
async fn rejected_subscription_ends_only_that_watch() {
    let mut exchange = FakeExchange::start(Mode::Normal).await;
    let connector = exchange.connector(HeartbeatConfig::default());
    let _monitor = connector.open().await.unwrap();

    let mut good = connector
        .watch(&SubscriptionKey::ticker("BTC/USDT").unwrap())
        .await
        .unwrap();
    exchange.next_request().await;

    let mut bad = connector
        .watch(&SubscriptionKey::ticker("BAD/USDT").unwrap())
        .await
        .unwrap();
    exchange.next_request().await;

    let err = timeout(WAIT, bad.next()).await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        StreamError::Subscription(SubscriptionError::Rejected { ref reason, .. })
            if reason == "Invalid symbol."
    ));
    assert!(!err.is_transient());

    exchange.push("btcusdt@ticker", ticker_data("3"));
    assert_eq!(timeout(WAIT, good.next()).await.unwrap().unwrap()["last"], "3");

    connector.close().await;
}

#[tokio::test]
async fn server_close_ends_the_session() {
    let mut exchange = FakeExchange::start(Mode::Normal).await;
    let connector = exchange.connector(HeartbeatConfig::default());
    let mut monitor = connector.open().await.unwrap();
    let key = SubscriptionKey::ticker("BTC/USDT").unwrap();

    let mut stream = connector.watch(&key).await.unwrap();
    exchange.next_request().await;

    exchange.send(Message::Close(None));

    let cause = timeout(WAIT, monitor.lost()).await.unwrap();
    assert!(matches!(cause, StreamError::Closed));
    assert!(cause.is_transient());
    assert!(timeout(WAIT, stream.next()).await.unwrap().is_err());
    assert!(matches!(connector.watch(&key).await, Err(StreamError::Closed)));

    // A fresh session subscribes from scratch
    let _monitor = connector.open().await.unwrap();
    let _stream = connector.watch(&key).await.unwrap();
    assert_eq!(
        exchange.next_request().await,
        json!({"method": "SUBSCRIBE", "params": ["btcusdt@ticker"], "id": 1})
    );

    connector.close().await;
}

#[tokio::test]
async fn silent_server_expires_the_session() {
    let exchange = FakeExchange::start(Mode::Silent).await;
    let connector = exchange.connector(HeartbeatConfig::new(
        Duration::from_millis(50),
        Duration::from_millis(60),
    ));
    let mut monitor = connector.open().await.unwrap();

    let cause = timeout(WAIT, monitor.lost()).await.unwrap();
    assert!(matches!(cause, StreamError::Timeout(_)));
    assert!(cause.is_transient());
}

#[tokio::test]
async fn refused_handshake_is_an_auth_error() {
    let exchange = FakeExchange::start(Mode::Unauthorized).await;
    let connector = exchange.connector(HeartbeatConfig::default());

    let err = connector.open().await.unwrap_err();
    assert!(matches!(err, StreamError::Auth(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn unreachable_endpoint_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connector = WsConnector::new(
        BinanceProtocol::with_endpoint(format!("ws://{addr}/stream")),
        WsConnectorConfig::default(),
    );
    let err = connector.open().await.unwrap_err();
    assert!(matches!(err, StreamError::Connection(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn close_terminates_watches() {
    let mut exchange = FakeExchange::start(Mode::Normal).await;
    let connector = exchange.connector(HeartbeatConfig::default());
    let mut monitor = connector.open().await.unwrap();
    let key = SubscriptionKey::ticker("BTC/USDT").unwrap();

    let mut stream = connector.watch(&key).await.unwrap();
    exchange.next_request().await;

    connector.close().await;

    assert!(matches!(
        timeout(WAIT, stream.next()).await.unwrap(),
        Err(StreamError::Closed)
    ));
    assert!(matches!(connector.watch(&key).await, Err(StreamError::Closed)));
    assert!(matches!(
        timeout(WAIT, monitor.lost()).await.unwrap(),
        StreamError::Closed
    ));
}

#[tokio::test]
async fn settled_symbols_are_refused_before_subscribing() {
    let exchange = FakeExchange::start(Mode::Normal).await;
    let connector = exchange.connector(HeartbeatConfig::default());
    let _monitor = connector.open().await.unwrap();

    let err = connector
        .watch(&SubscriptionKey::ticker("BTC/USDT:USDT").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StreamError::Subscription(SubscriptionError::UnsupportedSymbol { .. })
    ));
    assert_eq!(connector.subscribed_streams(), 0);

    connector.close().await;
}

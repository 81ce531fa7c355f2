//! Exchange Adapters
//!
//! WebSocket connectors implementing the `ExchangeConnector` port.
//!
//! - `ws`: Generic multiplexed WebSocket session with keepalive
//! - `protocol`: Per-venue naming, control frames and decoding
//! - `binance`: Binance spot combined streams
//! - `factory`: Exchange id to adapter mapping

pub mod binance;
pub mod factory;
pub mod heartbeat;
pub mod protocol;
pub mod ws;

pub use binance::{BINANCE_ENDPOINT, BinanceProtocol};
pub use factory::{DefaultConnectorFactory, SUPPORTED_EXCHANGES};
pub use heartbeat::{HeartbeatConfig, Keepalive, KeepaliveAction};
pub use protocol::{DecodeError, ExchangeProtocol, Inbound};
pub use ws::{WsConnector, WsConnectorConfig};

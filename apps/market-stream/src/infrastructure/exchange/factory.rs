//! Connector Factory
//!
//! Maps exchange ids to concrete adapters.

use std::collections::HashMap;
use std::sync::Arc;

use super::binance::BinanceProtocol;
use super::ws::{WsConnector, WsConnectorConfig};
use crate::application::ports::{ConnectorFactory, ExchangeConnector};
use crate::domain::error::StreamError;
use crate::infrastructure::config::StreamConfig;

/// Exchanges with a built-in adapter.
pub const SUPPORTED_EXCHANGES: &[&str] = &["binance"];

/// Builds WebSocket connectors for the supported exchanges.
#[derive(Debug, Clone)]
pub struct DefaultConnectorFactory {
    connector: WsConnectorConfig,
    endpoints: HashMap<String, String>,
}

impl DefaultConnectorFactory {
    /// Factory using the service configuration.
    #[must_use]
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            connector: WsConnectorConfig::from_stream_config(config),
            endpoints: HashMap::new(),
        }
    }

    /// Point an exchange at a non-default endpoint (testnet, local server).
    #[must_use]
    pub fn with_endpoint(mut self, exchange_id: &str, endpoint: impl Into<String>) -> Self {
        self.endpoints.insert(exchange_id.to_string(), endpoint.into());
        self
    }
}

impl ConnectorFactory for DefaultConnectorFactory {
    fn create(&self, exchange_id: &str) -> Result<Arc<dyn ExchangeConnector>, StreamError> {
        match exchange_id {
            "binance" => {
                let protocol = self
                    .endpoints
                    .get(exchange_id)
                    .map_or_else(BinanceProtocol::new, BinanceProtocol::with_endpoint);
                Ok(Arc::new(WsConnector::new(protocol, self.connector.clone())))
            }
            other => Err(StreamError::UnsupportedExchange(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binance_is_supported() {
        let factory = DefaultConnectorFactory::new(&StreamConfig::default());
        let connector = factory.create("binance").unwrap();
        assert_eq!(connector.exchange_id(), "binance");
    }

    #[test]
    fn other_exchanges_are_unsupported() {
        let factory = DefaultConnectorFactory::new(&StreamConfig::default());
        let err = factory.create("kraken").err().unwrap();
        assert!(!err.is_transient());
        assert!(matches!(err, StreamError::UnsupportedExchange(id) if id == "kraken"));
    }

    #[test]
    fn endpoint_override_keeps_exchange_id() {
        let factory = DefaultConnectorFactory::new(&StreamConfig::default())
            .with_endpoint("binance", "ws://127.0.0.1:9/stream");
        assert_eq!(factory.create("binance").unwrap().exchange_id(), "binance");
    }
}

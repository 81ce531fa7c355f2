//! Stream Configuration Settings
//!
//! Configuration types for the streaming core, loaded from environment
//! variables. Everything has a default; only malformed values are errors.

use std::collections::HashMap;
use std::time::Duration;

use crate::application::services::manager::ManagerConfig;
use crate::application::services::reconnect::ReconnectConfig;
use crate::domain::error::SubscriptionError;
use crate::domain::subscription::SubscriptionRequest;

const PREFIX: &str = "MARKET_STREAM_";

/// Exchange API credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret,
        }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the API secret.
    #[must_use]
    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

/// Connection supervision settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    /// Reconnection attempts before a connection is marked failed.
    pub max_retries: u32,
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Maximum reconnection delay.
    pub max_delay: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Jitter as a fraction of the delay.
    pub jitter_factor: f64,
    /// Time allowed for the connector handshake.
    pub open_timeout: Duration,
    /// Buffered raw messages per watch before backpressure.
    pub watch_buffer: usize,
    /// Capacity of the connection event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            open_timeout: Duration::from_secs(10),
            watch_buffer: 1024,
            event_capacity: 256,
        }
    }
}

impl ConnectionSettings {
    /// Backoff configuration for the supervisor.
    #[must_use]
    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            multiplier: self.backoff_multiplier,
            jitter_factor: self.jitter_factor,
            max_retries: self.max_retries,
        }
    }
}

/// WebSocket keepalive settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketSettings {
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Heartbeat timeout before considering connection dead.
    pub heartbeat_timeout: Duration,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(20),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

/// Complete streaming configuration.
#[derive(Debug, Clone, Default)]
pub struct StreamConfig {
    /// Connection supervision settings.
    pub connection: ConnectionSettings,
    /// WebSocket keepalive settings.
    pub websocket: WebSocketSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Credentials by exchange id.
    pub credentials: HashMap<String, Credentials>,
    /// Subscriptions the daemon opens at startup.
    pub subscriptions: Vec<SubscriptionRequest>,
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error for empty or half-configured credentials and for
    /// unparseable startup subscriptions.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Create configuration from an explicit set of variables.
    ///
    /// # Errors
    ///
    /// See [`StreamConfig::from_env`].
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let env: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let defaults = ConnectionSettings::default();
        let connection = ConnectionSettings {
            max_retries: parse_env_u32(&env, "MAX_RETRIES", defaults.max_retries),
            base_delay: parse_env_duration_millis(&env, "BASE_DELAY_MS", defaults.base_delay),
            max_delay: parse_env_duration_secs(&env, "MAX_DELAY_SECS", defaults.max_delay),
            backoff_multiplier: parse_env_f64(
                &env,
                "BACKOFF_MULTIPLIER",
                defaults.backoff_multiplier,
            ),
            jitter_factor: parse_env_f64(&env, "JITTER_FACTOR", defaults.jitter_factor),
            open_timeout: parse_env_duration_secs(
                &env,
                "OPEN_TIMEOUT_SECS",
                defaults.open_timeout,
            ),
            watch_buffer: parse_env_usize(&env, "WATCH_BUFFER", defaults.watch_buffer),
            event_capacity: parse_env_usize(&env, "EVENT_CAPACITY", defaults.event_capacity),
        };

        let websocket = WebSocketSettings {
            heartbeat_interval: parse_env_duration_secs(
                &env,
                "HEARTBEAT_INTERVAL_SECS",
                WebSocketSettings::default().heartbeat_interval,
            ),
            heartbeat_timeout: parse_env_duration_secs(
                &env,
                "HEARTBEAT_TIMEOUT_SECS",
                WebSocketSettings::default().heartbeat_timeout,
            ),
        };

        let server = ServerSettings {
            health_port: parse_env_u16(&env, "HEALTH_PORT", ServerSettings::default().health_port),
        };

        Ok(Self {
            connection,
            websocket,
            server,
            credentials: parse_credentials(&env)?,
            subscriptions: parse_subscriptions(&env)?,
        })
    }

    /// Settings for the connection manager.
    #[must_use]
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            reconnect: self.connection.reconnect_config(),
            open_timeout: self.connection.open_timeout,
            event_capacity: self.connection.event_capacity,
        }
    }

    /// Credentials for an exchange, if configured.
    #[must_use]
    pub fn credentials_for(&self, exchange_id: &str) -> Option<&Credentials> {
        self.credentials.get(exchange_id)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// A startup subscription could not be parsed.
    #[error("invalid subscription '{spec}': {source}")]
    InvalidSubscription {
        /// The offending entry.
        spec: String,
        /// Why it was rejected.
        source: SubscriptionError,
    },
}

/// Collect `EXCHANGE_<ID>_API_KEY` / `EXCHANGE_<ID>_API_SECRET` pairs.
fn parse_credentials(env: &HashMap<String, String>) -> Result<HashMap<String, Credentials>, ConfigError> {
    let mut credentials = HashMap::new();

    for (key, api_key) in env {
        let Some(id) = key
            .strip_prefix("EXCHANGE_")
            .and_then(|rest| rest.strip_suffix("_API_KEY"))
        else {
            continue;
        };
        if id.is_empty() {
            continue;
        }

        let secret_var = format!("EXCHANGE_{id}_API_SECRET");
        let api_secret = env
            .get(&secret_var)
            .ok_or_else(|| ConfigError::MissingEnvVar(secret_var.clone()))?;

        if api_key.is_empty() {
            return Err(ConfigError::EmptyValue(key.clone()));
        }
        if api_secret.is_empty() {
            return Err(ConfigError::EmptyValue(secret_var));
        }

        credentials.insert(
            id.to_lowercase(),
            Credentials::new(api_key.clone(), api_secret.clone()),
        );
    }

    Ok(credentials)
}

/// Parse `MARKET_STREAM_SUBSCRIPTIONS`: comma-separated
/// `exchange:channel:SYMBOL[:timeframe]` entries.
fn parse_subscriptions(
    env: &HashMap<String, String>,
) -> Result<Vec<SubscriptionRequest>, ConfigError> {
    let Some(raw) = env.get(&format!("{PREFIX}SUBSCRIPTIONS")) else {
        return Ok(vec![]);
    };

    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<SubscriptionRequest>()
                .map_err(|source| ConfigError::InvalidSubscription {
                    spec: entry.to_string(),
                    source,
                })
        })
        .collect()
}

fn lookup<'a>(env: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    env.get(&format!("{PREFIX}{key}")).map(String::as_str)
}

fn parse_env_u16(env: &HashMap<String, String>, key: &str, default: u16) -> u16 {
    lookup(env, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(env: &HashMap<String, String>, key: &str, default: u32) -> u32 {
    lookup(env, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(env: &HashMap<String, String>, key: &str, default: usize) -> usize {
    lookup(env, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(env: &HashMap<String, String>, key: &str, default: f64) -> f64 {
    lookup(env, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(env: &HashMap<String, String>, key: &str, default: Duration) -> Duration {
    lookup(env, key)
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(
    env: &HashMap<String, String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(env, key)
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::{Channel, Timeframe};

    #[test]
    fn defaults_without_variables() {
        let config = StreamConfig::from_vars(Vec::<(String, String)>::new()).unwrap();

        assert_eq!(config.connection, ConnectionSettings::default());
        assert_eq!(config.connection.max_retries, 5);
        assert_eq!(config.connection.base_delay, Duration::from_millis(500));
        assert_eq!(config.connection.max_delay, Duration::from_secs(30));
        assert_eq!(config.connection.open_timeout, Duration::from_secs(10));
        assert_eq!(config.connection.watch_buffer, 1024);
        assert_eq!(config.websocket.heartbeat_interval, Duration::from_secs(20));
        assert_eq!(config.websocket.heartbeat_timeout, Duration::from_secs(20));
        assert_eq!(config.server.health_port, 8082);
        assert!(config.credentials.is_empty());
        assert!(config.subscriptions.is_empty());
    }

    #[test]
    fn overrides_are_applied() {
        let config = StreamConfig::from_vars([
            ("MARKET_STREAM_MAX_RETRIES", "3"),
            ("MARKET_STREAM_BASE_DELAY_MS", "250"),
            ("MARKET_STREAM_MAX_DELAY_SECS", "5"),
            ("MARKET_STREAM_HEARTBEAT_INTERVAL_SECS", "15"),
            ("MARKET_STREAM_HEALTH_PORT", "9000"),
        ])
        .unwrap();

        let reconnect = config.manager_config().reconnect;
        assert_eq!(reconnect.max_retries, 3);
        assert_eq!(reconnect.base_delay, Duration::from_millis(250));
        assert_eq!(reconnect.max_delay, Duration::from_secs(5));
        assert_eq!(config.websocket.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.server.health_port, 9000);
    }

    #[test]
    fn unparseable_values_fall_back_to_defaults() {
        let config = StreamConfig::from_vars([("MARKET_STREAM_MAX_RETRIES", "many")]).unwrap();
        assert_eq!(config.connection.max_retries, 5);
    }

    #[test]
    fn credentials_are_collected_per_exchange() {
        let config = StreamConfig::from_vars([
            ("EXCHANGE_BINANCE_API_KEY", "key123"),
            ("EXCHANGE_BINANCE_API_SECRET", "secret456"),
        ])
        .unwrap();

        let creds = config.credentials_for("binance").unwrap();
        assert_eq!(creds.api_key(), "key123");
        assert_eq!(creds.api_secret(), "secret456");
        assert!(config.credentials_for("kraken").is_none());
    }

    #[test]
    fn credentials_need_both_halves() {
        let err = StreamConfig::from_vars([("EXCHANGE_KRAKEN_API_KEY", "key")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(var) if var == "EXCHANGE_KRAKEN_API_SECRET"));

        let err = StreamConfig::from_vars([
            ("EXCHANGE_KRAKEN_API_KEY", "key"),
            ("EXCHANGE_KRAKEN_API_SECRET", ""),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(_)));
    }

    #[test]
    fn credentials_redacted_debug() {
        let creds = Credentials::new("key123".to_string(), "secret456".to_string());
        let debug = format!("{creds:?}");
        assert!(!debug.contains("key123"));
        assert!(!debug.contains("secret456"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn startup_subscriptions_are_parsed() {
        let config = StreamConfig::from_vars([(
            "MARKET_STREAM_SUBSCRIPTIONS",
            "binance:ticker:BTC/USDT, binance:ohlcv:ETH/USDT:1m,",
        )])
        .unwrap();

        assert_eq!(config.subscriptions.len(), 2);
        assert_eq!(config.subscriptions[0].channel, Channel::Ticker);
        assert_eq!(config.subscriptions[1].timeframe, Some(Timeframe::M1));
    }

    #[test]
    fn bad_startup_subscription_is_an_error() {
        let err = StreamConfig::from_vars([("MARKET_STREAM_SUBSCRIPTIONS", "binance:funding:BTC/USDT")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSubscription { .. }));
    }
}

//! Subscription Types and Registry
//!
//! Domain types describing *what should be streaming*, independent of
//! whether the underlying connection is currently healthy.
//!
//! # Design
//!
//! The registry tracks, per exchange:
//! - Each desired subscription, keyed by a deterministic [`SubscriptionId`]
//! - The consumers attached to it (reference counting for fan-out)
//!
//! Identical requests collapse to the same id, so many consumers can share
//! one upstream channel. A subscription disappears only when its last
//! consumer leaves or the exchange is explicitly disconnected; transient
//! connection loss never touches the registry, which is what makes replay
//! after reconnect possible.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

use super::error::SubscriptionError;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a consumer handle.
pub type ConsumerId = u64;

/// Category of streamed market data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Best bid/ask and 24h statistics.
    Ticker,
    /// Public trade prints.
    Trades,
    /// Order book depth snapshots.
    OrderBook,
    /// OHLCV candles for a timeframe.
    Ohlcv,
}

impl Channel {
    /// Get all channel kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Ticker, Self::Trades, Self::OrderBook, Self::Ohlcv]
    }

    /// Channel name used in ids, logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Trades => "trades",
            Self::OrderBook => "orderbook",
            Self::Ohlcv => "ohlcv",
        }
    }

    /// Whether subscriptions on this channel need a timeframe.
    #[must_use]
    pub const fn requires_timeframe(self) -> bool {
        matches!(self, Self::Ohlcv)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ticker" => Ok(Self::Ticker),
            "trades" | "trade" => Ok(Self::Trades),
            "orderbook" | "order_book" | "book" => Ok(Self::OrderBook),
            "ohlcv" | "candles" | "kline" => Ok(Self::Ohlcv),
            _ => Err(SubscriptionError::UnknownChannel(s.to_string())),
        }
    }
}

/// Candle timeframe. The set is fixed; anything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Timeframe {
    /// 1 minute.
    #[serde(rename = "1m")]
    M1,
    /// 3 minutes.
    #[serde(rename = "3m")]
    M3,
    /// 5 minutes.
    #[serde(rename = "5m")]
    M5,
    /// 15 minutes.
    #[serde(rename = "15m")]
    M15,
    /// 30 minutes.
    #[serde(rename = "30m")]
    M30,
    /// 1 hour.
    #[serde(rename = "1h")]
    H1,
    /// 2 hours.
    #[serde(rename = "2h")]
    H2,
    /// 4 hours.
    #[serde(rename = "4h")]
    H4,
    /// 6 hours.
    #[serde(rename = "6h")]
    H6,
    /// 8 hours.
    #[serde(rename = "8h")]
    H8,
    /// 12 hours.
    #[serde(rename = "12h")]
    H12,
    /// 1 day.
    #[serde(rename = "1d")]
    D1,
    /// 3 days.
    #[serde(rename = "3d")]
    D3,
    /// 1 week.
    #[serde(rename = "1w")]
    W1,
    /// 1 month.
    #[serde(rename = "1M")]
    Mo1,
}

impl Timeframe {
    /// Get all supported timeframes, shortest first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::M1,
            Self::M3,
            Self::M5,
            Self::M15,
            Self::M30,
            Self::H1,
            Self::H2,
            Self::H4,
            Self::H6,
            Self::H8,
            Self::H12,
            Self::D1,
            Self::D3,
            Self::W1,
            Self::Mo1,
        ]
    }

    /// Canonical label (`1m`, `4h`, `1M`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H4 => "4h",
            Self::H6 => "6h",
            Self::H8 => "8h",
            Self::H12 => "12h",
            Self::D1 => "1d",
            Self::D3 => "3d",
            Self::W1 => "1w",
            Self::Mo1 => "1M",
        }
    }

    /// Nominal candle length. Months count as 30 days.
    #[must_use]
    pub const fn duration(self) -> Duration {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 60 * MINUTE;
        const DAY: u64 = 24 * HOUR;
        let secs = match self {
            Self::M1 => MINUTE,
            Self::M3 => 3 * MINUTE,
            Self::M5 => 5 * MINUTE,
            Self::M15 => 15 * MINUTE,
            Self::M30 => 30 * MINUTE,
            Self::H1 => HOUR,
            Self::H2 => 2 * HOUR,
            Self::H4 => 4 * HOUR,
            Self::H6 => 6 * HOUR,
            Self::H8 => 8 * HOUR,
            Self::H12 => 12 * HOUR,
            Self::D1 => DAY,
            Self::D3 => 3 * DAY,
            Self::W1 => 7 * DAY,
            Self::Mo1 => 30 * DAY,
        };
        Duration::from_secs(secs)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = SubscriptionError;

    /// Case matters: `1m` is a minute, `1M` a month.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::all()
            .iter()
            .copied()
            .find(|tf| tf.as_str() == trimmed)
            .ok_or_else(|| SubscriptionError::UnsupportedTimeframe(s.to_string()))
    }
}

/// Normalize an exchange id to its lowercase canonical form.
///
/// # Errors
///
/// Returns `EmptyExchange` for blank ids and `Malformed` for ids containing
/// characters other than ASCII alphanumerics, `_` and `-`.
pub fn normalize_exchange_id(raw: &str) -> Result<String, SubscriptionError> {
    let id = raw.trim().to_lowercase();
    if id.is_empty() {
        return Err(SubscriptionError::EmptyExchange);
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(SubscriptionError::Malformed(raw.to_string()));
    }
    Ok(id)
}

/// Normalize a unified symbol (`btc/usdt` -> `BTC/USDT`).
///
/// Accepts an optional settlement suffix for derivatives (`BTC/USDT:USDT`).
fn normalize_symbol(raw: &str) -> Result<String, SubscriptionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SubscriptionError::EmptySymbol);
    }

    let upper = trimmed.to_uppercase();
    let (pair, settle) = match upper.split_once(':') {
        Some((pair, settle)) => (pair, Some(settle)),
        None => (upper.as_str(), None),
    };

    let valid_part = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric());

    let Some((base, quote)) = pair.split_once('/') else {
        return Err(SubscriptionError::InvalidSymbol(raw.to_string()));
    };
    if !valid_part(base) || !valid_part(quote) || settle.is_some_and(|s| !valid_part(s)) {
        return Err(SubscriptionError::InvalidSymbol(raw.to_string()));
    }

    Ok(upper)
}

// =============================================================================
// Subscription Key / Id / Request
// =============================================================================

/// Validated `(channel, symbol, timeframe?)` tuple, scoped to one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionKey {
    channel: Channel,
    symbol: String,
    timeframe: Option<Timeframe>,
}

impl SubscriptionKey {
    /// Build a key, normalizing the symbol and enforcing the timeframe rule.
    ///
    /// # Errors
    ///
    /// Returns a `SubscriptionError` for an invalid symbol, a missing OHLCV
    /// timeframe, or a timeframe on a channel that does not take one.
    pub fn new(
        channel: Channel,
        symbol: &str,
        timeframe: Option<Timeframe>,
    ) -> Result<Self, SubscriptionError> {
        let symbol = normalize_symbol(symbol)?;
        match (channel.requires_timeframe(), timeframe) {
            (true, None) => return Err(SubscriptionError::MissingTimeframe(channel)),
            (false, Some(_)) => return Err(SubscriptionError::UnexpectedTimeframe(channel)),
            _ => {}
        }
        Ok(Self {
            channel,
            symbol,
            timeframe,
        })
    }

    /// Ticker key.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol is invalid.
    pub fn ticker(symbol: &str) -> Result<Self, SubscriptionError> {
        Self::new(Channel::Ticker, symbol, None)
    }

    /// Trades key.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol is invalid.
    pub fn trades(symbol: &str) -> Result<Self, SubscriptionError> {
        Self::new(Channel::Trades, symbol, None)
    }

    /// Order book key.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol is invalid.
    pub fn order_book(symbol: &str) -> Result<Self, SubscriptionError> {
        Self::new(Channel::OrderBook, symbol, None)
    }

    /// OHLCV key.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol is invalid.
    pub fn ohlcv(symbol: &str, timeframe: Timeframe) -> Result<Self, SubscriptionError> {
        Self::new(Channel::Ohlcv, symbol, Some(timeframe))
    }

    /// Channel kind.
    #[must_use]
    pub const fn channel(&self) -> Channel {
        self.channel
    }

    /// Normalized symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Timeframe, present iff the channel is OHLCV.
    #[must_use]
    pub const fn timeframe(&self) -> Option<Timeframe> {
        self.timeframe
    }

    /// Base and quote currencies, ignoring any settlement suffix.
    #[must_use]
    pub fn base_quote(&self) -> (&str, &str) {
        let pair = self
            .symbol
            .split_once(':')
            .map_or(self.symbol.as_str(), |(pair, _)| pair);
        pair.split_once('/').unwrap_or((pair, ""))
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.symbol)?;
        if let Some(tf) = self.timeframe {
            write!(f, ":{tf}")?;
        }
        Ok(())
    }
}

/// Deterministic id of a subscription: `exchange:channel:SYMBOL[:timeframe]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Derive the id for a key on an exchange.
    #[must_use]
    pub fn new(exchange_id: &str, key: &SubscriptionKey) -> Self {
        Self(format!("{exchange_id}:{key}"))
    }

    /// String form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exchange this subscription belongs to.
    #[must_use]
    pub fn exchange_id(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(ex, _)| ex)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A caller's request to stream one channel for one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    /// Exchange id (`binance`, `kraken`, ...).
    pub exchange_id: String,
    /// Channel kind.
    pub channel: Channel,
    /// Unified symbol.
    pub symbol: String,
    /// Timeframe, required for OHLCV.
    pub timeframe: Option<Timeframe>,
}

impl SubscriptionRequest {
    /// Create a request.
    #[must_use]
    pub fn new(
        exchange_id: impl Into<String>,
        channel: Channel,
        symbol: impl Into<String>,
        timeframe: Option<Timeframe>,
    ) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            channel,
            symbol: symbol.into(),
            timeframe,
        }
    }

    /// Ticker request.
    #[must_use]
    pub fn ticker(exchange_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self::new(exchange_id, Channel::Ticker, symbol, None)
    }

    /// Trades request.
    #[must_use]
    pub fn trades(exchange_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self::new(exchange_id, Channel::Trades, symbol, None)
    }

    /// Order book request.
    #[must_use]
    pub fn order_book(exchange_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self::new(exchange_id, Channel::OrderBook, symbol, None)
    }

    /// OHLCV request.
    #[must_use]
    pub fn ohlcv(
        exchange_id: impl Into<String>,
        symbol: impl Into<String>,
        timeframe: Timeframe,
    ) -> Self {
        Self::new(exchange_id, Channel::Ohlcv, symbol, Some(timeframe))
    }

    /// Validate and split into the normalized exchange id and key.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn resolve(&self) -> Result<(String, SubscriptionKey), SubscriptionError> {
        let exchange_id = normalize_exchange_id(&self.exchange_id)?;
        let key = SubscriptionKey::new(self.channel, &self.symbol, self.timeframe)?;
        Ok((exchange_id, key))
    }

    /// The id this request maps to.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn id(&self) -> Result<SubscriptionId, SubscriptionError> {
        let (exchange_id, key) = self.resolve()?;
        Ok(SubscriptionId::new(&exchange_id, &key))
    }
}

impl FromStr for SubscriptionRequest {
    type Err = SubscriptionError;

    /// Parse `exchange:channel:SYMBOL[:timeframe]`, e.g. `binance:ohlcv:BTC/USDT:1m`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, ':');
        let (Some(exchange), Some(channel), Some(rest)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(SubscriptionError::Malformed(s.to_string()));
        };

        let channel: Channel = channel.parse()?;
        let (symbol, timeframe) = if channel.requires_timeframe() {
            let (symbol, tf) = rest
                .rsplit_once(':')
                .ok_or(SubscriptionError::MissingTimeframe(channel))?;
            (symbol, Some(tf.parse::<Timeframe>()?))
        } else {
            (rest, None)
        };

        let request = Self::new(exchange, channel, symbol, timeframe);
        request.resolve()?;
        Ok(request)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Outcome of adding a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Added {
    /// Subscription id the consumer is attached to.
    pub id: SubscriptionId,
    /// The subscription did not exist before this call.
    pub first_consumer: bool,
    /// The consumer was not already attached.
    pub new_consumer: bool,
}

/// Outcome of removing a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removed {
    /// Unknown id or consumer; nothing changed.
    NotSubscribed,
    /// Consumer detached; other consumers remain.
    ConsumerRemoved {
        /// Consumers still attached.
        remaining: usize,
    },
    /// Last consumer detached; the subscription is gone.
    SubscriptionRemoved,
}

#[derive(Debug)]
struct SubscriptionEntry<C> {
    key: SubscriptionKey,
    consumers: HashMap<ConsumerId, C>,
}

type ExchangeSubscriptions<C> = BTreeMap<SubscriptionId, SubscriptionEntry<C>>;

/// Authoritative desired-subscription set, per exchange.
///
/// Generic over the consumer handle so the domain does not depend on the
/// sink port; the connection manager stores `Arc<dyn EventSink>` here.
///
/// # Example
///
/// ```rust
/// use market_stream::domain::subscription::{Removed, SubscriptionKey, SubscriptionRegistry};
///
/// let registry: SubscriptionRegistry<&str> = SubscriptionRegistry::new();
/// let key = SubscriptionKey::ticker("BTC/USDT").unwrap();
///
/// let first = registry.add("binance", key.clone(), 1, "strategy");
/// assert!(first.first_consumer);
///
/// // A second consumer shares the same subscription
/// let second = registry.add("binance", key, 2, "recorder");
/// assert_eq!(first.id, second.id);
/// assert!(!second.first_consumer);
///
/// assert_eq!(registry.remove(&first.id, 1), Removed::ConsumerRemoved { remaining: 1 });
/// assert_eq!(registry.remove(&first.id, 2), Removed::SubscriptionRemoved);
/// ```
#[derive(Debug)]
pub struct SubscriptionRegistry<C> {
    exchanges: RwLock<HashMap<String, ExchangeSubscriptions<C>>>,
}

impl<C> Default for SubscriptionRegistry<C> {
    fn default() -> Self {
        Self {
            exchanges: RwLock::new(HashMap::new()),
        }
    }
}

impl<C: Clone> SubscriptionRegistry<C> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a consumer to the subscription for `key` on `exchange_id`,
    /// creating the subscription if needed.
    pub fn add(
        &self,
        exchange_id: &str,
        key: SubscriptionKey,
        consumer: ConsumerId,
        handle: C,
    ) -> Added {
        let id = SubscriptionId::new(exchange_id, &key);
        let mut exchanges = self.exchanges.write();
        let subscriptions = exchanges.entry(exchange_id.to_string()).or_default();

        let mut first_consumer = false;
        let entry = subscriptions.entry(id.clone()).or_insert_with(|| {
            first_consumer = true;
            SubscriptionEntry {
                key,
                consumers: HashMap::new(),
            }
        });
        let new_consumer = entry.consumers.insert(consumer, handle).is_none();

        Added {
            id,
            first_consumer,
            new_consumer,
        }
    }

    /// Detach a consumer. Unknown ids and consumers are a no-op.
    pub fn remove(&self, id: &SubscriptionId, consumer: ConsumerId) -> Removed {
        let mut exchanges = self.exchanges.write();
        let Some(subscriptions) = exchanges.get_mut(id.exchange_id()) else {
            return Removed::NotSubscribed;
        };
        let Some(entry) = subscriptions.get_mut(id) else {
            return Removed::NotSubscribed;
        };
        if entry.consumers.remove(&consumer).is_none() {
            return Removed::NotSubscribed;
        }

        let remaining = entry.consumers.len();
        if remaining > 0 {
            return Removed::ConsumerRemoved { remaining };
        }

        subscriptions.remove(id);
        if subscriptions.is_empty() {
            exchanges.remove(id.exchange_id());
        }
        Removed::SubscriptionRemoved
    }

    /// Detach a consumer from everything it is subscribed to.
    ///
    /// Returns the subscriptions that lost their last consumer.
    pub fn remove_consumer(&self, consumer: ConsumerId) -> Vec<SubscriptionId> {
        let mut exchanges = self.exchanges.write();
        let mut emptied = Vec::new();

        for subscriptions in exchanges.values_mut() {
            subscriptions.retain(|id, entry| {
                if entry.consumers.remove(&consumer).is_some() && entry.consumers.is_empty() {
                    emptied.push(id.clone());
                    return false;
                }
                true
            });
        }
        exchanges.retain(|_, subscriptions| !subscriptions.is_empty());

        emptied
    }

    /// Snapshot of the consumers attached to a subscription.
    #[must_use]
    pub fn consumers(&self, id: &SubscriptionId) -> Vec<C> {
        self.exchanges
            .read()
            .get(id.exchange_id())
            .and_then(|subscriptions| subscriptions.get(id))
            .map(|entry| entry.consumers.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every distinct consumer attached to any subscription on an exchange.
    #[must_use]
    pub fn exchange_consumers(&self, exchange_id: &str) -> Vec<C> {
        let exchanges = self.exchanges.read();
        let Some(subscriptions) = exchanges.get(exchange_id) else {
            return vec![];
        };

        let mut seen = HashSet::new();
        subscriptions
            .values()
            .flat_map(|entry| entry.consumers.iter())
            .filter(|(consumer, _)| seen.insert(**consumer))
            .map(|(_, handle)| handle.clone())
            .collect()
    }

    /// The desired set for an exchange, in id order. This is what gets
    /// replayed after a successful (re)connect.
    #[must_use]
    pub fn replay(&self, exchange_id: &str) -> Vec<(SubscriptionId, SubscriptionKey)> {
        self.exchanges
            .read()
            .get(exchange_id)
            .map(|subscriptions| {
                subscriptions
                    .iter()
                    .map(|(id, entry)| (id.clone(), entry.key.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop one subscription together with all of its consumers. Returns
    /// whether it was desired.
    pub fn discard(&self, id: &SubscriptionId) -> bool {
        let mut exchanges = self.exchanges.write();
        let Some(subscriptions) = exchanges.get_mut(id.exchange_id()) else {
            return false;
        };
        let removed = subscriptions.remove(id).is_some();
        if subscriptions.is_empty() {
            exchanges.remove(id.exchange_id());
        }
        removed
    }

    /// Drop every subscription for an exchange. Returns how many were removed.
    pub fn clear(&self, exchange_id: &str) -> usize {
        self.exchanges
            .write()
            .remove(exchange_id)
            .map_or(0, |subscriptions| subscriptions.len())
    }

    /// Whether a subscription is currently desired.
    #[must_use]
    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.exchanges
            .read()
            .get(id.exchange_id())
            .is_some_and(|subscriptions| subscriptions.contains_key(id))
    }

    /// Statistics for one exchange.
    #[must_use]
    pub fn stats(&self, exchange_id: &str) -> SubscriptionStats {
        let exchanges = self.exchanges.read();
        exchanges
            .get(exchange_id)
            .map(stats_for)
            .unwrap_or_default()
    }

    /// Statistics across all exchanges.
    #[must_use]
    pub fn total_stats(&self) -> TotalSubscriptionStats {
        let exchanges = self.exchanges.read();
        let mut consumers = HashSet::new();
        let mut subscription_count = 0;

        for subscriptions in exchanges.values() {
            subscription_count += subscriptions.len();
            for entry in subscriptions.values() {
                consumers.extend(entry.consumers.keys().copied());
            }
        }

        TotalSubscriptionStats {
            exchange_count: exchanges.len(),
            subscription_count,
            consumer_count: consumers.len(),
        }
    }
}

fn stats_for<C>(subscriptions: &ExchangeSubscriptions<C>) -> SubscriptionStats {
    let consumers: HashSet<ConsumerId> = subscriptions
        .values()
        .flat_map(|entry| entry.consumers.keys().copied())
        .collect();
    SubscriptionStats {
        subscription_count: subscriptions.len(),
        consumer_count: consumers.len(),
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics for a single exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    /// Number of desired subscriptions.
    pub subscription_count: usize,
    /// Number of distinct consumers.
    pub consumer_count: usize,
}

/// Statistics across every exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TotalSubscriptionStats {
    /// Exchanges with at least one subscription.
    pub exchange_count: usize,
    /// Number of desired subscriptions.
    pub subscription_count: usize,
    /// Number of distinct consumers.
    pub consumer_count: usize,
}

// =============================================================================
// Tests
// =============================================================================

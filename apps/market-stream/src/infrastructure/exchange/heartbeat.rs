//! Session Keepalive
//!
//! Ping/pong bookkeeping for a WebSocket session. Any inbound frame counts
//! as proof of life; a session that stays silent for longer than the pong
//! timeout after a ping is considered dead.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::infrastructure::config::WebSocketSettings;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Silence tolerated after a ping before the session is declared dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(20),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &WebSocketSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            pong_timeout: settings.heartbeat_timeout,
        }
    }
}

/// What the session should do on a keepalive tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveAction {
    /// Send a ping frame.
    Ping,
    /// Nothing was heard for this long after a ping.
    Expired(Duration),
}

/// Keepalive clock owned by a session task.
#[derive(Debug)]
pub struct Keepalive {
    config: HeartbeatConfig,
    interval: Interval,
    last_seen: Instant,
    awaiting_pong: bool,
}

impl Keepalive {
    /// Start the clock. The first tick fires one interval from now.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        let period = config.ping_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            config,
            interval,
            last_seen: Instant::now(),
            awaiting_pong: false,
        }
    }

    /// Record inbound traffic of any kind.
    pub fn record_activity(&mut self) {
        self.last_seen = Instant::now();
        self.awaiting_pong = false;
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub const fn is_awaiting_pong(&self) -> bool {
        self.awaiting_pong
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn silence(&self) -> Duration {
        self.last_seen.elapsed()
    }

    /// Wait for the next tick. Cancel safe.
    pub async fn tick(&mut self) -> KeepaliveAction {
        self.interval.tick().await;

        let silence = self.silence();
        if self.awaiting_pong && silence > self.config.pong_timeout {
            tracing::warn!(
                silence_ms = u64::try_from(silence.as_millis()).unwrap_or(u64::MAX),
                timeout_ms = u64::try_from(self.config.pong_timeout.as_millis()).unwrap_or(u64::MAX),
                "Heartbeat timeout detected"
            );
            return KeepaliveAction::Expired(silence);
        }

        self.awaiting_pong = true;
        KeepaliveAction::Ping
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keepalive(interval_ms: u64, timeout_ms: u64) -> Keepalive {
        Keepalive::new(HeartbeatConfig::new(
            Duration::from_millis(interval_ms),
            Duration::from_millis(timeout_ms),
        ))
    }

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(20));
        assert_eq!(config.pong_timeout, Duration::from_secs(20));
    }

    #[test]
    fn config_from_settings() {
        let settings = WebSocketSettings {
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(7),
        };
        let config = HeartbeatConfig::from_websocket_settings(&settings);
        assert_eq!(config.ping_interval, Duration::from_secs(5));
        assert_eq!(config.pong_timeout, Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_pings() {
        let mut keepalive = keepalive(50, 100);
        assert_eq!(keepalive.tick().await, KeepaliveAction::Ping);
        assert!(keepalive.is_awaiting_pong());
    }

    #[tokio::test(start_paused = true)]
    async fn activity_clears_outstanding_ping() {
        let mut keepalive = keepalive(50, 60);
        keepalive.tick().await;
        keepalive.record_activity();
        assert!(!keepalive.is_awaiting_pong());

        // Answered in time, so the next tick pings again
        assert_eq!(keepalive.tick().await, KeepaliveAction::Ping);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_after_ping_expires() {
        let mut keepalive = keepalive(50, 60);
        assert_eq!(keepalive.tick().await, KeepaliveAction::Ping);

        match keepalive.tick().await {
            KeepaliveAction::Expired(silence) => assert!(silence > Duration::from_millis(60)),
            KeepaliveAction::Ping => panic!("expected expiry"),
        }
    }
}

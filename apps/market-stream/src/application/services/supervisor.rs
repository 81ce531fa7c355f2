//! Reconnection Supervisor
//!
//! One task per live exchange session. Waits for the session to be lost,
//! then drives the backoff/reconnect/replay cycle:
//!
//! ```text
//! Connected --(transient loss)--> Reconnecting(1)
//! Reconnecting(n) --(open ok)--> Connected, replay
//! Reconnecting(n) --(open fails, n < max_retries)--> Reconnecting(n+1)
//! Reconnecting(n) --(n >= max_retries)--> Failed (ExhaustedRetries)
//! any --(fatal error)--> Failed
//! ```
//!
//! Backoff sleeps only suspend this task, so other exchanges are unaffected.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::runtime::ExchangeRuntime;
use crate::application::ports::SessionMonitor;
use crate::domain::error::StreamError;
use crate::infrastructure::metrics;

/// Supervises the sessions of one exchange.
pub(crate) struct ReconnectionSupervisor {
    runtime: Arc<ExchangeRuntime>,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
}

impl ReconnectionSupervisor {
    pub(crate) const fn new(
        runtime: Arc<ExchangeRuntime>,
        config: ReconnectConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runtime,
            policy: ReconnectPolicy::new(config),
            cancel,
        }
    }

    /// Supervise `monitor` and every session that replaces it, until the
    /// connection fails for good or the supervisor is cancelled.
    pub(crate) async fn run(mut self, mut monitor: SessionMonitor) {
        loop {
            let cause = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                cause = monitor.lost() => cause,
            };
            // A local close resolves the monitor too
            if self.cancel.is_cancelled() {
                return;
            }

            let exchange = self.runtime.exchange_id().to_string();
            warn!(
                exchange = %exchange,
                session = %monitor.session_id(),
                error = %cause,
                "Session lost"
            );

            if !cause.is_transient() {
                self.fail(&cause).await;
                return;
            }
            self.runtime.record_error(&cause);

            match self.reconnect().await {
                Some(next) => monitor = next,
                None => return,
            }
        }
    }

    /// Backoff and reopen until a session is live. `None` means the
    /// supervisor is done, either cancelled or failed.
    async fn reconnect(&mut self) -> Option<SessionMonitor> {
        let exchange = self.runtime.exchange_id().to_string();
        self.policy.reset();

        loop {
            let Some(delay) = self.policy.next_delay() else {
                let exhausted = StreamError::ExhaustedRetries {
                    attempts: self.policy.attempt_count(),
                };
                warn!(exchange = %exchange, error = %exhausted, "Giving up on reconnection");
                self.fail(&exhausted).await;
                return None;
            };

            let attempt = self.policy.attempt_count();
            // Status flips to Reconnecting before the watchers are torn down
            self.runtime.mark_reconnecting(attempt);
            self.runtime.stop_all_watchers();
            metrics::record_reconnect(&exchange);

            #[allow(clippy::cast_possible_truncation)]
            let delay_ms = delay.as_millis() as u64;
            info!(exchange = %exchange, attempt, delay_ms, "Reconnecting after backoff");

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }

            let opened = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                opened = self.runtime.open_session() => opened,
            };

            match opened {
                Ok(monitor) => {
                    if !self.runtime.mark_connected(monitor.session_id()) {
                        return None;
                    }
                    info!(
                        exchange = %exchange,
                        attempt,
                        session = %monitor.session_id(),
                        "Reconnected"
                    );
                    self.runtime.replay().await;
                    return Some(monitor);
                }
                Err(err) if err.is_transient() => {
                    warn!(exchange = %exchange, attempt, error = %err, "Reconnection attempt failed");
                    self.runtime.record_error(&err);
                }
                Err(err) => {
                    warn!(exchange = %exchange, attempt, error = %err, "Fatal error while reconnecting");
                    self.fail(&err).await;
                    return None;
                }
            }
        }
    }

    async fn fail(&self, error: &StreamError) {
        self.runtime.stop_all_watchers();
        self.runtime.mark_failed(error);
        self.runtime.close_connector().await;
    }
}

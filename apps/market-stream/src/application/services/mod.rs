//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `ConnectionManager`: Connections, subscriptions and lifecycle per exchange
//! - `ChannelWatcher`: Drains one subscription's raw stream into consumers
//! - `ReconnectPolicy`: Exponential backoff with a bounded retry budget
//! - `ReconnectionSupervisor`: Backoff, reopen and replay after a lost session

pub mod manager;
pub mod reconnect;
pub(crate) mod runtime;
pub(crate) mod supervisor;
pub mod watcher;

pub use manager::{ConnectionHandle, ConnectionManager, ManagerConfig};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use watcher::{ChannelWatcher, WatcherExit};

//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with exchanges and consumers.

/// Port interfaces for exchange connectors and event sinks.
pub mod ports;

/// Connection management, watchers and reconnection.
pub mod services;

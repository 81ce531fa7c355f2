//! Domain Layer - Core streaming types and business logic.
//!
//! This layer contains the core domain types for market data streaming
//! with no I/O. Everything here is plain data plus the pure logic that
//! operates on it: subscription bookkeeping, connection lifecycle records
//! and message normalization.

/// Connection lifecycle records and events.
pub mod connection;

/// Error taxonomy shared by every layer.
pub mod error;

/// Market data event types and normalization.
pub mod streaming;

/// Subscription types and the desired-subscription registry.
pub mod subscription;

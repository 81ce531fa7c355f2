//! Configuration Module
//!
//! Configuration loading for the streaming core and its daemon.

mod settings;

pub use settings::{
    ConfigError, ConnectionSettings, Credentials, ServerSettings, StreamConfig, WebSocketSettings,
};

//! Configuration Module
//!
//! Environment-driven configuration for the stream client and its binary.

mod settings;

pub use settings::{
    ClientConfig, ConfigError, FeedSettings, HeartbeatSettings, ReconnectSettings,
    StreamSettings,
};

//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Binance venue adapter (commands, stream names, normalization).
pub mod binance;

/// In-memory market directory.
pub mod directory;

/// WebSocket connection supervisor, writer, heartbeat and backoff.
pub mod websocket;

/// Environment-driven configuration.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and optional OpenTelemetry export.
pub mod telemetry;

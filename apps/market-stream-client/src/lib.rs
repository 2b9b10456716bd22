#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation
    )
)]

//! Market Stream Client - Resilient Venue Feed Consumer
//!
//! Maintains one long-lived WebSocket connection to a venue's public market
//! data feed and serves many consumers over it. Identical feed requests
//! share a single venue subscription; every inbound frame is normalized once
//! and the same update is delivered to each matching consumer.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Canonical types and subscription tracking
//!   - `streaming`: Tickers, trades, order books, reset notices
//!   - `subscription`: Feed kinds, parameters, registry, observers
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Venue adapter and market directory interfaces
//!   - `services`: Frame dispatch and fan-out
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `binance`: Venue adapter for Binance public streams
//!   - `directory`: In-memory symbol directory
//!   - `websocket`: Connection supervisor, writer, heartbeat, backoff
//!   - `config`: Environment-driven configuration
//!   - `metrics` / `telemetry`: Prometheus and tracing
//!
//! # Data Flow
//!
//! ```text
//!                ┌──────────────┐    ┌────────────┐    ┌──────────────┐
//! Venue WS ─────►│ StreamClient │───►│ Dispatcher │───►│   Registry   │──► Observer 1
//!          ◄─────│ (one socket) │    │ parse once │    │ stream match │──► Observer 2
//!  SUBSCRIBE     └──────────────┘    └────────────┘    └──────────────┘──► Observer N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Canonical market data with no I/O.
pub mod domain;

/// Application layer - Ports and dispatch.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{MarketUpdate, OrderBook, PriceLevel, Side, Ticker, Trade};
pub use domain::subscription::{
    ChannelObserver, ConsumerId, FeedKind, FeedParams, MarketObserver, RegistryError,
    Subscription, SubscriptionId, SubscriptionRegistry, SubscriptionStats,
};

// Ports
pub use application::ports::{
    DirectoryError, InboundFrame, MarketDirectory, OutboundFrame, VenueAdapter, VenueError,
};
pub use application::services::Dispatcher;

// Venue adapter
pub use infrastructure::binance::{BinanceAdapter, MarketSegment};
pub use infrastructure::directory::{InMemoryMarketDirectory, MarketEntry};

// Stream client
pub use infrastructure::websocket::{
    ConnectionState, ReconnectConfig, StreamClient, StreamClientConfig, StreamClientError,
};

// Infrastructure config
pub use infrastructure::config::{ClientConfig, ConfigError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};

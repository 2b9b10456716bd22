//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `VenueAdapter`: Capability interface of one venue (stream names,
//!   commands, frame decoding, parsers, liveness probe)
//! - `MarketDirectory`: External symbol ↔ native identifier service
//!
//! The connection supervisor and the dispatcher depend only on these traits.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::streaming::MarketUpdate;
use crate::domain::subscription::{FeedKind, FeedParams};

// =============================================================================
// Market Directory Port
// =============================================================================

/// Market directory errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// The directory could not be loaded.
    #[error("market directory unavailable: {0}")]
    Unavailable(String),

    /// A directory entry is malformed.
    #[error("invalid market entry: {0}")]
    InvalidEntry(String),
}

/// Read-only mapping between human-readable symbols and venue identifiers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDirectory: Send + Sync {
    /// Load or refresh the directory. Called before every connection attempt.
    async fn load(&self) -> Result<(), DirectoryError>;

    /// Native venue identifier for a human-readable symbol (`BTC/USDT` → `BTCUSDT`).
    fn native_id(&self, symbol: &str) -> Option<String>;

    /// Human-readable symbol for a native venue identifier.
    fn symbol_for(&self, native_id: &str) -> Option<String>;
}

// =============================================================================
// Frames
// =============================================================================

/// Frame queued for the connection writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// JSON text command.
    Text(String),
    /// Protocol-level ping with payload.
    Ping(Vec<u8>),
    /// Protocol-level pong echoing a ping payload.
    Pong(Vec<u8>),
}

impl OutboundFrame {
    /// Short label used for logging.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
        }
    }
}

/// A decoded inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Venue-level liveness ping; `reply` must be sent back.
    Ping {
        /// Pong answering the ping.
        reply: OutboundFrame,
    },
    /// Acknowledgement of a client command.
    Ack {
        /// Request id being acknowledged.
        id: Option<u64>,
    },
    /// Market data inside the stream envelope.
    Data {
        /// Stream identifier announced by the frame.
        stream: String,
        /// Venue payload.
        data: Value,
    },
    /// Anything else (missing envelope, unknown event).
    Unrecognized(Value),
}

// =============================================================================
// Request IDs
// =============================================================================

/// Strictly increasing client-side request id generator.
#[derive(Debug)]
pub struct RequestIds {
    next: AtomicU64,
}

impl RequestIds {
    /// Generator starting at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Take the next id.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Venue Adapter Port
// =============================================================================

/// Venue adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum VenueError {
    /// The venue has no handler for this feed kind.
    #[error("feed kind not supported by venue: {0}")]
    UnsupportedFeed(FeedKind),

    /// A stream template needs a parameter the request did not carry.
    #[error("missing parameter '{param}' for stream template '{template}'")]
    MissingParameter {
        /// Missing parameter name.
        param: String,
        /// Template being expanded.
        template: &'static str,
    },

    /// The directory has no native id for a symbol.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// A payload referenced a market that cannot be mapped back to a symbol.
    #[error("unknown market: {0}")]
    UnknownMarket(String),

    /// The payload does not have the expected shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Inbound JSON could not be decoded.
    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// Outbound command could not be encoded.
    #[error("command encode error: {0}")]
    Encode(#[source] serde_json::Error),

    /// The market directory failed.
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Capability interface of one venue.
///
/// Stream builders and parsers are selected per [`FeedKind`]; an adapter
/// that cannot serve a kind reports it through [`supports`](Self::supports)
/// and returns [`VenueError::UnsupportedFeed`] from the per-kind operations.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Venue name for logging.
    fn name(&self) -> &'static str;

    /// WebSocket endpoint of the selected market segment.
    fn endpoint(&self) -> &str;

    /// Whether the venue can serve `kind`.
    fn supports(&self, kind: FeedKind) -> bool;

    /// Work done before every connection attempt (directory load).
    async fn prepare(&self) -> Result<(), VenueError>;

    /// Connection-scope setup commands, sent once per new connection.
    fn setup_commands(&self, ids: &RequestIds) -> Result<Vec<OutboundFrame>, VenueError>;

    /// Subscribe command for one stream.
    fn subscribe_command(&self, stream: &str, id: u64) -> Result<OutboundFrame, VenueError>;

    /// Unsubscribe command for one stream.
    fn unsubscribe_command(&self, stream: &str, id: u64) -> Result<OutboundFrame, VenueError>;

    /// Wire stream name for a feed request.
    fn resolve_stream(&self, kind: FeedKind, params: &FeedParams) -> Result<String, VenueError>;

    /// Decode one inbound text frame.
    fn decode_frame(&self, text: &str) -> Result<InboundFrame, VenueError>;

    /// Normalize a payload into its canonical form.
    fn parse_frame(
        &self,
        kind: FeedKind,
        payload: &Value,
        params: &FeedParams,
    ) -> Result<MarketUpdate, VenueError>;

    /// Liveness probe, if the venue has one.
    fn heartbeat_frame(&self) -> Option<OutboundFrame>;
}

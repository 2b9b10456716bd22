//! Binance WebSocket Adapter
//!
//! The representative venue adapter for public market data:
//!
//! - **Ticker**: all-market 24h rolling tickers (`!ticker@arr`)
//! - **Trade**: aggregated trades (`{symbol}@aggTrade`)
//! - **Order Book**: partial depth (`{symbol}@depth{levels}@100ms`)
//!
//! Connections run in combined-stream mode so every data frame arrives in a
//! `{"stream": ..., "data": ...}` envelope.

pub mod adapter;
pub mod messages;
pub mod parser;
pub mod streams;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use adapter::BinanceAdapter;
pub use messages::{Command, CommandMethod};
pub use streams::{FeedHandler, FeedTable};

/// Spot market data endpoint.
pub const SPOT_URL: &str = "wss://stream.binance.com:9443/ws/stream";

/// USDⓈ-margined (linear) futures endpoint.
pub const LINEAR_FUTURES_URL: &str = "wss://fstream.binance.com/ws/stream";

/// Coin-margined (inverse) futures endpoint.
pub const INVERSE_FUTURES_URL: &str = "wss://dstream.binance.com/ws/stream";

/// Binance market segment, selecting the WebSocket endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketSegment {
    /// Spot markets.
    #[default]
    #[serde(rename = "spot")]
    Spot,
    /// USDⓈ-margined futures.
    #[serde(rename = "future_u")]
    LinearFutures,
    /// Coin-margined futures.
    #[serde(rename = "future_base")]
    InverseFutures,
}

impl MarketSegment {
    /// WebSocket endpoint for this segment.
    #[must_use]
    pub const fn url(&self) -> &'static str {
        match self {
            Self::Spot => SPOT_URL,
            Self::LinearFutures => LINEAR_FUTURES_URL,
            Self::InverseFutures => INVERSE_FUTURES_URL,
        }
    }

    /// Configuration name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::LinearFutures => "future_u",
            Self::InverseFutures => "future_base",
        }
    }
}

impl fmt::Display for MarketSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketSegment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spot" => Ok(Self::Spot),
            "future_u" | "usdm" | "linear" => Ok(Self::LinearFutures),
            "future_base" | "coinm" | "inverse" => Ok(Self::InverseFutures),
            other => Err(format!("unknown market segment: {other}")),
        }
    }
}

//! Canonical Market Data Types
//!
//! Venue-independent representation of market events. Every venue adapter
//! normalizes its wire payloads into one of these shapes before they reach
//! consumers. Values are constructed per inbound frame and never retained
//! by the client.
//!
//! Prices and sizes are exact decimals (`rust_decimal`), so derived values
//! such as trade cost carry no floating-point rounding drift. Fields the
//! venue did not send are `None` rather than a sentinel.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Side
// =============================================================================

/// Aggressor side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buyer was the taker.
    Buy,
    /// Seller was the taker.
    Sell,
}

impl Side {
    /// Side observed when the flagged party was the passive (maker) side.
    ///
    /// A "buyer is maker" flag means the seller crossed the spread, so the
    /// trade prints as a sell.
    #[must_use]
    pub const fn from_buyer_maker(buyer_is_maker: bool) -> Self {
        if buyer_is_maker { Self::Sell } else { Self::Buy }
    }

    /// Parse a side string case-insensitively.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "buy" => Some(Self::Buy),
            "sell" => Some(Self::Sell),
            _ => None,
        }
    }

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

// =============================================================================
// Ticker
// =============================================================================

/// Rolling-window statistics for one market.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    /// Human-readable symbol (e.g. `BTC/USDT`).
    pub symbol: String,
    /// Statistics close time (Unix ms).
    pub timestamp: Option<i64>,
    /// `timestamp` as a UTC datetime.
    pub datetime: Option<DateTime<Utc>>,
    /// Highest price in the window.
    pub high: Option<Decimal>,
    /// Lowest price in the window.
    pub low: Option<Decimal>,
    /// Best bid price.
    pub bid: Option<Decimal>,
    /// Size at the best bid.
    pub bid_volume: Option<Decimal>,
    /// Best ask price.
    pub ask: Option<Decimal>,
    /// Size at the best ask.
    pub ask_volume: Option<Decimal>,
    /// Volume-weighted average price.
    pub vwap: Option<Decimal>,
    /// Open price of the window.
    pub open: Option<Decimal>,
    /// Close price (same as `last`).
    pub close: Option<Decimal>,
    /// Last traded price.
    pub last: Option<Decimal>,
    /// Close of the previous window.
    pub previous_close: Option<Decimal>,
    /// Absolute price change over the window.
    pub change: Option<Decimal>,
    /// Percentage price change over the window.
    pub percentage: Option<Decimal>,
    /// Average of open and last.
    pub average: Option<Decimal>,
    /// Volume in base currency.
    pub base_volume: Option<Decimal>,
    /// Volume in quote currency.
    pub quote_volume: Option<Decimal>,
}

// =============================================================================
// Trade
// =============================================================================

/// A single public trade print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Venue trade identifier.
    pub id: Option<String>,
    /// Trade time (Unix ms).
    pub timestamp: Option<i64>,
    /// `timestamp` as a UTC datetime.
    pub datetime: Option<DateTime<Utc>>,
    /// Human-readable symbol.
    pub symbol: String,
    /// Aggressor side, if the venue exposes it.
    pub side: Option<Side>,
    /// Execution price.
    pub price: Option<Decimal>,
    /// Executed quantity in base currency.
    pub amount: Option<Decimal>,
    /// `price * amount`, computed exactly.
    pub cost: Option<Decimal>,
}

// =============================================================================
// Order Book
// =============================================================================

/// One price level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Level price.
    pub price: Decimal,
    /// Resting size at the level.
    pub size: Decimal,
}

impl PriceLevel {
    /// Create a new price level.
    #[must_use]
    pub const fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Order book snapshot or delta.
///
/// Bids are ordered best (highest) first, asks best (lowest) first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBook {
    /// Human-readable symbol.
    pub symbol: String,
    /// Book time (Unix ms).
    pub timestamp: i64,
    /// `timestamp` as a UTC datetime.
    pub datetime: Option<DateTime<Utc>>,
    /// Bid levels, descending by price.
    pub bids: Vec<PriceLevel>,
    /// Ask levels, ascending by price.
    pub asks: Vec<PriceLevel>,
    /// Venue sequence number; consumers compare successive values to detect gaps.
    pub nonce: Option<u64>,
}

impl OrderBook {
    /// Best bid level.
    #[must_use]
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Best ask level.
    #[must_use]
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }
}

// =============================================================================
// Market Update
// =============================================================================

/// A canonical update delivered to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketUpdate {
    /// Empty payload broadcast after a connection failure.
    ///
    /// Consumers must discard anything cached from the feed: a gap occurred.
    Reset,
    /// Tickers carried by one frame, keyed by symbol.
    Tickers {
        /// Tickers by human-readable symbol.
        tickers: BTreeMap<String, Ticker>,
    },
    /// A trade print.
    Trade(Trade),
    /// An order book snapshot or delta.
    OrderBook(OrderBook),
}

impl MarketUpdate {
    /// Whether this is the reset (cache wipe) signal.
    #[must_use]
    pub const fn is_reset(&self) -> bool {
        matches!(self, Self::Reset)
    }

    /// Ticker for `symbol`, if this update carries tickers.
    #[must_use]
    pub fn ticker(&self, symbol: &str) -> Option<&Ticker> {
        match self {
            Self::Tickers { tickers } => tickers.get(symbol),
            _ => None,
        }
    }

    /// Trade payload, if any.
    #[must_use]
    pub const fn as_trade(&self) -> Option<&Trade> {
        match self {
            Self::Trade(trade) => Some(trade),
            _ => None,
        }
    }

    /// Order book payload, if any.
    #[must_use]
    pub const fn as_order_book(&self) -> Option<&OrderBook> {
        match self {
            Self::OrderBook(book) => Some(book),
            _ => None,
        }
    }

    /// Short label used for logging and metrics.
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::Reset => "reset",
            Self::Tickers { .. } => "ticker",
            Self::Trade(_) => "trade",
            Self::OrderBook(_) => "order_book",
        }
    }
}

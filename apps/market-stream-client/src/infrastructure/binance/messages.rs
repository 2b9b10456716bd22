//! Binance WebSocket Message Types
//!
//! Wire format types for the public market data streams. Scalar payload
//! fields are lenient: each is optional and accepts either JSON strings or
//! numbers (flags also accept `"true"`/`"false"`), so a missing or odd value
//! becomes `None` instead of a decode failure. Depth level lists must still
//! be arrays; their entries are checked by the parser.
//!
//! # References
//!
//! - [Spot WebSocket Streams](https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams)
//! - [USDⓈ-M Futures Streams](https://developers.binance.com/docs/derivatives/usds-margined-futures/websocket-market-streams)

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// =============================================================================
// Commands
// =============================================================================

/// Command method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandMethod {
    /// Subscribe to streams.
    Subscribe,
    /// Unsubscribe from streams.
    Unsubscribe,
    /// Set a connection property.
    SetProperty,
}

/// Outbound command.
///
/// # Wire Format (JSON)
/// ```json
/// {"method": "SUBSCRIBE", "params": ["btcusdt@aggTrade"], "id": 1}
/// {"method": "SET_PROPERTY", "params": ["combined", true], "id": 2}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Command method.
    pub method: CommandMethod,
    /// Method parameters.
    pub params: Vec<Value>,
    /// Client request id.
    pub id: u64,
}

impl Command {
    /// Subscribe to one stream.
    #[must_use]
    pub fn subscribe(stream: &str, id: u64) -> Self {
        Self {
            method: CommandMethod::Subscribe,
            params: vec![Value::String(stream.to_string())],
            id,
        }
    }

    /// Unsubscribe from one stream.
    #[must_use]
    pub fn unsubscribe(stream: &str, id: u64) -> Self {
        Self {
            method: CommandMethod::Unsubscribe,
            params: vec![Value::String(stream.to_string())],
            id,
        }
    }

    /// Enable combined-stream mode (payloads wrapped in a stream envelope).
    #[must_use]
    pub fn enable_combined(id: u64) -> Self {
        Self {
            method: CommandMethod::SetProperty,
            params: vec![Value::String("combined".to_string()), Value::Bool(true)],
            id,
        }
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// 24h rolling window ticker.
///
/// # Wire Format (JSON)
/// ```json
/// {"e": "24hrTicker", "E": 123456789, "s": "BNBBTC", "p": "0.0015", "P": "250.00",
///  "w": "0.0018", "x": "0.0009", "c": "0.0025", "b": "0.0024", "B": "10",
///  "a": "0.0026", "A": "100", "o": "0.0010", "h": "0.0025", "l": "0.0010",
///  "v": "10000", "q": "18", "C": 86400000}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TickerPayload {
    /// Market id.
    #[serde(rename = "s", default, deserialize_with = "lenient_string")]
    pub market_id: Option<String>,
    /// Statistics close time (ms).
    #[serde(rename = "C", default, deserialize_with = "lenient_i64")]
    pub close_time: Option<i64>,
    /// Last price.
    #[serde(rename = "c", default, deserialize_with = "lenient_decimal")]
    pub last: Option<Decimal>,
    /// High price.
    #[serde(rename = "h", default, deserialize_with = "lenient_decimal")]
    pub high: Option<Decimal>,
    /// Low price.
    #[serde(rename = "l", default, deserialize_with = "lenient_decimal")]
    pub low: Option<Decimal>,
    /// Best bid price.
    #[serde(rename = "b", default, deserialize_with = "lenient_decimal")]
    pub bid: Option<Decimal>,
    /// Best bid quantity.
    #[serde(rename = "B", default, deserialize_with = "lenient_decimal")]
    pub bid_qty: Option<Decimal>,
    /// Best ask price.
    #[serde(rename = "a", default, deserialize_with = "lenient_decimal")]
    pub ask: Option<Decimal>,
    /// Best ask quantity.
    #[serde(rename = "A", default, deserialize_with = "lenient_decimal")]
    pub ask_qty: Option<Decimal>,
    /// Weighted average price.
    #[serde(rename = "w", default, deserialize_with = "lenient_decimal")]
    pub weighted_avg: Option<Decimal>,
    /// Open price.
    #[serde(rename = "o", default, deserialize_with = "lenient_decimal")]
    pub open: Option<Decimal>,
    /// Last price before the window opened.
    #[serde(rename = "x", default, deserialize_with = "lenient_decimal")]
    pub previous_close: Option<Decimal>,
    /// Price change.
    #[serde(rename = "p", default, deserialize_with = "lenient_decimal")]
    pub change: Option<Decimal>,
    /// Price change percent.
    #[serde(rename = "P", default, deserialize_with = "lenient_decimal")]
    pub change_percent: Option<Decimal>,
    /// Base asset volume.
    #[serde(rename = "v", default, deserialize_with = "lenient_decimal")]
    pub base_volume: Option<Decimal>,
    /// Quote asset volume.
    #[serde(rename = "q", default, deserialize_with = "lenient_decimal")]
    pub quote_volume: Option<Decimal>,
}

/// Aggregated trade.
///
/// # Wire Format (JSON)
/// ```json
/// {"e": "aggTrade", "E": 123456789, "s": "BNBBTC", "a": 12345, "p": "0.001",
///  "q": "100", "f": 100, "l": 105, "T": 123456785, "m": true, "M": true}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AggTradePayload {
    /// Market id.
    #[serde(rename = "s", default, deserialize_with = "lenient_string")]
    pub market_id: Option<String>,
    /// Aggregate trade id.
    #[serde(rename = "a", default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    /// Price.
    #[serde(rename = "p", default, deserialize_with = "lenient_decimal")]
    pub price: Option<Decimal>,
    /// Quantity.
    #[serde(rename = "q", default, deserialize_with = "lenient_decimal")]
    pub quantity: Option<Decimal>,
    /// Trade time (ms).
    #[serde(rename = "T", default, deserialize_with = "lenient_i64")]
    pub trade_time: Option<i64>,
    /// Buyer was the maker.
    #[serde(rename = "m", default, deserialize_with = "lenient_bool")]
    pub buyer_is_maker: Option<bool>,
    /// Buyer was the maker (REST-style key).
    #[serde(rename = "isBuyerMaker", default, deserialize_with = "lenient_bool")]
    pub is_buyer_maker: Option<bool>,
    /// Explicit side.
    #[serde(default, deserialize_with = "lenient_string")]
    pub side: Option<String>,
    /// Account was the buyer.
    #[serde(rename = "isBuyer", default, deserialize_with = "lenient_bool")]
    pub is_buyer: Option<bool>,
}

/// Partial book depth.
///
/// # Wire Format (JSON)
/// ```json
/// {"lastUpdateId": 160, "bids": [["0.0024", "10"]], "asks": [["0.0026", "100"]]}
/// {"e": "depthUpdate", "E": 123456789, "T": 123456788, "s": "BTCUSDT",
///  "U": 157, "u": 160, "pu": 149, "b": [["0.0024", "10"]], "a": [["0.0026", "100"]]}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DepthPayload {
    /// Market id (futures only).
    #[serde(rename = "s", default, deserialize_with = "lenient_string")]
    pub market_id: Option<String>,
    /// Last update id (spot).
    #[serde(rename = "lastUpdateId", default, deserialize_with = "lenient_u64")]
    pub last_update_id: Option<u64>,
    /// Final update id (futures).
    #[serde(rename = "u", default, deserialize_with = "lenient_u64")]
    pub final_update_id: Option<u64>,
    /// Transaction time (futures).
    #[serde(rename = "T", default, deserialize_with = "lenient_i64")]
    pub transaction_time: Option<i64>,
    /// Event time (futures).
    #[serde(rename = "E", default, deserialize_with = "lenient_i64")]
    pub event_time: Option<i64>,
    /// Bid levels as `[price, size]`.
    #[serde(default, alias = "b")]
    pub bids: Vec<Vec<Value>>,
    /// Ask levels as `[price, size]`.
    #[serde(default, alias = "a")]
    pub asks: Vec<Vec<Value>>,
}

impl DepthPayload {
    /// Sequence number regardless of segment.
    #[must_use]
    pub const fn nonce(&self) -> Option<u64> {
        match self.last_update_id {
            Some(id) => Some(id),
            None => self.final_update_id,
        }
    }
}

// =============================================================================
// Lenient Field Decoding
// =============================================================================

/// Exact decimal from a JSON string or number.
#[must_use]
pub fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => parse_decimal(s),
        Value::Number(n) => parse_decimal(&n.to_string()),
        _ => None,
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

fn lenient_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(decimal_from_value))
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    })
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        Some(Value::Number(n)) => match n.as_u64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        _ => None,
    })
}

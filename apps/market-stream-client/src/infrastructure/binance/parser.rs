//! Payload Normalization
//!
//! Converts Binance payloads into canonical market updates. Native market
//! ids are mapped back to human-readable symbols through the market
//! directory.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use super::messages::{AggTradePayload, DepthPayload, TickerPayload, decimal_from_value};
use crate::application::ports::{MarketDirectory, VenueError};
use crate::domain::streaming::{MarketUpdate, OrderBook, PriceLevel, Side, Ticker, Trade};
use crate::domain::subscription::FeedParams;

// =============================================================================
// Tickers
// =============================================================================

/// Parse a ticker payload (array or single object) into a symbol-keyed set.
///
/// Entries without a market id are skipped. Ids the directory does not know
/// keep the raw id as their symbol.
///
/// # Errors
///
/// Returns [`VenueError::InvalidPayload`] when the payload is neither an
/// array nor an object.
pub fn parse_tickers(
    payload: &Value,
    _params: &FeedParams,
    directory: &dyn MarketDirectory,
) -> Result<MarketUpdate, VenueError> {
    let items: Vec<&Value> = match payload {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![payload],
        other => {
            return Err(VenueError::InvalidPayload(format!(
                "ticker payload must be an array or object, got {other}"
            )));
        }
    };

    let mut tickers = BTreeMap::new();
    for item in items {
        let raw = TickerPayload::deserialize(item)?;
        if let Some(ticker) = normalize_ticker(raw, directory) {
            tickers.insert(ticker.symbol.clone(), ticker);
        }
    }

    Ok(MarketUpdate::Tickers { tickers })
}

fn normalize_ticker(raw: TickerPayload, directory: &dyn MarketDirectory) -> Option<Ticker> {
    let market_id = raw.market_id?;
    let symbol = directory.symbol_for(&market_id).unwrap_or(market_id);

    let average = match (raw.open, raw.last) {
        (Some(open), Some(last)) => open
            .checked_add(last)
            .and_then(|sum| sum.checked_div(Decimal::TWO)),
        _ => None,
    };

    Some(Ticker {
        symbol,
        timestamp: raw.close_time,
        datetime: raw.close_time.and_then(DateTime::from_timestamp_millis),
        high: raw.high,
        low: raw.low,
        bid: raw.bid,
        bid_volume: raw.bid_qty,
        ask: raw.ask,
        ask_volume: raw.ask_qty,
        vwap: raw.weighted_avg,
        open: raw.open,
        close: raw.last,
        last: raw.last,
        previous_close: raw.previous_close,
        change: raw.change,
        percentage: raw.change_percent,
        average,
        base_volume: raw.base_volume,
        quote_volume: raw.quote_volume,
    })
}

// =============================================================================
// Trades
// =============================================================================

/// Parse an aggregated trade.
///
/// # Errors
///
/// Returns [`VenueError::UnknownMarket`] when neither the payload's market id
/// nor the feed parameters yield a symbol.
pub fn parse_trade(
    payload: &Value,
    params: &FeedParams,
    directory: &dyn MarketDirectory,
) -> Result<MarketUpdate, VenueError> {
    let raw = AggTradePayload::deserialize(payload)?;
    let symbol = resolve_symbol(raw.market_id.as_deref(), params, directory, true)?;
    let side = trade_side(&raw);

    let cost = match (raw.price, raw.quantity) {
        (Some(price), Some(amount)) => price.checked_mul(amount),
        _ => None,
    };

    Ok(MarketUpdate::Trade(Trade {
        id: raw.id,
        timestamp: raw.trade_time,
        datetime: raw.trade_time.and_then(DateTime::from_timestamp_millis),
        symbol,
        side,
        price: raw.price,
        amount: raw.quantity,
        cost,
    }))
}

/// Observable side from the first flag present: `m`, `isBuyerMaker`, `side`, `isBuyer`.
fn trade_side(raw: &AggTradePayload) -> Option<Side> {
    if let Some(buyer_is_maker) = raw.buyer_is_maker.or(raw.is_buyer_maker) {
        return Some(Side::from_buyer_maker(buyer_is_maker));
    }
    if let Some(side) = raw.side.as_deref() {
        return Side::parse(side);
    }
    raw.is_buyer
        .map(|is_buyer| if is_buyer { Side::Buy } else { Side::Sell })
}

// =============================================================================
// Order Book
// =============================================================================

/// Parse a partial depth payload.
///
/// # Errors
///
/// Returns [`VenueError::InvalidPayload`] for a malformed level and
/// [`VenueError::UnknownMarket`] when no symbol can be determined.
pub fn parse_order_book(
    payload: &Value,
    params: &FeedParams,
    directory: &dyn MarketDirectory,
) -> Result<MarketUpdate, VenueError> {
    let raw = DepthPayload::deserialize(payload)?;
    let symbol = resolve_symbol(raw.market_id.as_deref(), params, directory, false)?;

    let timestamp = raw
        .transaction_time
        .or(raw.event_time)
        .unwrap_or_else(|| Utc::now().timestamp_millis());

    let mut bids = parse_levels(&raw.bids)?;
    let mut asks = parse_levels(&raw.asks)?;
    bids.sort_by(|a, b| b.price.cmp(&a.price));
    asks.sort_by(|a, b| a.price.cmp(&b.price));

    Ok(MarketUpdate::OrderBook(OrderBook {
        symbol,
        timestamp,
        datetime: DateTime::from_timestamp_millis(timestamp),
        bids,
        asks,
        nonce: raw.nonce(),
    }))
}

fn parse_levels(levels: &[Vec<Value>]) -> Result<Vec<PriceLevel>, VenueError> {
    levels
        .iter()
        .map(|level| {
            let price = level.first().and_then(decimal_from_value);
            let size = level.get(1).and_then(decimal_from_value);
            match (price, size) {
                (Some(price), Some(size)) => Ok(PriceLevel::new(price, size)),
                _ => Err(VenueError::InvalidPayload(format!(
                    "malformed book level: {level:?}"
                ))),
            }
        })
        .collect()
}

// =============================================================================
// Symbols
// =============================================================================

/// Human-readable symbol for a payload.
///
/// With `prefer_payload` the market id carried by the payload wins over the
/// subscription's symbol parameter; otherwise the parameter wins.
fn resolve_symbol(
    market_id: Option<&str>,
    params: &FeedParams,
    directory: &dyn MarketDirectory,
    prefer_payload: bool,
) -> Result<String, VenueError> {
    let from_payload = || market_id.and_then(|id| directory.symbol_for(id));
    let from_params = || params.symbol_param().map(str::to_owned);

    let symbol = if prefer_payload {
        from_payload().or_else(from_params)
    } else {
        from_params().or_else(from_payload)
    };

    symbol.ok_or_else(|| {
        VenueError::UnknownMarket(market_id.unwrap_or("<missing>").to_string())
    })
}

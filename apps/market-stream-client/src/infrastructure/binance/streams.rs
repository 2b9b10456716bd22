//! Stream Names and Feed Table
//!
//! Stream builders are pure template expansions over the feed parameters.
//! The feed table maps each [`FeedKind`] to its builder and parser; it is
//! fixed when the adapter is constructed.

use serde_json::Value;

use super::parser;
use crate::application::ports::{MarketDirectory, VenueError};
use crate::domain::streaming::MarketUpdate;
use crate::domain::subscription::{FeedKind, FeedParams};

/// Aggregated trade stream template.
pub const TRADE_TEMPLATE: &str = "{symbol}@aggTrade";

/// Partial depth stream template.
pub const ORDER_BOOK_TEMPLATE: &str = "{symbol}@depth{levels}@100ms";

/// All-market ticker array stream.
pub const TICKERS_STREAM: &str = "!ticker@arr";

/// Builds a wire stream name from (already native) parameters.
pub type StreamBuilder = fn(&FeedParams) -> Result<String, VenueError>;

/// Normalizes a payload into its canonical form.
pub type FrameParser =
    fn(&Value, &FeedParams, &dyn MarketDirectory) -> Result<MarketUpdate, VenueError>;

/// Builder and parser for one feed kind.
#[derive(Clone, Copy)]
pub struct FeedHandler {
    /// Stream name builder.
    pub build_stream: StreamBuilder,
    /// Payload parser.
    pub parse: FrameParser,
}

impl std::fmt::Debug for FeedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedHandler").finish_non_exhaustive()
    }
}

/// Finite mapping from feed kind to handler.
#[derive(Debug, Clone, Copy)]
pub struct FeedTable {
    ticker: Option<FeedHandler>,
    trade: Option<FeedHandler>,
    order_book: Option<FeedHandler>,
}

impl FeedTable {
    /// Handlers for every Binance feed.
    #[must_use]
    pub fn binance() -> Self {
        Self {
            ticker: Some(FeedHandler {
                build_stream: tickers_stream,
                parse: parser::parse_tickers,
            }),
            trade: Some(FeedHandler {
                build_stream: trade_stream,
                parse: parser::parse_trade,
            }),
            order_book: Some(FeedHandler {
                build_stream: order_book_stream,
                parse: parser::parse_order_book,
            }),
        }
    }

    /// Table with the handler for `kind` removed.
    #[must_use]
    pub fn without(mut self, kind: FeedKind) -> Self {
        match kind {
            FeedKind::Ticker => self.ticker = None,
            FeedKind::Trade => self.trade = None,
            FeedKind::OrderBook => self.order_book = None,
        }
        self
    }

    /// Handler for `kind`.
    #[must_use]
    pub const fn get(&self, kind: FeedKind) -> Option<&FeedHandler> {
        match kind {
            FeedKind::Ticker => self.ticker.as_ref(),
            FeedKind::Trade => self.trade.as_ref(),
            FeedKind::OrderBook => self.order_book.as_ref(),
        }
    }

    /// Handler for `kind`, or [`VenueError::UnsupportedFeed`].
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedFeed` when no handler is registered.
    pub fn require(&self, kind: FeedKind) -> Result<&FeedHandler, VenueError> {
        self.get(kind).ok_or(VenueError::UnsupportedFeed(kind))
    }
}

/// Expand `{name}` placeholders in `template` from `params`.
///
/// # Errors
///
/// Returns [`VenueError::MissingParameter`] for a placeholder without a
/// value, or [`VenueError::InvalidPayload`] for an unterminated placeholder.
pub fn implode_params(template: &'static str, params: &FeedParams) -> Result<String, VenueError> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            VenueError::InvalidPayload(format!("unterminated placeholder in '{template}'"))
        })?;
        let key = &after[..close];
        let value = params.get(key).ok_or_else(|| VenueError::MissingParameter {
            param: key.to_string(),
            template,
        })?;
        out.push_str(value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

fn trade_stream(params: &FeedParams) -> Result<String, VenueError> {
    implode_params(TRADE_TEMPLATE, params)
}

fn order_book_stream(params: &FeedParams) -> Result<String, VenueError> {
    implode_params(ORDER_BOOK_TEMPLATE, params)
}

fn tickers_stream(_params: &FeedParams) -> Result<String, VenueError> {
    Ok(TICKERS_STREAM.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_stream_expands_symbol() {
        let stream = trade_stream(&FeedParams::symbol("btcusdt")).unwrap();
        assert_eq!(stream, "btcusdt@aggTrade");
    }

    #[test]
    fn order_book_stream_expands_symbol_and_levels() {
        let stream = order_book_stream(&FeedParams::depth("ethusdt", 10)).unwrap();
        assert_eq!(stream, "ethusdt@depth10@100ms");
    }

    #[test]
    fn order_book_without_levels_fails() {
        let err = order_book_stream(&FeedParams::symbol("ethusdt")).unwrap_err();
        assert!(matches!(err, VenueError::MissingParameter { ref param, .. } if param == "levels"));
    }

    #[test]
    fn tickers_stream_ignores_params() {
        assert_eq!(tickers_stream(&FeedParams::symbol("x")).unwrap(), TICKERS_STREAM);
    }

    #[test]
    fn builders_are_pure() {
        let params = FeedParams::depth("btcusdt", 5);
        assert_eq!(
            order_book_stream(&params).unwrap(),
            order_book_stream(&params).unwrap()
        );
    }

    #[test]
    fn table_without_kind_reports_unsupported() {
        let table = FeedTable::binance().without(FeedKind::OrderBook);
        assert!(table.get(FeedKind::Trade).is_some());
        assert!(matches!(
            table.require(FeedKind::OrderBook),
            Err(VenueError::UnsupportedFeed(FeedKind::OrderBook))
        ));
    }
}

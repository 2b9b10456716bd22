//! Binance Venue Adapter
//!
//! Implements [`VenueAdapter`] for the Binance public streams. The adapter
//! holds the market directory and the feed table; it performs no I/O of its
//! own beyond the directory load in [`prepare`](VenueAdapter::prepare).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::MarketSegment;
use super::messages::Command;
use super::streams::FeedTable;
use crate::application::ports::{
    InboundFrame, MarketDirectory, OutboundFrame, RequestIds, VenueAdapter, VenueError,
};
use crate::domain::streaming::MarketUpdate;
use crate::domain::subscription::{FeedKind, FeedParams};

/// Binance public market data adapter.
pub struct BinanceAdapter {
    segment: MarketSegment,
    endpoint: String,
    directory: Arc<dyn MarketDirectory>,
    feeds: FeedTable,
}

impl BinanceAdapter {
    /// Adapter for `segment` using `directory` for symbol translation.
    #[must_use]
    pub fn new(segment: MarketSegment, directory: Arc<dyn MarketDirectory>) -> Self {
        Self {
            segment,
            endpoint: segment.url().to_string(),
            directory,
            feeds: FeedTable::binance(),
        }
    }

    /// Override the WebSocket endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Replace the feed table.
    #[must_use]
    pub const fn with_feeds(mut self, feeds: FeedTable) -> Self {
        self.feeds = feeds;
        self
    }

    /// Selected market segment.
    #[must_use]
    pub const fn segment(&self) -> MarketSegment {
        self.segment
    }

    fn encode(command: &Command) -> Result<OutboundFrame, VenueError> {
        serde_json::to_string(command)
            .map(OutboundFrame::Text)
            .map_err(VenueError::Encode)
    }
}

#[async_trait]
impl VenueAdapter for BinanceAdapter {
    fn name(&self) -> &'static str {
        "binance"
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn supports(&self, kind: FeedKind) -> bool {
        self.feeds.get(kind).is_some()
    }

    async fn prepare(&self) -> Result<(), VenueError> {
        self.directory.load().await?;
        Ok(())
    }

    fn setup_commands(&self, ids: &RequestIds) -> Result<Vec<OutboundFrame>, VenueError> {
        Ok(vec![Self::encode(&Command::enable_combined(ids.next_id()))?])
    }

    fn subscribe_command(&self, stream: &str, id: u64) -> Result<OutboundFrame, VenueError> {
        Self::encode(&Command::subscribe(stream, id))
    }

    fn unsubscribe_command(&self, stream: &str, id: u64) -> Result<OutboundFrame, VenueError> {
        Self::encode(&Command::unsubscribe(stream, id))
    }

    fn resolve_stream(&self, kind: FeedKind, params: &FeedParams) -> Result<String, VenueError> {
        let handler = self.feeds.require(kind)?;

        let mut native = params.clone();
        if let Some(symbol) = params.symbol_param() {
            let id = self
                .directory
                .native_id(symbol)
                .ok_or_else(|| VenueError::UnknownSymbol(symbol.to_string()))?;
            native.insert(FeedParams::SYMBOL, id.to_ascii_lowercase());
        }

        (handler.build_stream)(&native)
    }

    fn decode_frame(&self, text: &str) -> Result<InboundFrame, VenueError> {
        let mut value: Value = serde_json::from_str(text)?;

        if let Some(ping) = value.get("ping") {
            return Ok(InboundFrame::Ping {
                reply: OutboundFrame::Text(json!({ "pong": ping }).to_string()),
            });
        }

        let stream = value
            .get("stream")
            .and_then(Value::as_str)
            .map(str::to_owned);
        if let Some(stream) = stream {
            if let Some(data) = value.as_object_mut().and_then(|map| map.remove("data")) {
                return Ok(InboundFrame::Data { stream, data });
            }
        }

        if value.get("result").is_some() {
            return Ok(InboundFrame::Ack {
                id: value.get("id").and_then(Value::as_u64),
            });
        }

        Ok(InboundFrame::Unrecognized(value))
    }

    fn parse_frame(
        &self,
        kind: FeedKind,
        payload: &Value,
        params: &FeedParams,
    ) -> Result<MarketUpdate, VenueError> {
        let handler = self.feeds.require(kind)?;
        (handler.parse)(payload, params, self.directory.as_ref())
    }

    fn heartbeat_frame(&self) -> Option<OutboundFrame> {
        Some(OutboundFrame::Ping(Vec::new()))
    }
}

impl std::fmt::Debug for BinanceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceAdapter")
            .field("segment", &self.segment)
            .field("endpoint", &self.endpoint)
            .field("feeds", &self.feeds)
            .finish_non_exhaustive()
    }
}

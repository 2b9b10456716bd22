//! Frame Dispatcher
//!
//! Routes decoded inbound frames. Data frames are matched against the
//! registry snapshot; the payload is normalized at most once per frame and
//! the same `Arc` is handed to every matching subscription in registry
//! order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::application::ports::{InboundFrame, OutboundFrame, VenueAdapter, VenueError};
use crate::domain::streaming::MarketUpdate;
use crate::domain::subscription::SubscriptionRegistry;

/// Result of dispatching one data frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Subscriptions that received the update.
    pub matched: usize,
    /// Time spent in the parser (`None` when nothing matched).
    pub parse_time: Option<Duration>,
    /// Label of the delivered update.
    pub kind: Option<&'static str>,
}

/// What the dispatcher did with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// The frame was a venue ping; the reply must be written.
    Reply(OutboundFrame),
    /// Command acknowledgement.
    Acknowledged(Option<u64>),
    /// Data frame dispatched.
    Delivered(DispatchOutcome),
    /// Frame without the stream envelope.
    Dropped,
}

/// Parse-once fan-out over the subscription registry.
pub struct Dispatcher {
    adapter: Arc<dyn VenueAdapter>,
    registry: Arc<SubscriptionRegistry>,
}

impl Dispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(adapter: Arc<dyn VenueAdapter>, registry: Arc<SubscriptionRegistry>) -> Self {
        Self { adapter, registry }
    }

    /// Decode and route one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns the venue error when the frame is not JSON or a matched
    /// payload fails to parse.
    pub fn route_text(&self, text: &str) -> Result<Routed, VenueError> {
        let frame = self.adapter.decode_frame(text)?;
        self.route(frame)
    }

    /// Route an already decoded frame.
    ///
    /// # Errors
    ///
    /// Returns the venue error when a matched payload fails to parse.
    pub fn route(&self, frame: InboundFrame) -> Result<Routed, VenueError> {
        match frame {
            InboundFrame::Ping { reply } => Ok(Routed::Reply(reply)),
            InboundFrame::Ack { id } => {
                tracing::debug!(venue = self.adapter.name(), id = ?id, "Command acknowledged");
                Ok(Routed::Acknowledged(id))
            }
            InboundFrame::Data { stream, data } => {
                self.dispatch(&stream, &data).map(Routed::Delivered)
            }
            InboundFrame::Unrecognized(raw) => {
                tracing::warn!(venue = self.adapter.name(), frame = %raw, "Unrecognized frame dropped");
                Ok(Routed::Dropped)
            }
        }
    }

    /// Deliver one payload to every subscription whose stream `announced` satisfies.
    ///
    /// # Errors
    ///
    /// Returns the parser error of the first matching subscription.
    pub fn dispatch(&self, announced: &str, data: &Value) -> Result<DispatchOutcome, VenueError> {
        let mut outcome = DispatchOutcome::default();
        let mut parsed: Option<Arc<MarketUpdate>> = None;

        for subscription in self.registry.all() {
            if !subscription.matches(announced) {
                continue;
            }

            let update = match &parsed {
                Some(update) => Arc::clone(update),
                None => {
                    let started = Instant::now();
                    let update = Arc::new(self.adapter.parse_frame(
                        subscription.kind(),
                        data,
                        subscription.params(),
                    )?);
                    outcome.parse_time = Some(started.elapsed());
                    outcome.kind = Some(update.kind_label());
                    parsed = Some(Arc::clone(&update));
                    update
                }
            };

            subscription.notify(update);
            outcome.matched += 1;
        }

        if outcome.matched == 0 {
            tracing::trace!(stream = %announced, "Frame matched no subscription");
        }

        Ok(outcome)
    }

    /// Send the reset signal to every registered subscription.
    ///
    /// Returns the number of subscriptions notified.
    pub fn broadcast_reset(&self) -> usize {
        let reset = Arc::new(MarketUpdate::Reset);
        let subscriptions = self.registry.all();
        for subscription in &subscriptions {
            subscription.notify(Arc::clone(&reset));
        }
        subscriptions.len()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("venue", &self.adapter.name())
            .field("registry", &self.registry)
            .finish()
    }
}

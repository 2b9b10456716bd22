//! Subscription Registry
//!
//! Tracks which consumers want which feeds and derives the distinct set of
//! wire streams the connection must carry.
//!
//! # Design
//!
//! The registry is an ordered list of subscriptions. Insertion order drives
//! the order of outbound subscribe commands, so it is preserved exactly.
//! Each subscription lazily caches its resolved wire stream name; the set of
//! distinct streams is derived on demand from the resolved names rather than
//! maintained incrementally, which keeps dedup behaviour identical under
//! interleaved registration and deregistration.
//!
//! Readers always iterate a snapshot (`all()`), so registrations racing a
//! dispatch pass never invalidate the iteration.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::streaming::MarketUpdate;

// =============================================================================
// Types
// =============================================================================

/// Identifier of a consumer (one callback owner).
pub type ConsumerId = u64;

/// Identifier of one registered subscription.
pub type SubscriptionId = u64;

/// Category of market data requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// Rolling ticker statistics.
    Ticker,
    /// Public trades.
    Trade,
    /// Order book depth.
    OrderBook,
}

impl FeedKind {
    /// Snake-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Trade => "trade",
            Self::OrderBook => "order_book",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ticker" | "tickers" => Ok(Self::Ticker),
            "trade" | "trades" => Ok(Self::Trade),
            "order_book" | "orderbook" | "depth" => Ok(Self::OrderBook),
            other => Err(RegistryError::UnknownFeedKind(other.to_string())),
        }
    }
}

// =============================================================================
// Feed Parameters
// =============================================================================

/// Parameter bag attached to a feed request (symbol, depth level, ...).
///
/// Values are kept as strings because stream builders are plain template
/// expansions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedParams(BTreeMap<String, String>);

impl FeedParams {
    /// Key of the human-readable symbol parameter.
    pub const SYMBOL: &'static str = "symbol";
    /// Key of the order book depth parameter.
    pub const LEVELS: &'static str = "levels";

    /// Empty parameter bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters for a single symbol.
    #[must_use]
    pub fn symbol(symbol: impl Into<String>) -> Self {
        Self::new().with(Self::SYMBOL, symbol)
    }

    /// Parameters for a symbol at a given book depth.
    #[must_use]
    pub fn depth(symbol: impl Into<String>, levels: u32) -> Self {
        Self::symbol(symbol).with(Self::LEVELS, levels.to_string())
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a parameter.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a parameter.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// The symbol parameter, if present.
    #[must_use]
    pub fn symbol_param(&self) -> Option<&str> {
        self.get(Self::SYMBOL)
    }

    /// Iterate over parameters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// =============================================================================
// Observer
// =============================================================================

/// Consumer callback contract.
///
/// Invoked with a canonical update or with [`MarketUpdate::Reset`] after a
/// connection failure. Implementations must not block: they run inline on
/// the read loop.
pub trait MarketObserver: Send + Sync {
    /// Receive one update.
    fn on_update(&self, update: Arc<MarketUpdate>);
}

impl<F> MarketObserver for F
where
    F: Fn(Arc<MarketUpdate>) + Send + Sync,
{
    fn on_update(&self, update: Arc<MarketUpdate>) {
        self(update);
    }
}

/// Observer that forwards updates into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<Arc<MarketUpdate>>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its channel.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Arc<MarketUpdate>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl MarketObserver for ChannelObserver {
    fn on_update(&self, update: Arc<MarketUpdate>) {
        if self.tx.send(update).is_err() {
            tracing::trace!("Observer channel closed, dropping update");
        }
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// One (consumer, feed request) pair.
pub struct Subscription {
    id: SubscriptionId,
    consumer: ConsumerId,
    kind: FeedKind,
    params: FeedParams,
    stream: OnceLock<String>,
    observer: Arc<dyn MarketObserver>,
}

impl Subscription {
    /// Registry-assigned identifier.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Owning consumer.
    #[must_use]
    pub const fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    /// Requested feed kind.
    #[must_use]
    pub const fn kind(&self) -> FeedKind {
        self.kind
    }

    /// Parameters as supplied by the consumer (human-readable symbol).
    #[must_use]
    pub const fn params(&self) -> &FeedParams {
        &self.params
    }

    /// Resolved wire stream name, if resolution already ran.
    #[must_use]
    pub fn stream(&self) -> Option<&str> {
        self.stream.get().map(String::as_str)
    }

    /// Return the cached stream name, resolving it with `resolve` at most once.
    ///
    /// # Errors
    ///
    /// Propagates the resolver's error; nothing is cached in that case.
    pub fn resolve_stream<E>(
        &self,
        resolve: impl FnOnce(FeedKind, &FeedParams) -> Result<String, E>,
    ) -> Result<&str, E> {
        if let Some(stream) = self.stream.get() {
            return Ok(stream);
        }
        let resolved = resolve(self.kind, &self.params)?;
        Ok(self.stream.get_or_init(|| resolved))
    }

    /// Whether this subscription is satisfied by a frame announcing `announced`.
    #[must_use]
    pub fn matches(&self, announced: &str) -> bool {
        self.stream().is_some_and(|stream| announced.contains(stream))
    }

    /// Deliver an update to the consumer.
    pub fn notify(&self, update: Arc<MarketUpdate>) {
        self.observer.on_update(update);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("consumer", &self.consumer)
            .field("kind", &self.kind)
            .field("params", &self.params)
            .field("stream", &self.stream.get())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Registration rejected because the consumer limit is reached.
    #[error("subscription capacity exceeded (max {max})")]
    CapacityExceeded {
        /// Configured maximum.
        max: usize,
    },
    /// Feed kind string not recognised.
    #[error("unknown feed kind: {0}")]
    UnknownFeedKind(String),
}

/// Ordered, capacity-bounded set of subscriptions.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use market_stream_client::domain::streaming::MarketUpdate;
/// use market_stream_client::domain::subscription::{FeedKind, FeedParams, SubscriptionRegistry};
///
/// let registry = SubscriptionRegistry::new(2);
/// let observer = Arc::new(|_update: Arc<MarketUpdate>| {});
///
/// registry.register(1, FeedKind::Trade, FeedParams::symbol("BTC/USDT"), observer.clone()).unwrap();
/// registry.register(2, FeedKind::Trade, FeedParams::symbol("BTC/USDT"), observer.clone()).unwrap();
/// assert!(registry.register(3, FeedKind::Trade, FeedParams::symbol("ETH/USDT"), observer).is_err());
/// ```
pub struct SubscriptionRegistry {
    max_subscriptions: usize,
    next_id: AtomicU64,
    entries: RwLock<Vec<Arc<Subscription>>>,
}

impl SubscriptionRegistry {
    /// Create a registry holding at most `max_subscriptions` entries (0 = unbounded).
    #[must_use]
    pub const fn new(max_subscriptions: usize) -> Self {
        Self {
            max_subscriptions,
            next_id: AtomicU64::new(1),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Create a registry without a capacity bound.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self::new(0)
    }

    /// Configured capacity (0 = unbounded).
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.max_subscriptions
    }

    /// Append a subscription.
    ///
    /// The new entry starts unresolved, so it contributes nothing to
    /// [`distinct_streams`](Self::distinct_streams) until the next
    /// resolution pass.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CapacityExceeded`] when the registry is full.
    pub fn register(
        &self,
        consumer: ConsumerId,
        kind: FeedKind,
        params: FeedParams,
        observer: Arc<dyn MarketObserver>,
    ) -> Result<Arc<Subscription>, RegistryError> {
        let mut entries = self.entries.write();

        if self.max_subscriptions > 0 && entries.len() >= self.max_subscriptions {
            return Err(RegistryError::CapacityExceeded {
                max: self.max_subscriptions,
            });
        }

        let subscription = Arc::new(Subscription {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            consumer,
            kind,
            params,
            stream: OnceLock::new(),
            observer,
        });
        entries.push(Arc::clone(&subscription));

        Ok(subscription)
    }

    /// Remove one subscription by id.
    pub fn deregister(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        let mut entries = self.entries.write();
        let index = entries.iter().position(|s| s.id == id)?;
        Some(entries.remove(index))
    }

    /// Remove every subscription owned by `consumer`.
    pub fn deregister_consumer(&self, consumer: ConsumerId) -> Vec<Arc<Subscription>> {
        let mut entries = self.entries.write();
        let (removed, kept): (Vec<_>, Vec<_>) =
            entries.drain(..).partition(|s| s.consumer == consumer);
        *entries = kept;
        removed
    }

    /// Snapshot of all subscriptions in insertion order.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Subscription>> {
        self.entries.read().clone()
    }

    /// Distinct wire streams currently required.
    ///
    /// Derived from the already-resolved stream names only.
    #[must_use]
    pub fn distinct_streams(&self) -> BTreeSet<String> {
        self.entries
            .read()
            .iter()
            .filter_map(|s| s.stream().map(str::to_owned))
            .collect()
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let entries = self.entries.read();
        let mut consumers: Vec<ConsumerId> = entries.iter().map(|s| s.consumer).collect();
        consumers.sort_unstable();
        consumers.dedup();

        SubscriptionStats {
            subscription_count: entries.len(),
            consumer_count: consumers.len(),
            resolved_count: entries.iter().filter(|s| s.stream().is_some()).count(),
            stream_count: entries
                .iter()
                .filter_map(|s| s.stream())
                .collect::<BTreeSet<_>>()
                .len(),
        }
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("max_subscriptions", &self.max_subscriptions)
            .field("len", &self.len())
            .finish()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Registered subscriptions.
    pub subscription_count: usize,
    /// Distinct consumers.
    pub consumer_count: usize,
    /// Subscriptions with a resolved stream name.
    pub resolved_count: usize,
    /// Distinct resolved stream names.
    pub stream_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn noop() -> Arc<dyn MarketObserver> {
        Arc::new(|_update: Arc<MarketUpdate>| {})
    }

    fn resolve_as(stream: &str) -> impl FnOnce(FeedKind, &FeedParams) -> Result<String, ()> + '_ {
        move |_, _| Ok(stream.to_string())
    }

    #[test]
    fn register_preserves_insertion_order() {
        let registry = SubscriptionRegistry::unbounded();
        for (consumer, symbol) in ["BTC/USDT", "ETH/USDT", "SOL/USDT"].iter().enumerate() {
            registry
                .register(consumer as u64, FeedKind::Trade, FeedParams::symbol(*symbol), noop())
                .unwrap();
        }

        let symbols: Vec<_> = registry
            .all()
            .iter()
            .map(|s| s.params().symbol_param().unwrap().to_string())
            .collect();
        assert_eq!(symbols, vec!["BTC/USDT", "ETH/USDT", "SOL/USDT"]);
    }

    #[test]
    fn capacity_exceeded_at_limit() {
        let registry = SubscriptionRegistry::new(1);
        registry
            .register(1, FeedKind::Ticker, FeedParams::new(), noop())
            .unwrap();

        let err = registry
            .register(2, FeedKind::Ticker, FeedParams::new(), noop())
            .unwrap_err();
        assert_eq!(err, RegistryError::CapacityExceeded { max: 1 });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn zero_capacity_is_unbounded() {
        let registry = SubscriptionRegistry::new(0);
        for consumer in 0..2_000 {
            registry
                .register(consumer, FeedKind::Ticker, FeedParams::new(), noop())
                .unwrap();
        }
        assert_eq!(registry.len(), 2_000);
    }

    #[test]
    fn unresolved_entries_contribute_no_streams() {
        let registry = SubscriptionRegistry::unbounded();
        registry
            .register(1, FeedKind::Trade, FeedParams::symbol("BTC/USDT"), noop())
            .unwrap();
        assert!(registry.distinct_streams().is_empty());
    }

    #[test]
    fn stream_resolved_at_most_once() {
        let registry = SubscriptionRegistry::unbounded();
        let sub = registry
            .register(1, FeedKind::Trade, FeedParams::symbol("BTC/USDT"), noop())
            .unwrap();

        let mut calls = 0;
        let first = sub
            .resolve_stream(|_, _| {
                calls += 1;
                Ok::<_, ()>("btcusdt@aggTrade".to_string())
            })
            .unwrap()
            .to_string();
        let second = sub
            .resolve_stream(|_, _| Err::<String, _>("must not run"))
            .unwrap();

        assert_eq!(calls, 1);
        assert_eq!(first, second);
    }

    #[test]
    fn failed_resolution_is_not_cached() {
        let registry = SubscriptionRegistry::unbounded();
        let sub = registry
            .register(1, FeedKind::Trade, FeedParams::symbol("BTC/USDT"), noop())
            .unwrap();

        assert!(sub.resolve_stream(|_, _| Err::<String, _>("directory empty")).is_err());
        assert!(sub.stream().is_none());
        assert_eq!(sub.resolve_stream(resolve_as("btcusdt@aggTrade")).unwrap(), "btcusdt@aggTrade");
    }

    #[test]
    fn deregister_drops_unique_stream_keeps_shared() {
        let registry = SubscriptionRegistry::unbounded();
        let shared_a = registry
            .register(1, FeedKind::OrderBook, FeedParams::depth("BTC/USDT", 5), noop())
            .unwrap();
        let unique = registry
            .register(1, FeedKind::Trade, FeedParams::symbol("ETH/USDT"), noop())
            .unwrap();
        let shared_b = registry
            .register(2, FeedKind::OrderBook, FeedParams::depth("BTC/USDT", 5), noop())
            .unwrap();

        shared_a.resolve_stream(resolve_as("btcusdt@depth5@100ms")).unwrap();
        unique.resolve_stream(resolve_as("ethusdt@aggTrade")).unwrap();
        shared_b.resolve_stream(resolve_as("btcusdt@depth5@100ms")).unwrap();
        assert_eq!(registry.distinct_streams().len(), 2);

        let removed = registry.deregister_consumer(1);
        assert_eq!(removed.len(), 2);

        let streams = registry.distinct_streams();
        assert!(streams.contains("btcusdt@depth5@100ms"));
        assert!(!streams.contains("ethusdt@aggTrade"));
    }

    #[test]
    fn deregister_unknown_id_is_none() {
        let registry = SubscriptionRegistry::unbounded();
        assert!(registry.deregister(42).is_none());
    }

    #[test]
    fn snapshot_is_stable_during_mutation() {
        let registry = SubscriptionRegistry::unbounded();
        let sub = registry
            .register(1, FeedKind::Ticker, FeedParams::new(), noop())
            .unwrap();

        let snapshot = registry.all();
        registry.deregister(sub.id());
        registry
            .register(2, FeedKind::Ticker, FeedParams::new(), noop())
            .unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].consumer(), 1);
    }

    #[test]
    fn matches_uses_containment() {
        let registry = SubscriptionRegistry::unbounded();
        let sub = registry
            .register(1, FeedKind::Ticker, FeedParams::new(), noop())
            .unwrap();
        assert!(!sub.matches("!ticker@arr"));

        sub.resolve_stream(resolve_as("!ticker@arr")).unwrap();
        assert!(sub.matches("!ticker@arr"));
        assert!(!sub.matches("btcusdt@aggTrade"));
    }

    #[test]
    fn stats_count_consumers_and_streams() {
        let registry = SubscriptionRegistry::unbounded();
        let a = registry.register(1, FeedKind::Ticker, FeedParams::new(), noop()).unwrap();
        let b = registry.register(1, FeedKind::Ticker, FeedParams::new(), noop()).unwrap();
        registry.register(2, FeedKind::Trade, FeedParams::symbol("X/Y"), noop()).unwrap();
        a.resolve_stream(resolve_as("!ticker@arr")).unwrap();
        b.resolve_stream(resolve_as("!ticker@arr")).unwrap();

        let stats = registry.stats();
        assert_eq!(stats.subscription_count, 3);
        assert_eq!(stats.consumer_count, 2);
        assert_eq!(stats.resolved_count, 2);
        assert_eq!(stats.stream_count, 1);
    }

    #[test]
    fn feed_kind_parsing() {
        assert_eq!("tickers".parse::<FeedKind>().unwrap(), FeedKind::Ticker);
        assert_eq!("ORDER_BOOK".parse::<FeedKind>().unwrap(), FeedKind::OrderBook);
        assert!("candles".parse::<FeedKind>().is_err());
        assert_eq!(FeedKind::OrderBook.to_string(), "order_book");
    }

    #[test]
    fn feed_params_copy_is_independent() {
        let original = FeedParams::depth("BTC/USDT", 10);
        let mut copy = original.clone();
        copy.insert(FeedParams::SYMBOL, "btcusdt");

        assert_eq!(original.symbol_param(), Some("BTC/USDT"));
        assert_eq!(copy.symbol_param(), Some("btcusdt"));
        assert_eq!(copy.get(FeedParams::LEVELS), Some("10"));
    }

    #[tokio::test]
    async fn channel_observer_forwards() {
        let (observer, mut rx) = ChannelObserver::channel();
        observer.on_update(Arc::new(MarketUpdate::Reset));
        assert!(rx.recv().await.unwrap().is_reset());
    }

    proptest! {
        #[test]
        fn registrations_beyond_max_fail(max in 1usize..64, extra in 1usize..16) {
            let registry = SubscriptionRegistry::new(max);
            for consumer in 0..max {
                prop_assert!(registry
                    .register(consumer as u64, FeedKind::Ticker, FeedParams::new(), noop())
                    .is_ok());
            }
            for consumer in 0..extra {
                let result = registry.register(
                    (max + consumer) as u64,
                    FeedKind::Ticker,
                    FeedParams::new(),
                    noop(),
                );
                prop_assert_eq!(result.unwrap_err(), RegistryError::CapacityExceeded { max });
            }
            prop_assert_eq!(registry.len(), max);
        }
    }
}

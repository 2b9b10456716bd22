//! Stream Client
//!
//! Connection supervisor for one venue feed. Owns the single outbound
//! connection, keeps the venue subscribed to exactly the distinct streams
//! the registry needs, hands inbound frames to the dispatcher, and
//! reconnects on failure.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──► Connecting ──► Subscribing ◄──► Streaming
//!              ▲                              │
//!              └──── reset broadcast ◄── error┘
//! ```
//!
//! Every failure in a session (connect, protocol, parse) is absorbed here:
//! the connection is dropped, every subscription receives
//! [`MarketUpdate::Reset`](crate::domain::streaming::MarketUpdate::Reset),
//! and the loop reconnects after the policy's delay.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::connection::{
    ConnectionError, ConnectionHandle, ConnectionSlot, DEFAULT_WRITE_QUEUE, spawn_writer,
};
use super::heartbeat::{HeartbeatConfig, HeartbeatStats, HeartbeatTask};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{
    DirectoryError, OutboundFrame, RequestIds, VenueAdapter, VenueError,
};
use crate::application::services::{Dispatcher, Routed};
use crate::domain::subscription::{
    ConsumerId, FeedKind, FeedParams, MarketObserver, RegistryError, Subscription,
    SubscriptionId, SubscriptionRegistry,
};
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::metrics::{self, CommandKind, DropReason};

// =============================================================================
// Errors
// =============================================================================

/// Stream client errors.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// WebSocket transport or protocol error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tungstenite::Error>),

    /// Venue adapter error (resolution, decoding, parsing).
    #[error("venue error: {0}")]
    Venue(#[from] VenueError),

    /// Market directory could not be loaded.
    #[error("market directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// Registration rejected.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The connection writer is gone.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The venue closed the connection.
    #[error("connection closed by venue")]
    ConnectionClosed,

    /// The venue cannot serve this feed kind.
    #[error("feed kind not supported: {0}")]
    UnsupportedFeed(FeedKind),

    /// Reconnection attempts exhausted.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
}

impl From<tungstenite::Error> for StreamClientError {
    fn from(e: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

// =============================================================================
// State
// =============================================================================

/// Observable connection state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not running, or between sessions.
    #[default]
    Idle,
    /// Loading the directory and opening the connection.
    Connecting,
    /// Sending subscribe or unsubscribe commands.
    Subscribing,
    /// Reading frames.
    Streaming,
}

impl ConnectionState {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
        }
    }

    /// Numeric code for the state gauge.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Connecting => 1,
            Self::Subscribing => 2,
            Self::Streaming => 3,
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Stream client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamClientConfig {
    /// Fixed delay after each outbound subscribe or unsubscribe command.
    pub subscribe_interval: Duration,
    /// Heartbeat configuration (`None` disables the task).
    pub heartbeat: Option<HeartbeatConfig>,
    /// Reconnection backoff.
    pub reconnect: ReconnectConfig,
    /// Writer queue capacity.
    pub write_queue: usize,
}

impl Default for StreamClientConfig {
    fn default() -> Self {
        Self {
            subscribe_interval: Duration::from_millis(250),
            heartbeat: Some(HeartbeatConfig::default()),
            reconnect: ReconnectConfig::default(),
            write_queue: DEFAULT_WRITE_QUEUE,
        }
    }
}

impl StreamClientConfig {
    /// Derive from the environment-driven configuration.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            subscribe_interval: config.stream.subscribe_interval,
            heartbeat: config
                .heartbeat
                .enabled
                .then(|| HeartbeatConfig::new(config.heartbeat.interval)),
            reconnect: ReconnectConfig::from_settings(&config.reconnect),
            write_queue: DEFAULT_WRITE_QUEUE,
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// Resilient single-connection stream client.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use market_stream_client::domain::streaming::MarketUpdate;
/// use market_stream_client::domain::subscription::{FeedKind, FeedParams};
/// use market_stream_client::infrastructure::binance::{BinanceAdapter, MarketSegment};
/// use market_stream_client::infrastructure::directory::InMemoryMarketDirectory;
/// use market_stream_client::infrastructure::websocket::{StreamClient, StreamClientConfig};
/// use tokio_util::sync::CancellationToken;
///
/// async fn example() {
///     let directory = Arc::new(InMemoryMarketDirectory::from_pairs(["BTC/USDT"]));
///     let adapter = Arc::new(BinanceAdapter::new(MarketSegment::Spot, directory));
///     let client = Arc::new(StreamClient::new(
///         adapter,
///         StreamClientConfig::default(),
///         1024,
///         CancellationToken::new(),
///     ));
///
///     client
///         .subscribe(
///             1,
///             FeedKind::Trade,
///             FeedParams::symbol("BTC/USDT"),
///             Arc::new(|update: Arc<MarketUpdate>| println!("{update:?}")),
///         )
///         .unwrap();
///
///     tokio::spawn(client.run());
/// }
/// ```
pub struct StreamClient {
    adapter: Arc<dyn VenueAdapter>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Dispatcher,
    config: StreamClientConfig,
    slot: Arc<ConnectionSlot>,
    state: RwLock<ConnectionState>,
    running: AtomicBool,
    changed: Notify,
    request_ids: RequestIds,
    heartbeat_stats: Arc<HeartbeatStats>,
    cancel: CancellationToken,
}

impl StreamClient {
    /// Create a client with its own registry of `max_subscriptions` (0 = unbounded).
    #[must_use]
    pub fn new(
        adapter: Arc<dyn VenueAdapter>,
        config: StreamClientConfig,
        max_subscriptions: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self::with_registry(
            adapter,
            Arc::new(SubscriptionRegistry::new(max_subscriptions)),
            config,
            cancel,
        )
    }

    /// Create a client over an existing registry.
    #[must_use]
    pub fn with_registry(
        adapter: Arc<dyn VenueAdapter>,
        registry: Arc<SubscriptionRegistry>,
        config: StreamClientConfig,
        cancel: CancellationToken,
    ) -> Self {
        let dispatcher = Dispatcher::new(Arc::clone(&adapter), Arc::clone(&registry));
        Self {
            adapter,
            registry,
            dispatcher,
            config,
            slot: Arc::new(ConnectionSlot::new()),
            state: RwLock::new(ConnectionState::Idle),
            running: AtomicBool::new(false),
            changed: Notify::new(),
            request_ids: RequestIds::new(),
            heartbeat_stats: Arc::new(HeartbeatStats::default()),
            cancel,
        }
    }

    /// Create a client from the environment-driven configuration.
    #[must_use]
    pub fn from_config(
        adapter: Arc<dyn VenueAdapter>,
        config: &ClientConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self::new(
            adapter,
            StreamClientConfig::from_config(config),
            config.stream.max_subscriptions,
            cancel,
        )
    }

    // -------------------------------------------------------------------------
    // Consumer API
    // -------------------------------------------------------------------------

    /// Register a feed request for `consumer`.
    ///
    /// The stream is resolved and subscribed on the next pass of the
    /// connection loop, without dropping the connection.
    ///
    /// # Errors
    ///
    /// Returns [`StreamClientError::UnsupportedFeed`] if the venue cannot
    /// serve `kind`, or [`StreamClientError::Registry`] when the registry is
    /// full.
    pub fn subscribe(
        &self,
        consumer: ConsumerId,
        kind: FeedKind,
        params: FeedParams,
        observer: Arc<dyn MarketObserver>,
    ) -> Result<Arc<Subscription>, StreamClientError> {
        if !self.adapter.supports(kind) {
            return Err(StreamClientError::UnsupportedFeed(kind));
        }

        let subscription = self.registry.register(consumer, kind, params, observer)?;
        tracing::debug!(
            consumer,
            subscription_id = subscription.id(),
            kind = %kind,
            "Subscription registered"
        );
        self.registry_changed();
        Ok(subscription)
    }

    /// Remove one subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.registry.deregister(id).is_some();
        if removed {
            tracing::debug!(subscription_id = id, "Subscription removed");
            self.registry_changed();
        }
        removed
    }

    /// Remove every subscription of `consumer`. Returns how many were removed.
    pub fn remove_consumer(&self, consumer: ConsumerId) -> usize {
        let removed = self.registry.deregister_consumer(consumer).len();
        if removed > 0 {
            tracing::debug!(consumer, removed, "Consumer removed");
            self.registry_changed();
        }
        removed
    }

    fn registry_changed(&self) {
        metrics::set_subscriptions(self.registry.len());
        self.changed.notify_one();
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// The subscription registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the connection loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether an open connection exists.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.slot.is_connected()
    }

    /// Heartbeat counters.
    #[must_use]
    pub const fn heartbeat_stats(&self) -> &Arc<HeartbeatStats> {
        &self.heartbeat_stats
    }

    /// Stop the connection loop and the heartbeat task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            tracing::trace!(from = previous.as_str(), to = state.as_str(), "Connection state");
            metrics::set_connection_state(state.code());
        }
    }

    // -------------------------------------------------------------------------
    // Connection Loop
    // -------------------------------------------------------------------------

    /// Run the connection loop until cancelled.
    ///
    /// Single-flight: while one invocation is active, further calls return
    /// `Ok(())` immediately.
    ///
    /// # Errors
    ///
    /// Returns [`StreamClientError::MaxReconnectAttemptsExceeded`] when the
    /// reconnect policy gives up. With unlimited attempts this only returns
    /// on cancellation.
    pub async fn run(self: Arc<Self>) -> Result<(), StreamClientError> {
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::debug!(venue = self.adapter.name(), "Stream client already running");
            return Ok(());
        }

        let heartbeat_cancel = self.cancel.child_token();
        if let (Some(config), Some(probe)) =
            (self.config.heartbeat.clone(), self.adapter.heartbeat_frame())
        {
            let task = HeartbeatTask::new(
                config,
                probe,
                Arc::clone(&self.slot),
                Arc::clone(&self.heartbeat_stats),
                heartbeat_cancel.clone(),
            );
            tokio::spawn(task.run());
        }

        let result = self.supervise().await;

        heartbeat_cancel.cancel();
        self.slot.clear();
        self.set_state(ConnectionState::Idle);
        self.running.store(false, Ordering::Release);
        result
    }

    async fn supervise(&self) -> Result<(), StreamClientError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!(venue = self.adapter.name(), "Stream client cancelled");
                return Ok(());
            }

            let result = self.session(&mut policy).await;
            self.slot.clear();

            let error = match result {
                Ok(()) => {
                    tracing::info!(venue = self.adapter.name(), "Stream client cancelled");
                    return Ok(());
                }
                Err(e) => e,
            };

            self.set_state(ConnectionState::Connecting);
            let notified = self.dispatcher.broadcast_reset();
            metrics::record_resets(notified as u64);
            metrics::record_reconnect();
            tracing::warn!(
                venue = self.adapter.name(),
                error = %error,
                notified,
                "Stream connection failed, consumers reset"
            );

            let Some(delay) = policy.next_delay() else {
                return Err(StreamClientError::MaxReconnectAttemptsExceeded(
                    policy.max_attempts(),
                ));
            };

            if delay.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }

            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting"
            );
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Stream client cancelled during reconnect delay");
                    return Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One connection lifetime. `Ok` means cancelled.
    async fn session(&self, policy: &mut ReconnectPolicy) -> Result<(), StreamClientError> {
        self.set_state(ConnectionState::Connecting);

        self.adapter.prepare().await.map_err(|e| match e {
            VenueError::Directory(e) => StreamClientError::Directory(e),
            other => StreamClientError::Venue(other),
        })?;

        let url = self.adapter.endpoint().to_string();
        tracing::info!(venue = self.adapter.name(), url = %url, "Connecting to stream");

        let connected = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = tokio_tungstenite::connect_async(url.as_str()) => result?,
        };
        let (ws_stream, _response) = connected;
        let (sink, mut stream) = ws_stream.split();

        let (handle, _writer) = spawn_writer(sink, self.config.write_queue);
        self.slot.set(handle.clone());

        for frame in self.adapter.setup_commands(&self.request_ids)? {
            handle.send(frame).await?;
        }
        policy.reset();
        tracing::info!(
            venue = self.adapter.name(),
            connection_id = handle.id(),
            "Connected to stream"
        );

        let result = self.stream_loop(&handle, &mut stream).await;
        handle.close();
        result
    }

    async fn stream_loop<S>(
        &self,
        handle: &ConnectionHandle,
        stream: &mut S,
    ) -> Result<(), StreamClientError>
    where
        S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        let mut subscribed = HashSet::new();

        loop {
            self.sync_subscriptions(handle, &mut subscribed).await?;
            self.set_state(ConnectionState::Streaming);

            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                () = self.changed.notified() => {}
                message = stream.next() => match message {
                    Some(Ok(message)) => self.handle_message(handle, message).await?,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(StreamClientError::ConnectionClosed),
                },
            }
        }
    }

    /// Subscribe every not-yet-subscribed stream in registry order, then
    /// unsubscribe streams nothing needs any more.
    async fn sync_subscriptions(
        &self,
        handle: &ConnectionHandle,
        subscribed: &mut HashSet<String>,
    ) -> Result<(), StreamClientError> {
        for subscription in self.registry.all() {
            let stream = subscription
                .resolve_stream(|kind, params| self.adapter.resolve_stream(kind, params))
                .inspect_err(|e| {
                    tracing::warn!(
                        subscription_id = subscription.id(),
                        consumer = subscription.consumer(),
                        kind = %subscription.kind(),
                        error = %e,
                        "Stream resolution failed"
                    );
                })?;
            if subscribed.contains(stream) {
                continue;
            }

            self.set_state(ConnectionState::Subscribing);
            subscribed.insert(stream.to_owned());
            self.send_command(handle, stream, CommandKind::Subscribe).await?;
        }

        let wanted = self.registry.distinct_streams();
        let orphaned: Vec<String> = subscribed
            .iter()
            .filter(|stream| !wanted.contains(*stream))
            .cloned()
            .collect();

        for stream in orphaned {
            self.set_state(ConnectionState::Subscribing);
            subscribed.remove(&stream);
            self.send_command(handle, &stream, CommandKind::Unsubscribe).await?;
        }

        Ok(())
    }

    async fn send_command(
        &self,
        handle: &ConnectionHandle,
        stream: &str,
        kind: CommandKind,
    ) -> Result<(), StreamClientError> {
        let id = self.request_ids.next_id();
        let frame = match kind {
            CommandKind::Subscribe => self.adapter.subscribe_command(stream, id)?,
            CommandKind::Unsubscribe => self.adapter.unsubscribe_command(stream, id)?,
        };

        handle.send(frame).await?;
        metrics::record_command(kind);
        tracing::debug!(stream = %stream, id, command = ?kind, "Stream command sent");

        tokio::time::sleep(self.config.subscribe_interval).await;
        Ok(())
    }

    async fn handle_message(
        &self,
        handle: &ConnectionHandle,
        message: Message,
    ) -> Result<(), StreamClientError> {
        metrics::record_frame_received();

        match message {
            Message::Text(text) => self.handle_text(handle, text.as_str()).await,
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => self.handle_text(handle, text).await,
                Err(_) => {
                    tracing::warn!(len = bytes.len(), "Non-UTF-8 binary frame dropped");
                    metrics::record_frame_dropped(DropReason::Unrecognized);
                    Ok(())
                }
            },
            Message::Ping(payload) => {
                tracing::trace!("Ping received, replying with pong");
                handle.send(OutboundFrame::Pong(payload.to_vec())).await?;
                Ok(())
            }
            Message::Pong(_) => {
                tracing::trace!("Pong received");
                Ok(())
            }
            Message::Close(frame) => {
                tracing::info!(frame = ?frame, "Venue closed the connection");
                Err(StreamClientError::ConnectionClosed)
            }
            Message::Frame(_) => Ok(()),
        }
    }

    async fn handle_text(
        &self,
        handle: &ConnectionHandle,
        text: &str,
    ) -> Result<(), StreamClientError> {
        match self.dispatcher.route_text(text)? {
            Routed::Reply(frame) => {
                tracing::trace!("Venue ping answered");
                handle.send(frame).await?;
            }
            Routed::Acknowledged(_) => {}
            Routed::Delivered(outcome) => match outcome.kind {
                Some(feed) if outcome.matched > 0 => {
                    metrics::record_updates_delivered(feed, outcome.matched as u64);
                    if let Some(elapsed) = outcome.parse_time {
                        metrics::record_parse_duration(feed, elapsed);
                    }
                }
                _ => metrics::record_frame_dropped(DropReason::Unmatched),
            },
            Routed::Dropped => metrics::record_frame_dropped(DropReason::Unrecognized),
        }
        Ok(())
    }
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("venue", &self.adapter.name())
            .field("endpoint", &self.adapter.endpoint())
            .field("state", &self.state())
            .field("running", &self.is_running())
            .field("subscriptions", &self.registry.len())
            .finish_non_exhaustive()
    }
}

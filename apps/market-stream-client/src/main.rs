//! Market Stream Client Binary
//!
//! Connects to one venue feed and logs normalized updates for the
//! configured symbols.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-stream-client
//! ```
//!
//! # Environment Variables
//!
//! - `MARKET_STREAM_SEGMENT`: spot | future_u | future_base (default: spot)
//! - `MARKET_STREAM_URL`: Endpoint override
//! - `MARKET_STREAM_SYMBOLS`: Comma-separated symbols (default: BTC/USDT)
//! - `MARKET_STREAM_BOOK_LEVELS`: Order book depth (default: 5)
//! - `MARKET_STREAM_MAX_SUBSCRIPTIONS`: Registry capacity (default: 1024)
//! - `MARKET_STREAM_SUBSCRIBE_INTERVAL_MS`: Delay between commands (default: 250)
//! - `MARKET_STREAM_HEARTBEAT_ENABLED` / `MARKET_STREAM_HEARTBEAT_INTERVAL_SECS`
//! - `MARKET_STREAM_RECONNECT_*`: Backoff settings
//! - `MARKET_STREAM_METRICS_PORT`: Prometheus port (default: 0, disabled)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use market_stream_client::{
    BinanceAdapter, ClientConfig, FeedKind, FeedParams, InMemoryMarketDirectory, MarketUpdate,
    StreamClient, init_metrics, init_telemetry,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    let telemetry_guard = init_telemetry().context("telemetry initialization failed")?;

    tracing::info!(
        otel_export = telemetry_guard.is_exporting(),
        "Starting Market Stream Client"
    );

    let config = ClientConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    if config.metrics_port > 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
        init_metrics(addr).context("metrics exporter failed to start")?;
    }

    let shutdown_token = CancellationToken::new();

    let directory = Arc::new(InMemoryMarketDirectory::from_pairs(&config.feeds.symbols));
    let adapter = BinanceAdapter::new(config.stream.segment, directory)
        .with_endpoint(config.stream.endpoint());
    let client = Arc::new(StreamClient::from_config(
        Arc::new(adapter),
        &config,
        shutdown_token.clone(),
    ));

    subscribe_feeds(&client, &config)?;

    let runner = Arc::clone(&client);
    let handle = tokio::spawn(async move {
        if let Err(e) = runner.run().await {
            tracing::error!(error = %e, "Stream client stopped");
        }
    });

    tracing::info!("Market stream client ready");

    await_shutdown(shutdown_token).await;
    handle.await.context("stream client task panicked")?;

    log_final_stats(&client);
    tracing::info!("Market stream client stopped");
    drop(telemetry_guard);
    Ok(())
}

/// Log session counters before exit.
fn log_final_stats(client: &StreamClient) {
    let registry = client.registry().stats();
    let heartbeat = client.heartbeat_stats();
    tracing::info!(
        subscriptions = registry.subscription_count,
        consumers = registry.consumer_count,
        streams = registry.stream_count,
        heartbeats_sent = heartbeat.sent(),
        heartbeats_skipped = heartbeat.skipped(),
        heartbeats_failed = heartbeat.failed(),
        "Final stream client stats"
    );
}

/// Register one logging consumer per feed.
fn subscribe_feeds(client: &StreamClient, config: &ClientConfig) -> anyhow::Result<()> {
    client.subscribe(0, FeedKind::Ticker, FeedParams::new(), Arc::new(log_update))?;

    for (index, symbol) in config.feeds.symbols.iter().enumerate() {
        let consumer = index as u64 + 1;
        client.subscribe(
            consumer,
            FeedKind::Trade,
            FeedParams::symbol(symbol.as_str()),
            Arc::new(log_update),
        )?;
        client.subscribe(
            consumer,
            FeedKind::OrderBook,
            FeedParams::depth(symbol.as_str(), config.feeds.book_levels),
            Arc::new(log_update),
        )?;
    }

    tracing::info!(
        subscriptions = client.registry().len(),
        symbols = config.feeds.symbols.len(),
        "Feeds registered"
    );
    Ok(())
}

#[allow(clippy::needless_pass_by_value)]
fn log_update(update: Arc<MarketUpdate>) {
    match update.as_ref() {
        MarketUpdate::Reset => tracing::warn!("Feed reset, discarding local state"),
        MarketUpdate::Tickers { tickers } => {
            tracing::debug!(count = tickers.len(), "Tickers");
        }
        MarketUpdate::Trade(trade) => tracing::info!(
            symbol = %trade.symbol,
            side = ?trade.side,
            price = ?trade.price,
            amount = ?trade.amount,
            "Trade"
        ),
        MarketUpdate::OrderBook(book) => tracing::info!(
            symbol = %book.symbol,
            best_bid = ?book.best_bid().map(|l| l.price),
            best_ask = ?book.best_ask().map(|l| l.price),
            "Order book"
        ),
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        segment = config.stream.segment.as_str(),
        endpoint = %config.stream.endpoint(),
        symbols = ?config.feeds.symbols,
        heartbeat = config.heartbeat.enabled,
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}

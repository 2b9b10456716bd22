//! Stream Client Integration Tests
//!
//! Runs the client against a local mock venue and checks the wire commands,
//! fan-out, reset-on-failure and single-flight behavior.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use market_stream_client::{
    BinanceAdapter, ChannelObserver, FeedKind, FeedParams, InMemoryMarketDirectory, MarketSegment,
    MarketUpdate, ReconnectConfig, StreamClient, StreamClientConfig,
};
use market_stream_client::infrastructure::websocket::HeartbeatConfig;

const STEP: Duration = Duration::from_secs(5);

type VenueSocket = WebSocketStream<TcpStream>;

/// Local WebSocket server that hands every accepted connection to the test.
struct MockVenue {
    url: String,
    connections: mpsc::UnboundedReceiver<VenueSocket>,
}

impl MockVenue {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                if let Ok(ws) = tokio_tungstenite::accept_async(tcp).await {
                    if tx.send(ws).is_err() {
                        break;
                    }
                }
            }
        });

        Self { url, connections }
    }

    async fn accept(&mut self) -> VenueSocket {
        timeout(STEP, self.connections.recv())
            .await
            .expect("client did not connect")
            .expect("acceptor stopped")
    }

    /// Accept a connection and consume its combined-stream setup command.
    async fn accept_ready(&mut self) -> VenueSocket {
        let mut socket = self.accept().await;
        let setup = next_command(&mut socket).await;
        assert_eq!(setup["method"], "SET_PROPERTY");
        assert_eq!(setup["params"], json!(["combined", true]));
        socket
    }
}

async fn next_message(socket: &mut VenueSocket) -> Message {
    timeout(STEP, socket.next())
        .await
        .expect("venue read timed out")
        .expect("client closed the connection")
        .expect("venue read failed")
}

async fn next_command(socket: &mut VenueSocket) -> Value {
    loop {
        if let Message::Text(text) = next_message(socket).await {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn expect_command(socket: &mut VenueSocket, method: &str, stream: &str) -> u64 {
    let command = next_command(socket).await;
    assert_eq!(command["method"], method, "unexpected command {command}");
    assert_eq!(command["params"], json!([stream]), "unexpected command {command}");
    command["id"].as_u64().expect("command id")
}

async fn send(socket: &mut VenueSocket, frame: Value) {
    socket.send(Message::Text(frame.to_string().into())).await.unwrap();
}

async fn next_update(rx: &mut mpsc::UnboundedReceiver<Arc<MarketUpdate>>) -> Arc<MarketUpdate> {
    timeout(STEP, rx.recv())
        .await
        .expect("no update delivered")
        .expect("observer channel closed")
}

fn client(venue: &MockVenue) -> Arc<StreamClient> {
    let directory = Arc::new(InMemoryMarketDirectory::from_pairs(["BTC/USDT", "ETH/USDT"]));
    let adapter = BinanceAdapter::new(MarketSegment::Spot, directory).with_endpoint(&venue.url);
    let config = StreamClientConfig {
        subscribe_interval: Duration::from_millis(1),
        heartbeat: None,
        reconnect: ReconnectConfig::immediate(),
        ..StreamClientConfig::default()
    };
    Arc::new(StreamClient::new(
        Arc::new(adapter),
        config,
        0,
        CancellationToken::new(),
    ))
}

fn observe(
    client: &StreamClient,
    consumer: u64,
    kind: FeedKind,
    params: FeedParams,
) -> mpsc::UnboundedReceiver<Arc<MarketUpdate>> {
    let (observer, rx) = ChannelObserver::channel();
    client
        .subscribe(consumer, kind, params, Arc::new(observer))
        .unwrap();
    rx
}

fn agg_trade(buyer_is_maker: bool) -> Value {
    json!({
        "stream": "btcusdt@aggTrade",
        "data": {
            "e": "aggTrade", "E": 1_700_000_000_001_i64, "s": "BTCUSDT", "a": 12345,
            "p": "50000.10", "q": "0.002", "f": 100, "l": 105,
            "T": 1_700_000_000_000_i64, "m": buyer_is_maker, "M": true
        }
    })
}

fn depth_frame() -> Value {
    json!({
        "stream": "btcusdt@depth5@100ms",
        "data": {
            "lastUpdateId": 160,
            "bids": [["49999.0", "1.5"], ["50000.0", "2.0"]],
            "asks": [["50002.0", "1.0"], ["50001.0", "0.5"]]
        }
    })
}

#[tokio::test]
async fn identical_order_book_requests_share_one_subscription() {
    let mut venue = MockVenue::start().await;
    let client = client(&venue);

    let mut first = observe(&client, 1, FeedKind::OrderBook, FeedParams::depth("BTC/USDT", 5));
    let mut second = observe(&client, 2, FeedKind::OrderBook, FeedParams::depth("BTC/USDT", 5));
    let mut trades = observe(&client, 3, FeedKind::Trade, FeedParams::symbol("BTC/USDT"));

    let run = tokio::spawn(Arc::clone(&client).run());
    let mut socket = venue.accept_ready().await;

    let book_id = expect_command(&mut socket, "SUBSCRIBE", "btcusdt@depth5@100ms").await;
    let trade_id = expect_command(&mut socket, "SUBSCRIBE", "btcusdt@aggTrade").await;
    assert!(trade_id > book_id);

    send(&mut socket, depth_frame()).await;

    let a = next_update(&mut first).await;
    let b = next_update(&mut second).await;
    assert!(Arc::ptr_eq(&a, &b));

    let book = a.as_order_book().expect("order book update");
    assert_eq!(book.symbol, "BTC/USDT");
    assert_eq!(book.nonce, Some(160));
    assert_eq!(book.best_bid().unwrap().price.to_string(), "50000.0");
    assert_eq!(book.best_ask().unwrap().price.to_string(), "50001.0");
    assert!(trades.try_recv().is_err());

    client.shutdown();
    timeout(STEP, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn ticker_frame_normalized_and_fanned_out() {
    let mut venue = MockVenue::start().await;
    let client = client(&venue);

    let mut first = observe(&client, 1, FeedKind::Ticker, FeedParams::new());
    let mut second = observe(&client, 2, FeedKind::Ticker, FeedParams::new());

    let run = tokio::spawn(Arc::clone(&client).run());
    let mut socket = venue.accept_ready().await;
    expect_command(&mut socket, "SUBSCRIBE", "!ticker@arr").await;

    let frame: Value = serde_json::from_str(
        r#"{"stream":"!ticker@arr","data":[{"s":"BTCUSDT","c":"50000.0","h":"51000.0","l":"49000.0","v":"1000","q":"50000000","p":"500.0","P":"1.0","C":1700000000000}]}"#,
    )
    .unwrap();
    send(&mut socket, frame).await;

    let a = next_update(&mut first).await;
    let b = next_update(&mut second).await;
    assert!(Arc::ptr_eq(&a, &b));

    let ticker = a.ticker("BTC/USDT").expect("BTC/USDT ticker");
    assert_eq!(ticker.last.unwrap().to_string(), "50000.0");
    assert_eq!(ticker.high.unwrap().to_string(), "51000.0");
    assert_eq!(ticker.low.unwrap().to_string(), "49000.0");
    assert_eq!(ticker.change.unwrap().to_string(), "500.0");
    assert_eq!(ticker.percentage.unwrap().to_string(), "1.0");

    client.shutdown();
    timeout(STEP, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn transport_failure_resets_every_consumer_then_resubscribes() {
    let mut venue = MockVenue::start().await;
    let client = client(&venue);

    let mut trades = observe(&client, 1, FeedKind::Trade, FeedParams::symbol("BTC/USDT"));
    let mut books = observe(&client, 2, FeedKind::OrderBook, FeedParams::depth("BTC/USDT", 5));

    let run = tokio::spawn(Arc::clone(&client).run());

    let mut socket = venue.accept_ready().await;
    expect_command(&mut socket, "SUBSCRIBE", "btcusdt@aggTrade").await;
    expect_command(&mut socket, "SUBSCRIBE", "btcusdt@depth5@100ms").await;
    drop(socket);

    let mut socket = venue.accept_ready().await;
    expect_command(&mut socket, "SUBSCRIBE", "btcusdt@aggTrade").await;
    expect_command(&mut socket, "SUBSCRIBE", "btcusdt@depth5@100ms").await;

    send(&mut socket, agg_trade(true)).await;
    send(&mut socket, depth_frame()).await;

    assert!(next_update(&mut trades).await.is_reset());
    assert!(next_update(&mut trades).await.as_trade().is_some());
    assert!(next_update(&mut books).await.is_reset());
    assert!(next_update(&mut books).await.as_order_book().is_some());

    client.shutdown();
    timeout(STEP, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn malformed_payload_triggers_reset_and_reconnect() {
    let mut venue = MockVenue::start().await;
    let client = client(&venue);

    let mut books = observe(&client, 1, FeedKind::OrderBook, FeedParams::depth("BTC/USDT", 5));

    let run = tokio::spawn(Arc::clone(&client).run());

    let mut socket = venue.accept_ready().await;
    expect_command(&mut socket, "SUBSCRIBE", "btcusdt@depth5@100ms").await;
    send(
        &mut socket,
        json!({"stream": "btcusdt@depth5@100ms", "data": {"bids": [["oops"]], "asks": []}}),
    )
    .await;

    assert!(next_update(&mut books).await.is_reset());

    let mut socket = venue.accept_ready().await;
    expect_command(&mut socket, "SUBSCRIBE", "btcusdt@depth5@100ms").await;
    send(&mut socket, depth_frame()).await;
    assert!(next_update(&mut books).await.as_order_book().is_some());

    client.shutdown();
    timeout(STEP, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn unmatched_and_unrecognized_frames_are_dropped() {
    let mut venue = MockVenue::start().await;
    let client = client(&venue);

    let mut trades = observe(&client, 1, FeedKind::Trade, FeedParams::symbol("BTC/USDT"));

    let run = tokio::spawn(Arc::clone(&client).run());
    let mut socket = venue.accept_ready().await;
    expect_command(&mut socket, "SUBSCRIBE", "btcusdt@aggTrade").await;

    send(&mut socket, json!({"stream": "ethusdt@aggTrade", "data": {"s": "ETHUSDT"}})).await;
    send(&mut socket, json!({"stream": "btcusdt@aggTrade"})).await;
    send(&mut socket, json!({"result": null, "id": 2})).await;
    send(&mut socket, agg_trade(false)).await;

    let update = next_update(&mut trades).await;
    let trade = update.as_trade().expect("first delivery is the trade");
    assert_eq!(trade.symbol, "BTC/USDT");
    assert_eq!(trade.side.map(|s| s.as_str()), Some("buy"));
    assert_eq!(trade.cost.unwrap().to_string(), "100.00020");

    assert!(client.is_connected());
    assert!(venue.connections.try_recv().is_err());

    client.shutdown();
    timeout(STEP, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn venue_pings_are_answered() {
    let mut venue = MockVenue::start().await;
    let client = client(&venue);
    let _trades = observe(&client, 1, FeedKind::Trade, FeedParams::symbol("BTC/USDT"));

    let run = tokio::spawn(Arc::clone(&client).run());
    let mut socket = venue.accept_ready().await;
    expect_command(&mut socket, "SUBSCRIBE", "btcusdt@aggTrade").await;

    send(&mut socket, json!({"ping": 1_700_000_000_123_i64})).await;
    let pong = next_command(&mut socket).await;
    assert_eq!(pong, json!({"pong": 1_700_000_000_123_i64}));

    socket.send(Message::Ping(vec![7, 7].into())).await.unwrap();
    loop {
        if let Message::Pong(payload) = next_message(&mut socket).await {
            assert_eq!(payload.as_ref(), &[7, 7]);
            break;
        }
    }

    client.shutdown();
    timeout(STEP, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn heartbeat_pings_are_counted_and_registry_stats_reported() {
    let mut venue = MockVenue::start().await;
    let directory = Arc::new(InMemoryMarketDirectory::from_pairs(["BTC/USDT"]));
    let adapter = BinanceAdapter::new(MarketSegment::Spot, directory).with_endpoint(&venue.url);
    let client = Arc::new(StreamClient::new(
        Arc::new(adapter),
        StreamClientConfig {
            subscribe_interval: Duration::from_millis(1),
            heartbeat: Some(HeartbeatConfig::new(Duration::from_millis(20))),
            reconnect: ReconnectConfig::immediate(),
            ..StreamClientConfig::default()
        },
        0,
        CancellationToken::new(),
    ));
    let _trades = observe(&client, 1, FeedKind::Trade, FeedParams::symbol("BTC/USDT"));
    let _books = observe(&client, 2, FeedKind::OrderBook, FeedParams::depth("BTC/USDT", 5));

    let run = tokio::spawn(Arc::clone(&client).run());
    let mut socket = venue.accept_ready().await;
    expect_command(&mut socket, "SUBSCRIBE", "btcusdt@aggTrade").await;
    expect_command(&mut socket, "SUBSCRIBE", "btcusdt@depth5@100ms").await;

    while !matches!(next_message(&mut socket).await, Message::Ping(_)) {}
    timeout(STEP, async {
        while client.heartbeat_stats().sent() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("heartbeat was not counted");
    assert_eq!(client.heartbeat_stats().failed(), 0);

    let stats = client.registry().stats();
    assert_eq!(stats.subscription_count, 2);
    assert_eq!(stats.consumer_count, 2);
    assert_eq!(stats.stream_count, 2);

    client.shutdown();
    timeout(STEP, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn subscriptions_follow_the_registry_while_streaming() {
    let mut venue = MockVenue::start().await;
    let client = client(&venue);

    let _shared_a = observe(&client, 1, FeedKind::Trade, FeedParams::symbol("BTC/USDT"));
    let _shared_b = observe(&client, 2, FeedKind::Trade, FeedParams::symbol("BTC/USDT"));

    let run = tokio::spawn(Arc::clone(&client).run());
    let mut socket = venue.accept_ready().await;
    expect_command(&mut socket, "SUBSCRIBE", "btcusdt@aggTrade").await;

    // Still needed by consumer 2: no command expected.
    assert_eq!(client.remove_consumer(1), 1);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let _late = observe(&client, 3, FeedKind::Trade, FeedParams::symbol("ETH/USDT"));
    expect_command(&mut socket, "SUBSCRIBE", "ethusdt@aggTrade").await;

    assert_eq!(client.remove_consumer(2), 1);
    expect_command(&mut socket, "UNSUBSCRIBE", "btcusdt@aggTrade").await;

    assert!(!client.registry().distinct_streams().contains("btcusdt@aggTrade"));
    assert!(client.registry().distinct_streams().contains("ethusdt@aggTrade"));
    assert!(venue.connections.try_recv().is_err());

    client.shutdown();
    timeout(STEP, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn second_run_returns_while_first_is_active() {
    let mut venue = MockVenue::start().await;
    let client = client(&venue);
    let _tickers = observe(&client, 1, FeedKind::Ticker, FeedParams::new());

    let first = tokio::spawn(Arc::clone(&client).run());
    let mut socket = venue.accept_ready().await;
    expect_command(&mut socket, "SUBSCRIBE", "!ticker@arr").await;
    assert!(client.is_running());

    timeout(STEP, Arc::clone(&client).run())
        .await
        .expect("second run should return immediately")
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(venue.connections.try_recv().is_err());
    assert!(client.is_running());
    assert!(!first.is_finished());

    client.shutdown();
    timeout(STEP, first).await.unwrap().unwrap().unwrap();
    assert!(!client.is_running());
}

//! Session lifecycle against an in-memory transport.
//!
//! Time is paused: the runtime jumps straight to the next timer whenever
//! every task is idle, so backoff schedules are checked without waiting.

mod common;

use common::{assert_silent, channels, next_frame, strings, wait_for_state, Harness};
use std::time::Duration;
use tickstream_core::Timeframe;
use tickstream_ws::{ConnectionConfig, ConnectionState, TransportEvent};
use tokio::time::{timeout, Instant};
use tokio_test::assert_ok;

fn close_event() -> TransportEvent {
    TransportEvent::Closed {
        code: 1006,
        reason: "abnormal".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn heartbeat_challenge_gets_exactly_one_reply() {
    let mut h = Harness::start();
    let mut peer = h.connect().await;

    peer.events
        .send(TransportEvent::Message(
            r#"{"id":7,"method":"public/heartbeat","code":0}"#.to_string(),
        ))
        .await
        .unwrap();

    let reply = next_frame(&mut peer).await;
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["method"], "public/respond-heartbeat");
    assert_silent(&mut peer, Duration::from_millis(500)).await;
    assert_eq!(h.handle.heartbeat_stats().replies_sent, 1);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_challenge_without_id_is_ignored() {
    let mut h = Harness::start();
    let mut peer = h.connect().await;

    peer.events
        .send(TransportEvent::Message(
            r#"{"method":"public/heartbeat"}"#.to_string(),
        ))
        .await
        .unwrap();

    assert_silent(&mut peer, Duration::from_millis(500)).await;
    assert!(h.handle.is_connected());
}

#[tokio::test(start_paused = true)]
async fn client_ping_after_interval() {
    let mut h = Harness::start();
    let mut peer = h.connect().await;
    let connected_at = Instant::now();

    let ping = next_frame(&mut peer).await;

    assert_eq!(ping["method"], "public/heartbeat");
    assert!(ping.get("params").is_none());
    let elapsed = connected_at.elapsed();
    assert!(elapsed >= Duration::from_millis(29_900), "pinged early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(31), "pinged late: {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn subscriptions_made_offline_replay_in_one_frame() {
    let mut h = Harness::start();
    assert_ok!(h.handle.subscribe(&strings(&["candlestick.1m.BTC_USDT"])));
    assert_ok!(h.handle.subscribe(&strings(&["book.BTC_USDT.10"])));
    assert_eq!(h.handle.state(), ConnectionState::Disconnected);

    let mut peer = h.connect().await;

    let replay = next_frame(&mut peer).await;
    assert_eq!(replay["method"], "subscribe");
    assert_eq!(
        channels(&replay),
        strings(&["book.BTC_USDT.10", "candlestick.1m.BTC_USDT"])
    );
    assert_silent(&mut peer, Duration::from_millis(500)).await;
}

#[tokio::test(start_paused = true)]
async fn subscribe_while_connected_sends_only_new_channels() {
    let mut h = Harness::start();
    assert_ok!(h.handle.subscribe(&strings(&["book.BTC_USDT.10"])));
    let mut peer = h.connect().await;
    next_frame(&mut peer).await;

    assert_ok!(h.handle.subscribe(&strings(&["book.ETH_USDT.10"])));
    let frame = next_frame(&mut peer).await;
    assert_eq!(frame["method"], "subscribe");
    assert_eq!(channels(&frame), strings(&["book.ETH_USDT.10"]));

    assert_ok!(h.handle.unsubscribe(&strings(&["book.BTC_USDT.10"])));
    let frame = next_frame(&mut peer).await;
    assert_eq!(frame["method"], "unsubscribe");
    assert_eq!(channels(&frame), strings(&["book.BTC_USDT.10"]));

    assert_eq!(h.handle.active_subscriptions(), strings(&["book.ETH_USDT.10"]));
}

#[tokio::test(start_paused = true)]
async fn reconnect_restores_subscriptions() {
    let mut h = Harness::start();
    assert_ok!(h.handle.subscribe(&strings(&["book.BTC_USDT.10"])));
    let mut first = h.connect().await;
    next_frame(&mut first).await;

    first.events.send(close_event()).await.unwrap();
    wait_for_state(&h.handle, ConnectionState::Reconnecting).await;
    assert_eq!(h.handle.reconnect_attempts(), 1);

    let mut second = h.next_peer().await;
    wait_for_state(&h.handle, ConnectionState::Connected).await;

    let replay = next_frame(&mut second).await;
    assert_eq!(channels(&replay), strings(&["book.BTC_USDT.10"]));
    assert_eq!(h.handle.reconnect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn changes_while_reconnecting_shape_the_replay() {
    let mut h = Harness::start();
    assert_ok!(h.handle.subscribe(&strings(&["book.BTC_USDT.10", "book.ETH_USDT.10"])));
    let mut first = h.connect().await;
    next_frame(&mut first).await;

    first.events.send(close_event()).await.unwrap();
    wait_for_state(&h.handle, ConnectionState::Reconnecting).await;

    assert_ok!(h.handle.unsubscribe(&strings(&["book.BTC_USDT.10"])));
    assert_ok!(h.handle.subscribe(&strings(&["candlestick.1m.BTC_USDT"])));

    let mut second = h.next_peer().await;
    wait_for_state(&h.handle, ConnectionState::Connected).await;

    let replay = next_frame(&mut second).await;
    assert_eq!(replay["method"], "subscribe");
    assert_eq!(
        channels(&replay),
        strings(&["book.ETH_USDT.10", "candlestick.1m.BTC_USDT"])
    );
    assert_eq!(channels(&replay), h.handle.active_subscriptions());
    assert_silent(&mut second, Duration::from_millis(500)).await;
}

#[tokio::test(start_paused = true)]
async fn no_ping_after_close() {
    let mut h = Harness::start();
    let mut peer = h.connect().await;

    h.connector.set_failing(true);
    peer.events.send(close_event()).await.unwrap();
    wait_for_state(&h.handle, ConnectionState::Reconnecting).await;

    // A dropped link yields None; a ping would arrive as Some.
    let after_close = timeout(Duration::from_secs(40), peer.outbound.recv()).await;
    assert!(matches!(after_close, Ok(None) | Err(_)), "sent after close: {after_close:?}");
    assert_eq!(h.handle.heartbeat_stats().pings_sent, 0);
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_then_gives_up() {
    let mut h = Harness::start();
    let peer = h.connect().await;

    h.connector.set_failing(true);
    let closed_at = Instant::now();
    peer.events.send(close_event()).await.unwrap();

    wait_for_state(&h.handle, ConnectionState::Reconnecting).await;
    wait_for_state(&h.handle, ConnectionState::Disconnected).await;

    let offsets: Vec<Duration> = h.connector.attempts()[1..]
        .iter()
        .map(|t| t.duration_since(closed_at))
        .collect();
    let expected = [5, 15, 35, 75, 155].map(Duration::from_secs);
    assert_eq!(offsets.len(), expected.len(), "attempts: {offsets:?}");
    for (actual, want) in offsets.iter().zip(expected) {
        let diff = if *actual > want { *actual - want } else { want - *actual };
        assert!(diff <= Duration::from_millis(50), "attempt at {actual:?}, want {want:?}");
    }

    tokio::time::sleep(Duration::from_secs(1_000)).await;
    assert_eq!(h.connector.attempts().len(), 6);
    assert_eq!(h.handle.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn connect_after_giving_up_starts_fresh_budget() {
    let mut h = Harness::with_config(ConnectionConfig {
        max_reconnect_attempts: 1,
        reconnect_base_delay_ms: 1_000,
        ..Default::default()
    });
    let peer = h.connect().await;
    h.connector.set_failing(true);
    peer.events.send(close_event()).await.unwrap();
    wait_for_state(&h.handle, ConnectionState::Reconnecting).await;
    wait_for_state(&h.handle, ConnectionState::Disconnected).await;
    assert_eq!(h.connector.attempts().len(), 2);

    h.connector.set_failing(false);
    h.handle.connect().unwrap();
    let _peer = h.next_peer().await;
    wait_for_state(&h.handle, ConnectionState::Connected).await;
    assert_eq!(h.handle.reconnect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_reconnect() {
    let mut h = Harness::start();
    let peer = h.connect().await;

    peer.events.send(close_event()).await.unwrap();
    wait_for_state(&h.handle, ConnectionState::Reconnecting).await;

    assert_ok!(h.handle.disconnect());
    wait_for_state(&h.handle, ConnectionState::Disconnected).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.connector.attempts().len(), 1);
    assert_eq!(h.handle.state(), ConnectionState::Disconnected);
    assert_eq!(h.handle.reconnect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn disconnect_closes_link_without_reconnect() {
    let mut h = Harness::start();
    let mut peer = h.connect().await;

    assert_ok!(h.handle.disconnect());
    wait_for_state(&h.handle, ConnectionState::Disconnected).await;

    // Dropping the link ends the peer's outbound stream.
    assert!(peer.outbound.recv().await.is_none());
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.connector.attempts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_while_connected_is_noop() {
    let mut h = Harness::start();
    let _peer = h.connect().await;

    assert_ok!(h.handle.connect());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.connector.attempts().len(), 1);
    assert!(h.handle.is_connected());
}

#[tokio::test(start_paused = true)]
async fn malformed_frame_becomes_synthetic_error() {
    let mut h = Harness::start();
    let peer = h.connect().await;
    let mut last = h.handle.last_message_receiver();

    peer.events
        .send(TransportEvent::Message("{not json".to_string()))
        .await
        .unwrap();
    last.wait_for(|m| m.is_some()).await.unwrap();

    let msg = h.handle.last_message().unwrap();
    assert_eq!(msg.method.as_deref(), Some("error"));
    assert_eq!(msg.message.as_deref(), Some("Invalid message format"));
    assert!(h.handle.is_connected());
    assert!(h.sink.books.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn data_frames_reach_sink() {
    let mut h = Harness::start();
    assert_ok!(h.handle.subscribe(&strings(&[
        "book.BTC_USDT.10",
        "candlestick.1h.ETH_USDT"
    ])));
    let mut peer = h.connect().await;
    next_frame(&mut peer).await;
    let mut last = h.handle.last_message_receiver();

    let book = r#"{"id":-1,"method":"subscribe","code":0,"result":{
        "instrument_name":"BTC_USDT","subscription":"book.BTC_USDT.10","channel":"book",
        "data":[{"bids":[["50000","1.5","3"]],"asks":[["50001","0.5","1"]]}]}}"#;
    let candle = r#"{"id":-1,"method":"subscribe","code":0,"result":{
        "instrument_name":"ETH_USDT","subscription":"candlestick.1h.ETH_USDT",
        "channel":"candlestick","interval":"1h",
        "data":[{"t":1700000000000,"o":"1","h":"2","l":"0.5","c":"1.5","v":"10"}]}}"#;
    peer.events
        .send(TransportEvent::Message(book.to_string()))
        .await
        .unwrap();
    peer.events
        .send(TransportEvent::Message(candle.to_string()))
        .await
        .unwrap();
    last.wait_for(|m| {
        m.as_ref()
            .and_then(|m| m.channel_name())
            .is_some_and(|c| c.starts_with("candlestick"))
    })
    .await
    .unwrap();

    let books = h.sink.books.lock().clone();
    assert_eq!(books.len(), 1);
    assert_eq!(books[0].0, "BTC_USDT");
    let candles = h.sink.candles.lock().clone();
    assert_eq!(candles.len(), 1);
    assert_eq!(candles[0].0.instrument, "ETH_USDT");
    assert_eq!(candles[0].0.timeframe, Timeframe::H1);
    assert!(h.handle.pending_channels().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_clears_subscriptions_and_stops_task() {
    let mut h = Harness::start();
    assert_ok!(h.handle.subscribe(&strings(&["book.BTC_USDT.10"])));
    let _peer = h.connect().await;

    h.handle.shutdown();
    assert_ok!(h.task.await);

    assert_eq!(h.handle.state(), ConnectionState::Disconnected);
    assert!(h.handle.active_subscriptions().is_empty());
    assert!(h.handle.is_shutdown());
    assert!(h.handle.connect().is_err());
}

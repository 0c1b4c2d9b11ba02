//! Test harness: an in-memory connector and a recording sink.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tickstream_core::SeriesKey;
use tickstream_ws::{
    ConnectionConfig, ConnectionHandle, ConnectionManager, ConnectionState, Connector, FeedSink,
    TransportLink, TransportPeer, WsError, WsResult,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

/// Connector handing each opened link's peer to the test.
#[derive(Clone)]
pub struct MockConnector {
    attempts: Arc<Mutex<Vec<Instant>>>,
    fail: Arc<AtomicBool>,
    peers: mpsc::UnboundedSender<TransportPeer>,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportPeer>) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let connector = Self {
            attempts: Arc::new(Mutex::new(Vec::new())),
            fail: Arc::new(AtomicBool::new(false)),
            peers: peers_tx,
        };
        (connector, peers_rx)
    }

    /// Make every later connect attempt fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// When each connect attempt started.
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }
}

impl Connector for MockConnector {
    fn connect(&self, _url: &str) -> impl Future<Output = WsResult<TransportLink>> + Send {
        let this = self.clone();
        async move {
            this.attempts.lock().push(Instant::now());
            if this.fail.load(Ordering::SeqCst) {
                return Err(WsError::ConnectionFailed("connection refused".to_string()));
            }
            let (link, peer) = TransportLink::pair();
            this.peers
                .send(peer)
                .map_err(|_| WsError::ConnectionFailed("test ended".to_string()))?;
            Ok(link)
        }
    }
}

/// Sink recording what it was handed.
#[derive(Default)]
pub struct RecordingSink {
    pub books: Mutex<Vec<(String, serde_json::Value)>>,
    pub candles: Mutex<Vec<(SeriesKey, serde_json::Value)>>,
}

impl FeedSink for RecordingSink {
    fn on_order_book(&self, instrument: &str, data: &serde_json::Value) {
        self.books.lock().push((instrument.to_string(), data.clone()));
    }

    fn on_candlestick(&self, key: &SeriesKey, data: &serde_json::Value) {
        self.candles.lock().push((key.clone(), data.clone()));
    }
}

pub struct Harness {
    pub handle: ConnectionHandle,
    pub connector: MockConnector,
    pub peers: mpsc::UnboundedReceiver<TransportPeer>,
    pub sink: Arc<RecordingSink>,
    pub task: JoinHandle<()>,
}

impl Harness {
    /// Spawn a manager with default settings.
    pub fn start() -> Self {
        Self::with_config(ConnectionConfig {
            url: "wss://test.invalid/market".to_string(),
            ..Default::default()
        })
    }

    pub fn with_config(config: ConnectionConfig) -> Self {
        let (connector, peers) = MockConnector::new();
        let sink = Arc::new(RecordingSink::default());
        let (manager, handle) = ConnectionManager::new(config, connector.clone(), sink.clone());
        let task = tokio::spawn(manager.run());
        Self {
            handle,
            connector,
            peers,
            sink,
            task,
        }
    }

    /// Wait for the next opened link.
    pub async fn next_peer(&mut self) -> TransportPeer {
        timeout(Duration::from_secs(5), self.peers.recv())
            .await
            .expect("no connection opened")
            .expect("connector dropped")
    }

    /// `connect()` and wait until connected.
    pub async fn connect(&mut self) -> TransportPeer {
        self.handle.connect().unwrap();
        let peer = self.next_peer().await;
        wait_for_state(&self.handle, ConnectionState::Connected).await;
        peer
    }
}

pub async fn wait_for_state(handle: &ConnectionHandle, state: ConnectionState) {
    let mut rx = handle.state_receiver();
    timeout(Duration::from_secs(1_000), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("state never became {state}"))
        .expect("manager dropped");
}

/// Next frame the client sent, parsed.
pub async fn next_frame(peer: &mut TransportPeer) -> serde_json::Value {
    let text = timeout(Duration::from_secs(5), peer.outbound.recv())
        .await
        .expect("no frame sent")
        .expect("link dropped");
    serde_json::from_str(&text).expect("client sent invalid JSON")
}

/// Assert nothing is sent for `wait`.
pub async fn assert_silent(peer: &mut TransportPeer, wait: Duration) {
    if let Ok(Some(text)) = timeout(wait, peer.outbound.recv()).await {
        panic!("unexpected frame: {text}");
    }
}

pub fn channels(frame: &serde_json::Value) -> Vec<String> {
    frame["params"]["channels"]
        .as_array()
        .expect("frame has no channels")
        .iter()
        .map(|c| c.as_str().unwrap().to_string())
        .collect()
}

pub fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

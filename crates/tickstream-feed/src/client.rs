//! Market data client.
//!
//! Spawns the connection task with a [`FeedState`] as its sink and exposes
//! the session controls and the projected data through one handle.

use crate::error::FeedResult;
use crate::state::{FeedState, FeedUpdate};
use std::sync::Arc;
use tickstream_core::{
    book_channel, candlestick_channel, CandlestickBar, OrderBook, Timeframe,
};
use tickstream_ws::{
    init_crypto, ConnectionConfig, ConnectionHandle, ConnectionManager, ConnectionState,
    Connector, TungsteniteConnector, WsMessage,
};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Market data client.
pub struct MarketDataClient {
    handle: ConnectionHandle,
    feed: Arc<FeedState>,
    task: JoinHandle<()>,
}

impl MarketDataClient {
    /// Spawn a client that connects over TLS WebSocket. Must be called from
    /// within a tokio runtime.
    pub fn spawn(config: ConnectionConfig) -> Self {
        init_crypto();
        Self::with_connector(config, TungsteniteConnector)
    }

    /// Spawn a client over any transport.
    pub fn with_connector<C: Connector>(config: ConnectionConfig, connector: C) -> Self {
        let feed = Arc::new(FeedState::new());
        let (manager, handle) = ConnectionManager::new(config, connector, feed.clone());
        let task = tokio::spawn(manager.run());
        Self { handle, feed, task }
    }

    pub fn connect(&self) -> FeedResult<()> {
        Ok(self.handle.connect()?)
    }

    pub fn disconnect(&self) -> FeedResult<()> {
        Ok(self.handle.disconnect()?)
    }

    /// Disconnect, drop every subscription, and wait for the connection task.
    pub async fn shutdown(self) {
        self.handle.shutdown();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Connection task ended abnormally");
        }
        info!("Market data client stopped");
    }

    pub fn subscribe(&self, channels: &[String]) -> FeedResult<()> {
        Ok(self.handle.subscribe(channels)?)
    }

    pub fn unsubscribe(&self, channels: &[String]) -> FeedResult<()> {
        Ok(self.handle.unsubscribe(channels)?)
    }

    pub fn subscribe_candlestick(&self, instrument: &str, timeframe: Timeframe) -> FeedResult<()> {
        self.subscribe(&[candlestick_channel(instrument, timeframe)])
    }

    pub fn unsubscribe_candlestick(
        &self,
        instrument: &str,
        timeframe: Timeframe,
    ) -> FeedResult<()> {
        self.unsubscribe(&[candlestick_channel(instrument, timeframe)])
    }

    /// Subscribe to `book.<instrument>[.<depth>]`.
    pub fn subscribe_order_book(&self, instrument: &str, depth: Option<u32>) -> FeedResult<()> {
        self.subscribe(&[book_channel(instrument, depth)])
    }

    pub fn unsubscribe_order_book(&self, instrument: &str, depth: Option<u32>) -> FeedResult<()> {
        self.unsubscribe(&[book_channel(instrument, depth)])
    }

    /// Latest book, empty if the instrument was never seen.
    pub fn order_book(&self, instrument: &str) -> Arc<OrderBook> {
        self.feed.order_book(instrument)
    }

    /// `1m` series (or the instrument's latest series without one), empty if
    /// unseen.
    pub fn candlestick_data(&self, instrument: &str) -> Arc<Vec<CandlestickBar>> {
        self.feed.candlestick_data(instrument)
    }

    pub fn candlestick_series(
        &self,
        instrument: &str,
        timeframe: Timeframe,
    ) -> Arc<Vec<CandlestickBar>> {
        self.feed.candlestick_series(instrument, timeframe)
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.handle.state_receiver()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    pub fn last_message(&self) -> Option<WsMessage> {
        self.handle.last_message()
    }

    pub fn last_message_receiver(&self) -> watch::Receiver<Option<WsMessage>> {
        self.handle.last_message_receiver()
    }

    pub fn updates(&self) -> broadcast::Receiver<FeedUpdate> {
        self.feed.subscribe_updates()
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn feed(&self) -> &Arc<FeedState> {
        &self.feed
    }
}

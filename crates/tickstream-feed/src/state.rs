//! Feed state: both projectors behind one [`FeedSink`], with change
//! notifications.

use crate::candlestick::CandlestickProjector;
use crate::order_book::OrderBookProjector;
use std::sync::Arc;
use tickstream_core::{CandlestickBar, OrderBook, SeriesKey, Timeframe};
use tickstream_ws::FeedSink;
use tokio::sync::broadcast;
use tracing::warn;

/// Notification capacity per receiver before it starts lagging.
const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// Something in the feed state changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedUpdate {
    /// Book for this instrument was replaced.
    OrderBook(String),
    /// This candlestick series changed.
    Candles(SeriesKey),
}

/// Projected market data.
pub struct FeedState {
    books: OrderBookProjector,
    candles: CandlestickProjector,
    updates: broadcast::Sender<FeedUpdate>,
}

impl FeedState {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            books: OrderBookProjector::new(),
            candles: CandlestickProjector::new(),
            updates,
        }
    }

    pub fn order_book(&self, instrument: &str) -> Arc<OrderBook> {
        self.books.order_book(instrument)
    }

    /// Series at the default (`1m`) timeframe, or the instrument's most
    /// recently changed series when it has no `1m` one.
    pub fn candlestick_data(&self, instrument: &str) -> Arc<Vec<CandlestickBar>> {
        self.candles.instrument_series(instrument)
    }

    pub fn candlestick_series(
        &self,
        instrument: &str,
        timeframe: Timeframe,
    ) -> Arc<Vec<CandlestickBar>> {
        self.candles.series(&SeriesKey::new(instrument, timeframe))
    }

    /// Receive a [`FeedUpdate`] after every applied change.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<FeedUpdate> {
        self.updates.subscribe()
    }

    pub fn books(&self) -> &OrderBookProjector {
        &self.books
    }

    pub fn candles(&self) -> &CandlestickProjector {
        &self.candles
    }

    fn notify(&self, update: FeedUpdate) {
        // No receivers is fine.
        let _ = self.updates.send(update);
    }
}

impl Default for FeedState {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedSink for FeedState {
    fn on_order_book(&self, instrument: &str, data: &serde_json::Value) {
        match self.books.apply(instrument, data) {
            Ok(_) => self.notify(FeedUpdate::OrderBook(instrument.to_string())),
            Err(e) => warn!(%instrument, error = %e, "Rejected order book payload"),
        }
    }

    fn on_candlestick(&self, key: &SeriesKey, data: &serde_json::Value) {
        match self.candles.apply(key, data) {
            Ok(outcome) if outcome.changed() => self.notify(FeedUpdate::Candles(key.clone())),
            Ok(_) => {}
            Err(e) => warn!(%key, error = %e, "Rejected candlestick payload"),
        }
    }
}

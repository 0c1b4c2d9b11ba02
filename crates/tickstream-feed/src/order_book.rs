//! Order book projection.
//!
//! Every book frame is a full top-of-book snapshot: the stored book for the
//! instrument is replaced wholesale, never merged. Readers hold an
//! `Arc<OrderBook>` and never observe a partially applied update.

use crate::error::FeedResult;
use crate::parser::parse_book;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tickstream_core::OrderBook;
use tickstream_telemetry::Metrics;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct BookEntry {
    book: Arc<OrderBook>,
    updated_at: DateTime<Utc>,
}

/// Per-instrument order book store.
#[derive(Debug, Default)]
pub struct OrderBookProjector {
    books: DashMap<String, BookEntry>,
}

impl OrderBookProjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `data` and replace the instrument's book.
    ///
    /// A payload that fails to parse leaves the stored book untouched.
    pub fn apply(&self, instrument: &str, data: &serde_json::Value) -> FeedResult<Arc<OrderBook>> {
        let book = match parse_book(data) {
            Ok(book) => Arc::new(book),
            Err(e) => {
                Metrics::feed_rejected("book");
                return Err(e);
            }
        };

        if !book.is_well_ordered() {
            warn!(%instrument, "Book levels out of price order, storing as received");
        }

        debug!(
            %instrument,
            bids = book.bids.len(),
            asks = book.asks.len(),
            best_bid = ?book.best_bid().map(|l| l.price),
            best_ask = ?book.best_ask().map(|l| l.price),
            "Order book update"
        );

        self.books.insert(
            instrument.to_string(),
            BookEntry {
                book: book.clone(),
                updated_at: Utc::now(),
            },
        );
        Metrics::feed_update("book");
        Ok(book)
    }

    /// Stored book, or an empty one if the instrument was never seen.
    pub fn order_book(&self, instrument: &str) -> Arc<OrderBook> {
        self.books
            .get(instrument)
            .map(|entry| entry.book.clone())
            .unwrap_or_default()
    }

    /// Milliseconds since the instrument's book was last replaced.
    pub fn book_age_ms(&self, instrument: &str) -> Option<i64> {
        self.books
            .get(instrument)
            .map(|entry| (Utc::now() - entry.updated_at).num_milliseconds())
    }

    /// Instruments with a stored book, sorted.
    pub fn instruments(&self) -> Vec<String> {
        let mut names: Vec<String> = self.books.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

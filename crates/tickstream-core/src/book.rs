//! Bounded order book snapshot.
//!
//! The feed publishes full book snapshots; an `OrderBook` is always replaced
//! wholesale, never merged. Each side keeps at most `MAX_BOOK_DEPTH` levels,
//! best price first.

use crate::{Price, Size};
use serde::{Deserialize, Serialize};

/// Maximum number of levels retained per side.
pub const MAX_BOOK_DEPTH: usize = 5;

/// One price rung of the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLevel {
    pub price: Price,
    pub quantity: Size,
    pub order_count: u32,
    /// Re-display of this level's own quantity; not a running sum.
    pub cumulative_quantity: Size,
}

impl OrderLevel {
    /// Create a level whose cumulative quantity equals its own quantity.
    pub fn new(price: Price, quantity: Size, order_count: u32) -> Self {
        Self {
            price,
            quantity,
            order_count,
            cumulative_quantity: quantity,
        }
    }
}

/// Top-of-book snapshot for one instrument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBook {
    /// Bids, highest price first.
    pub bids: Vec<OrderLevel>,
    /// Asks, lowest price first.
    pub asks: Vec<OrderLevel>,
}

impl OrderBook {
    /// An empty book (returned for instruments never seen).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a book from best-first level iterators, keeping at most
    /// `MAX_BOOK_DEPTH` levels per side in the order supplied.
    pub fn from_levels<B, A>(bids: B, asks: A) -> Self
    where
        B: IntoIterator<Item = OrderLevel>,
        A: IntoIterator<Item = OrderLevel>,
    {
        Self {
            bids: bids.into_iter().take(MAX_BOOK_DEPTH).collect(),
            asks: asks.into_iter().take(MAX_BOOK_DEPTH).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn best_bid(&self) -> Option<&OrderLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&OrderLevel> {
        self.asks.first()
    }

    /// Best ask minus best bid.
    pub fn spread(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    /// Mid price: (best bid + best ask) / 2.
    pub fn mid_price(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => {
                Some(Price::new((bid.price + ask.price).inner() / rust_decimal::Decimal::TWO))
            }
            _ => None,
        }
    }

    /// Whether bids are descending and asks ascending by price.
    pub fn is_well_ordered(&self) -> bool {
        self.bids.windows(2).all(|w| w[0].price >= w[1].price)
            && self.asks.windows(2).all(|w| w[0].price <= w[1].price)
    }
}

//! Market data projections for tickstream.
//!
//! Turns routed feed frames into queryable state: a bounded order book per
//! instrument and a candlestick series per instrument/timeframe.

pub mod candlestick;
pub mod client;
pub mod error;
pub mod order_book;
pub mod parser;
pub mod state;

pub use candlestick::{CandleOutcome, CandlestickProjector};
pub use client::MarketDataClient;
pub use error::{FeedError, FeedResult};
pub use order_book::OrderBookProjector;
pub use parser::CandlePayload;
pub use state::{FeedState, FeedUpdate};

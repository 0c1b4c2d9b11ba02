//! Core domain types for the tickstream market-data client.
//!
//! This crate provides the types shared by the session and the projectors:
//! - `Price`, `Size`: Precision-safe numeric types
//! - `OrderLevel`, `OrderBook`: Bounded top-of-book snapshot per instrument
//! - `CandlestickBar`, `Timeframe`, `SeriesKey`: OHLCV series identification
//! - `Channel`: Typed view of feed channel names

pub mod book;
pub mod candle;
pub mod channel;
pub mod decimal;
pub mod error;

pub use book::{OrderBook, OrderLevel, MAX_BOOK_DEPTH};
pub use candle::{CandlestickBar, SeriesKey, Timeframe};
pub use channel::{book_channel, candlestick_channel, Channel};
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};

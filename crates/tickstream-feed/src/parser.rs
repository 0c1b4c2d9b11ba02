//! Payload parsing for market data.
//!
//! The feed sends numbers either as JSON strings (`"50000.5"`) or as JSON
//! numbers; every numeric field here accepts both.
//!
//! Supports two payload shapes:
//! 1. Book: `data[0].{bids, asks}` of `[price, quantity, order_count]` triples
//! 2. Candlestick: `data` as an array (snapshot) or a single object
//!    (incremental) of `{t, o, h, l, c, v}` bars

use crate::error::{FeedError, FeedResult};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use tickstream_core::{CandlestickBar, OrderBook, OrderLevel, Price, Size, MAX_BOOK_DEPTH};

/// Parsed candlestick payload.
#[derive(Debug, Clone, PartialEq)]
pub enum CandlePayload {
    /// Initial history, oldest first.
    Snapshot(Vec<CandlestickBar>),
    /// One new or updated bar.
    Incremental(CandlestickBar),
}

/// Parse a book payload into a bounded snapshot.
///
/// Only the first `MAX_BOOK_DEPTH` triples per side are read; levels deeper
/// than that are never inspected.
pub fn parse_book(data: &Value) -> FeedResult<OrderBook> {
    let snapshot = match data {
        Value::Array(items) => items
            .first()
            .ok_or_else(|| FeedError::InvalidData("empty book data".to_string()))?,
        Value::Object(_) => data,
        _ => return Err(FeedError::InvalidData("book data is not an array".to_string())),
    };

    let bids = parse_side(snapshot, "bids")?;
    let asks = parse_side(snapshot, "asks")?;
    Ok(OrderBook::from_levels(bids, asks))
}

fn parse_side(snapshot: &Value, side: &str) -> FeedResult<Vec<OrderLevel>> {
    let levels = match snapshot.get(side) {
        Some(Value::Array(levels)) => levels,
        // A side may be absent when it is empty.
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(_) => return Err(FeedError::InvalidData(format!("{side} is not an array"))),
    };

    levels
        .iter()
        .take(MAX_BOOK_DEPTH)
        .map(|level| parse_level(level, side))
        .collect()
}

fn parse_level(level: &Value, side: &str) -> FeedResult<OrderLevel> {
    let triple = level
        .as_array()
        .filter(|t| t.len() >= 2)
        .ok_or_else(|| FeedError::InvalidData(format!("{side} level is not a triple: {level}")))?;

    let price = Price::new(decimal(&triple[0], "price")?);
    let quantity = Size::new(decimal(&triple[1], "quantity")?);
    let order_count = match triple.get(2) {
        Some(count) => u32::try_from(integer(count, "order count")?)
            .map_err(|_| FeedError::InvalidData(format!("order count out of range: {count}")))?,
        None => 0,
    };

    if price.inner().is_sign_negative() || quantity.inner().is_sign_negative() {
        return Err(FeedError::InvalidData(format!("negative {side} level: {level}")));
    }

    Ok(OrderLevel::new(price, quantity, order_count))
}

/// Parse a candlestick payload: an array is a snapshot, an object one bar.
pub fn parse_candles(data: &Value) -> FeedResult<CandlePayload> {
    match data {
        Value::Array(items) => items
            .iter()
            .map(parse_bar)
            .collect::<FeedResult<Vec<_>>>()
            .map(CandlePayload::Snapshot),
        Value::Object(_) => parse_bar(data).map(CandlePayload::Incremental),
        _ => Err(FeedError::InvalidData(
            "candlestick data is neither array nor object".to_string(),
        )),
    }
}

/// Map `{t, o, h, l, c, v}` to a bar.
pub fn parse_bar(item: &Value) -> FeedResult<CandlestickBar> {
    let field = |name: &str| {
        item.get(name)
            .ok_or_else(|| FeedError::InvalidData(format!("candlestick missing '{name}'")))
    };

    Ok(CandlestickBar {
        time: integer(field("t")?, "t")?,
        open: float(field("o")?, "o")?,
        high: float(field("h")?, "h")?,
        low: float(field("l")?, "l")?,
        close: float(field("c")?, "c")?,
        volume: float(field("v")?, "v")?,
    })
}

/// Decimal from a JSON string or number.
pub fn decimal(value: &Value, what: &str) -> FeedResult<Decimal> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return Err(FeedError::ParseError(format!("{what}: expected number, got {value}"))),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| FeedError::ParseError(format!("{what}: '{text}': {e}")))
}

/// Float from a JSON string or number.
pub fn float(value: &Value, what: &str) -> FeedResult<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|f| f.is_finite())
        .ok_or_else(|| FeedError::ParseError(format!("{what}: expected number, got {value}")))
}

/// Integer from a JSON string or number.
pub fn integer(value: &Value, what: &str) -> FeedResult<i64> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| FeedError::ParseError(format!("{what}: expected integer, got {value}")))
}

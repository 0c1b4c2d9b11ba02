//! Channel naming.
//!
//! Channel names are dot-separated:
//! - order book: `book.<instrument>[.<depth>]`
//! - candlestick: `candlestick.<timeframe>.<instrument>`
//!
//! Data frames may carry only the bare kind (`"book"`, `"candlestick"`) in
//! `result.channel`, so every component after the kind is optional.

use crate::candle::Timeframe;
use std::fmt;

const BOOK_PREFIX: &str = "book";
const CANDLESTICK_PREFIX: &str = "candlestick";

/// Build an order book channel name.
pub fn book_channel(instrument: &str, depth: Option<u32>) -> String {
    match depth {
        Some(depth) => format!("{BOOK_PREFIX}.{instrument}.{depth}"),
        None => format!("{BOOK_PREFIX}.{instrument}"),
    }
}

/// Build a candlestick channel name.
pub fn candlestick_channel(instrument: &str, timeframe: Timeframe) -> String {
    format!("{CANDLESTICK_PREFIX}.{timeframe}.{instrument}")
}

/// Typed view of a channel name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    Book {
        instrument: Option<String>,
        depth: Option<u32>,
    },
    Candlestick {
        timeframe: Option<Timeframe>,
        instrument: Option<String>,
    },
    Other(String),
}

impl Channel {
    /// Classify a channel name by prefix.
    pub fn parse(name: &str) -> Self {
        if name.starts_with(BOOK_PREFIX) {
            let mut parts = name.splitn(3, '.').skip(1);
            let instrument = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
            let depth = parts.next().and_then(|d| d.parse().ok());
            return Self::Book { instrument, depth };
        }

        if name.starts_with(CANDLESTICK_PREFIX) {
            let rest: Vec<&str> = name.splitn(3, '.').skip(1).collect();
            let (timeframe, instrument) = match rest.as_slice() {
                [tf, instrument] => (tf.parse().ok(), Some(instrument.to_string())),
                // A lone segment is a timeframe if it parses as one.
                [single] => match single.parse::<Timeframe>() {
                    Ok(tf) => (Some(tf), None),
                    Err(_) => (None, Some(single.to_string())),
                },
                _ => (None, None),
            };
            return Self::Candlestick {
                timeframe,
                instrument: instrument.filter(|s| !s.is_empty()),
            };
        }

        Self::Other(name.to_string())
    }

    /// Instrument named by the channel, if any.
    pub fn instrument(&self) -> Option<&str> {
        match self {
            Self::Book { instrument, .. } | Self::Candlestick { instrument, .. } => {
                instrument.as_deref()
            }
            Self::Other(_) => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Book { instrument, depth } => {
                f.write_str(BOOK_PREFIX)?;
                if let Some(instrument) = instrument {
                    write!(f, ".{instrument}")?;
                }
                if let Some(depth) = depth {
                    write!(f, ".{depth}")?;
                }
                Ok(())
            }
            Self::Candlestick {
                timeframe,
                instrument,
            } => {
                f.write_str(CANDLESTICK_PREFIX)?;
                if let Some(tf) = timeframe {
                    write!(f, ".{tf}")?;
                }
                if let Some(instrument) = instrument {
                    write!(f, ".{instrument}")?;
                }
                Ok(())
            }
            Self::Other(name) => f.write_str(name),
        }
    }
}

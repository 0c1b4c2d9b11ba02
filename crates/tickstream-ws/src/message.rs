//! WebSocket message types and dispatch routing.
//!
//! Outbound frames are `{id, method, params?}` requests. Inbound frames are
//! decoded leniently: a payload that is not valid JSON becomes a synthetic
//! `{method: "error", message: "Invalid message format"}` message instead of
//! an error, so a bad frame never disturbs the session.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use tickstream_core::{Channel, SeriesKey};
use tracing::warn;

pub const METHOD_SUBSCRIBE: &str = "subscribe";
pub const METHOD_UNSUBSCRIBE: &str = "unsubscribe";
pub const METHOD_HEARTBEAT: &str = "public/heartbeat";
pub const METHOD_RESPOND_HEARTBEAT: &str = "public/respond-heartbeat";
pub const METHOD_ERROR: &str = "error";
pub const INVALID_MESSAGE_FORMAT: &str = "Invalid message format";

// ============================================================================
// Outbound
// ============================================================================

/// Outbound request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsRequest {
    pub id: i64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<RequestParams>,
}

/// Channel list carried by subscribe/unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestParams {
    pub channels: Vec<String>,
}

impl WsRequest {
    pub fn subscribe(id: i64, channels: Vec<String>) -> Self {
        Self {
            id,
            method: METHOD_SUBSCRIBE.to_string(),
            params: Some(RequestParams { channels }),
        }
    }

    pub fn unsubscribe(id: i64, channels: Vec<String>) -> Self {
        Self {
            id,
            method: METHOD_UNSUBSCRIBE.to_string(),
            params: Some(RequestParams { channels }),
        }
    }

    /// Client-initiated liveness ping.
    pub fn heartbeat(id: i64) -> Self {
        Self {
            id,
            method: METHOD_HEARTBEAT.to_string(),
            params: None,
        }
    }

    /// Reply to a server heartbeat challenge; `id` must echo the challenge.
    pub fn respond_heartbeat(id: i64) -> Self {
        Self {
            id,
            method: METHOD_RESPOND_HEARTBEAT.to_string(),
            params: None,
        }
    }

    /// Channels listed in the request, if any.
    pub fn channels(&self) -> &[String] {
        self.params
            .as_ref()
            .map(|p| p.channels.as_slice())
            .unwrap_or_default()
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Request id source.
///
/// Ids only need to be distinct enough to read logs; the client does not
/// correlate responses. A counter seeded with the current Unix time in
/// milliseconds keeps them unique within a process and roughly time-ordered.
#[derive(Debug)]
pub struct RequestIdGenerator {
    next: AtomicI64,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(chrono::Utc::now().timestamp_millis())
    }

    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }

    pub fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Inbound message.
///
/// Every field is optional: heartbeats carry only `id`/`method`, data frames
/// carry `result`, and subscription acknowledgements carry `code`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WsMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultPayload>,
}

/// `result` object of a data frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    /// Channel kind or full name (`"book"`, `"candlestick.1m.BTC_USDT"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Full subscription name, when the feed sends it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument_name: Option<String>,
    /// Candlestick interval, when the feed sends it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Where an inbound message goes.
#[derive(Debug, Clone, PartialEq)]
pub enum Route<'a> {
    /// Server heartbeat challenge.
    Heartbeat { id: Option<i64> },
    /// Order book snapshot for an instrument.
    OrderBook {
        instrument: String,
        data: &'a serde_json::Value,
    },
    /// Candlestick snapshot or incremental bar.
    Candlestick {
        key: SeriesKey,
        data: &'a serde_json::Value,
    },
    /// Anything else: exposed as the last message, otherwise ignored.
    Other,
}

impl Route<'_> {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Heartbeat { .. } => "heartbeat",
            Self::OrderBook { .. } => "book",
            Self::Candlestick { .. } => "candlestick",
            Self::Other => "other",
        }
    }
}

impl WsMessage {
    /// Synthetic message produced for undecodable frames.
    pub fn invalid_format() -> Self {
        Self {
            method: Some(METHOD_ERROR.to_string()),
            message: Some(INVALID_MESSAGE_FORMAT.to_string()),
            ..Default::default()
        }
    }

    /// Whether this is the synthetic decode-failure message.
    pub fn is_invalid_format(&self) -> bool {
        self.method.as_deref() == Some(METHOD_ERROR)
            && self.message.as_deref() == Some(INVALID_MESSAGE_FORMAT)
    }

    pub fn is_heartbeat(&self) -> bool {
        self.method.as_deref() == Some(METHOD_HEARTBEAT)
    }

    /// Non-zero response code, if any.
    pub fn error_code(&self) -> Option<i64> {
        self.code.filter(|c| *c != 0)
    }

    /// Channel name a data frame arrived on (full subscription name preferred).
    pub fn channel_name(&self) -> Option<&str> {
        let result = self.result.as_ref()?;
        result
            .subscription
            .as_deref()
            .or(result.channel.as_deref())
    }

    /// Decide where this message goes.
    pub fn route(&self) -> Route<'_> {
        if self.is_heartbeat() {
            return Route::Heartbeat { id: self.id };
        }

        let Some(result) = self.result.as_ref() else {
            return Route::Other;
        };
        let Some(data) = result.data.as_ref() else {
            return Route::Other;
        };

        let kind = result
            .channel
            .as_deref()
            .or(result.subscription.as_deref())
            .unwrap_or_default();
        let channel = Channel::parse(kind);
        // The subscription name is the most specific description of the stream.
        let full = result
            .subscription
            .as_deref()
            .map(Channel::parse)
            .unwrap_or_else(|| channel.clone());

        match channel {
            Channel::Book { .. } => {
                let instrument = result
                    .instrument_name
                    .clone()
                    .or_else(|| channel.instrument().map(str::to_string))
                    .or_else(|| full.instrument().map(str::to_string));
                match instrument {
                    Some(instrument) => Route::OrderBook { instrument, data },
                    None => {
                        warn!(channel = kind, "Book frame without instrument, ignoring");
                        Route::Other
                    }
                }
            }
            Channel::Candlestick {
                timeframe,
                instrument,
            } => {
                let (full_tf, full_instrument) = match full {
                    Channel::Candlestick {
                        timeframe,
                        instrument,
                    } => (timeframe, instrument),
                    _ => (None, None),
                };
                let timeframe = timeframe
                    .or(full_tf)
                    .or_else(|| result.interval.as_deref().and_then(|i| i.parse().ok()))
                    .unwrap_or_default();
                let instrument = instrument
                    .or(full_instrument)
                    .or_else(|| result.instrument_name.clone());
                match instrument {
                    Some(instrument) => Route::Candlestick {
                        key: SeriesKey::new(instrument, timeframe),
                        data,
                    },
                    None => {
                        warn!(channel = kind, "Candlestick frame without instrument, ignoring");
                        Route::Other
                    }
                }
            }
            Channel::Other(_) => Route::Other,
        }
    }
}

/// Decode an inbound text frame.
///
/// Never fails: malformed input is logged and mapped to
/// [`WsMessage::invalid_format`].
pub fn decode(text: &str) -> WsMessage {
    match serde_json::from_str::<WsMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, raw = %truncate(text, 256), "Failed to parse WebSocket message");
            WsMessage::invalid_format()
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

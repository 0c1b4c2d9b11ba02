//! Prometheus metrics for tickstream.
//!
//! Covers:
//! - Connection state and reconnects
//! - Inbound frames by route, decode errors
//! - Heartbeat pings and challenge replies
//! - Projector updates and rejected payloads
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A failure means duplicate metric
//! names, a startup-time programming error. It only happens during static
//! initialization, never on the hot path.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_int_counter,
    register_int_counter_vec, register_int_gauge, CounterVec, Encoder, Gauge, GaugeVec,
    IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

/// WebSocket connection state (1 = connected, 0 = otherwise).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "tickstream_ws_connected",
        "WebSocket connection state (1=connected)"
    )
    .unwrap()
});

/// Session state machine current state.
/// Labels: state (disconnected/connecting/connected/reconnecting)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tickstream_ws_state",
        "Session state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Total reconnection attempts scheduled.
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickstream_ws_reconnect_total",
        "Total WebSocket reconnection attempts scheduled",
        &["reason"]
    )
    .unwrap()
});

/// Inbound frames by route.
/// Labels: route (heartbeat/book/candlestick/other/invalid)
pub static FRAMES_RECEIVED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickstream_frames_received_total",
        "Inbound frames by dispatch route",
        &["route"]
    )
    .unwrap()
});

/// Inbound frames that failed to decode.
pub static DECODE_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tickstream_decode_errors_total",
        "Inbound frames that were not valid JSON messages"
    )
    .unwrap()
});

/// Heartbeat frames sent.
/// Labels: kind (ping/reply)
pub static HEARTBEATS_SENT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickstream_heartbeats_sent_total",
        "Heartbeat frames sent (client pings and challenge replies)",
        &["kind"]
    )
    .unwrap()
});

/// Channels currently in the subscription set.
pub static SUBSCRIPTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "tickstream_subscriptions_active",
        "Channels currently in the subscription set"
    )
    .unwrap()
});

/// Projector updates applied.
/// Labels: kind (book/candle_snapshot/candle_update)
pub static FEED_UPDATES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickstream_feed_updates_total",
        "Projector updates applied",
        &["kind"]
    )
    .unwrap()
});

/// Payloads rejected by the projectors.
/// Labels: kind (book/candle)
pub static FEED_REJECTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickstream_feed_rejected_total",
        "Data payloads rejected by the projectors",
        &["kind"]
    )
    .unwrap()
});

const STATES: [&str; 4] = ["disconnected", "connecting", "connected", "reconnecting"];

/// Metrics helper.
pub struct Metrics;

impl Metrics {
    /// Record WebSocket connected.
    pub fn ws_connected() {
        WS_CONNECTED.set(1.0);
    }

    /// Record WebSocket disconnected.
    pub fn ws_disconnected() {
        WS_CONNECTED.set(0.0);
    }

    /// Set session state. Only the active state is 1.
    pub fn ws_state_set(state: &str) {
        for s in STATES {
            WS_STATE.with_label_values(&[s]).set(0.0);
        }
        WS_STATE.with_label_values(&[state]).set(1.0);
    }

    /// Record a scheduled reconnection.
    pub fn ws_reconnect(reason: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Record an inbound frame by its dispatch route.
    pub fn frame_received(route: &str) {
        FRAMES_RECEIVED_TOTAL.with_label_values(&[route]).inc();
    }

    /// Record an undecodable inbound frame.
    pub fn decode_error() {
        DECODE_ERRORS_TOTAL.inc();
        FRAMES_RECEIVED_TOTAL.with_label_values(&["invalid"]).inc();
    }

    /// Record a client-initiated heartbeat.
    pub fn heartbeat_sent() {
        HEARTBEATS_SENT_TOTAL.with_label_values(&["ping"]).inc();
    }

    /// Record a reply to a server heartbeat challenge.
    pub fn heartbeat_replied() {
        HEARTBEATS_SENT_TOTAL.with_label_values(&["reply"]).inc();
    }

    /// Set the subscription set size.
    pub fn subscriptions_active(count: usize) {
        SUBSCRIPTIONS_ACTIVE.set(count as i64);
    }

    /// Record an applied projector update.
    pub fn feed_update(kind: &str) {
        FEED_UPDATES_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Record a rejected data payload.
    pub fn feed_rejected(kind: &str) {
        FEED_REJECTED_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn gather_text() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let families = prometheus::gather();
        let mut buf = Vec::new();
        encoder
            .encode(&families, &mut buf)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

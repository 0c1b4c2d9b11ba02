//! Heartbeat management for WebSocket connections.
//!
//! Two halves:
//! - a periodic client ping (`public/heartbeat`) while connected;
//! - an immediate `public/respond-heartbeat` reply to every server challenge.
//!
//! Liveness is not judged here: a dead connection surfaces as a transport
//! close or error.

use crate::message::{RequestIdGenerator, WsRequest};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

/// Heartbeat manager for WebSocket connection health.
pub struct HeartbeatManager {
    /// Ping interval.
    interval_ms: u64,
    /// Last client ping sent.
    last_ping: RwLock<Option<DateTime<Utc>>>,
    /// Last server challenge answered.
    last_challenge: RwLock<Option<DateTime<Utc>>>,
    /// Last message received (any message).
    last_message: RwLock<Option<DateTime<Utc>>>,
    pings_sent: AtomicU64,
    replies_sent: AtomicU64,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_ping: RwLock::new(None),
            last_challenge: RwLock::new(None),
            last_message: RwLock::new(None),
            pings_sent: AtomicU64::new(0),
            replies_sent: AtomicU64::new(0),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Reset heartbeat state (called on connection).
    pub fn reset(&self) {
        *self.last_ping.write() = None;
        *self.last_challenge.write() = None;
        *self.last_message.write() = Some(Utc::now());
    }

    /// Timer for client pings. The first tick fires one full interval after
    /// the call, not immediately.
    pub fn start_timer(&self) -> Interval {
        let period = self.interval().max(Duration::from_millis(1));
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    }

    /// Build the next client ping and record it.
    pub fn ping(&self, ids: &RequestIdGenerator) -> WsRequest {
        let request = WsRequest::heartbeat(ids.next_id());
        *self.last_ping.write() = Some(Utc::now());
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
        debug!(id = request.id, "Heartbeat ping");
        request
    }

    /// Build the reply to a server challenge and record it.
    pub fn reply(&self, challenge_id: i64) -> WsRequest {
        *self.last_challenge.write() = Some(Utc::now());
        self.replies_sent.fetch_add(1, Ordering::Relaxed);
        debug!(id = challenge_id, "Answering heartbeat challenge");
        WsRequest::respond_heartbeat(challenge_id)
    }

    /// Record that any message was received.
    pub fn record_message(&self) {
        *self.last_message.write() = Some(Utc::now());
    }

    /// Time since last message, if any was received.
    pub fn time_since_last_message_ms(&self) -> Option<i64> {
        self.last_message
            .read()
            .map(|t| (Utc::now() - t).num_milliseconds())
    }

    /// Get heartbeat statistics.
    pub fn stats(&self) -> HeartbeatStats {
        HeartbeatStats {
            last_ping: *self.last_ping.read(),
            last_challenge: *self.last_challenge.read(),
            last_message: *self.last_message.read(),
            pings_sent: self.pings_sent.load(Ordering::Relaxed),
            replies_sent: self.replies_sent.load(Ordering::Relaxed),
        }
    }
}

/// Heartbeat statistics.
#[derive(Debug, Clone)]
pub struct HeartbeatStats {
    pub last_ping: Option<DateTime<Utc>>,
    pub last_challenge: Option<DateTime<Utc>>,
    pub last_message: Option<DateTime<Utc>>,
    /// Lifetime count, not reset on reconnect.
    pub pings_sent: u64,
    /// Lifetime count, not reset on reconnect.
    pub replies_sent: u64,
}

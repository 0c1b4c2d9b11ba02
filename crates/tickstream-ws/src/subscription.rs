//! Subscription management for WebSocket channels.
//!
//! The subscription set outlives individual connections: it is replayed as a
//! single subscribe frame after every successful connect, and only shrinks on
//! unsubscribe or shutdown.
//!
//! Also tracks, per subscribed channel, when data last arrived since the most
//! recent connect, so callers can tell which channels are live again after a
//! reconnect.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tickstream_telemetry::Metrics;
use tracing::{debug, info};

/// Per-channel data arrival since the last connect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStatus {
    /// First data frame received.
    pub first_data: Option<DateTime<Utc>>,
    /// Last data frame received.
    pub last_data: Option<DateTime<Utc>>,
    /// Data frames received.
    pub messages: u64,
}

impl ChannelStatus {
    pub fn is_live(&self) -> bool {
        self.first_data.is_some()
    }

    /// Age of the most recent data in milliseconds.
    pub fn data_age_ms(&self) -> Option<i64> {
        self.last_data.map(|t| (Utc::now() - t).num_milliseconds())
    }
}

/// Subscription manager.
pub struct SubscriptionManager {
    /// Set of active subscriptions.
    subscriptions: RwLock<HashSet<String>>,
    /// Per-channel data arrival (subscribed channels only).
    status: RwLock<HashMap<String, ChannelStatus>>,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashSet::new()),
            status: RwLock::new(HashMap::new()),
        }
    }

    /// Add channels to the set.
    ///
    /// Returns the supplied channels, deduplicated in first-seen order: the
    /// content of the subscribe frame to send if connected.
    pub fn add(&self, channels: &[String]) -> Vec<String> {
        let requested = dedup(channels);
        let mut subs = self.subscriptions.write();
        for channel in &requested {
            if subs.insert(channel.clone()) {
                debug!(%channel, "Subscription added");
            }
        }
        Metrics::subscriptions_active(subs.len());
        requested
    }

    /// Remove channels from the set.
    ///
    /// Returns the supplied channels, deduplicated: the content of the
    /// unsubscribe frame to send if connected.
    pub fn remove(&self, channels: &[String]) -> Vec<String> {
        let requested = dedup(channels);
        {
            let mut subs = self.subscriptions.write();
            for channel in &requested {
                if subs.remove(channel) {
                    debug!(%channel, "Subscription removed");
                }
            }
            Metrics::subscriptions_active(subs.len());
        }
        let mut status = self.status.write();
        for channel in &requested {
            status.remove(channel);
        }
        requested
    }

    /// Channels to resubscribe after a connect, or `None` if the set is empty.
    ///
    /// Sorted so the replay frame is stable across reconnects.
    pub fn replay_channels(&self) -> Option<Vec<String>> {
        let channels = self.active_subscriptions();
        if channels.is_empty() {
            None
        } else {
            Some(channels)
        }
    }

    /// Get list of active subscriptions (sorted).
    pub fn active_subscriptions(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.subscriptions.read().iter().cloned().collect();
        channels.sort();
        channels
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.subscriptions.read().contains(channel)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }

    /// Drop every subscription (explicit shutdown).
    pub fn clear(&self) {
        self.subscriptions.write().clear();
        self.status.write().clear();
        Metrics::subscriptions_active(0);
        info!("Subscriptions cleared");
    }

    /// Record a data frame on `channel`. Unsubscribed channels are ignored.
    pub fn handle_message(&self, channel: &str) {
        if !self.contains(channel) {
            return;
        }
        let now = Utc::now();
        let mut status = self.status.write();
        let entry = status.entry(channel.to_string()).or_default();
        if entry.first_data.is_none() {
            entry.first_data = Some(now);
            info!(%channel, "Channel live");
        }
        entry.last_data = Some(now);
        entry.messages += 1;
    }

    /// Data arrival for one channel since the last connect.
    pub fn channel_status(&self, channel: &str) -> Option<ChannelStatus> {
        self.status.read().get(channel).cloned()
    }

    /// Subscribed channels with no data since the last connect (sorted).
    pub fn pending_channels(&self) -> Vec<String> {
        let status = self.status.read();
        self.active_subscriptions()
            .into_iter()
            .filter(|c| !status.get(c).is_some_and(ChannelStatus::is_live))
            .collect()
    }

    /// Reset per-channel status (called on reconnection).
    pub fn reset_ready_state(&self) {
        self.status.write().clear();
        debug!("Channel status reset");
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

fn dedup(channels: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(channels.len());
    channels
        .iter()
        .filter(|c| seen.insert(c.as_str()))
        .cloned()
        .collect()
}

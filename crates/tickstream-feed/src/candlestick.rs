//! Candlestick projection.
//!
//! One series per (instrument, timeframe). The first array payload for a
//! series is its initial history; later arrays are ignored. Object payloads
//! upsert a single bar: same open time as the last bar replaces it, a newer
//! time appends. Bars never go backwards in time.

use crate::error::FeedResult;
use crate::parser::{parse_candles, CandlePayload};
use dashmap::DashMap;
use std::sync::Arc;
use tickstream_core::{CandlestickBar, SeriesKey, Timeframe};
use tickstream_telemetry::Metrics;
use tracing::{debug, info, warn};

/// What an applied payload did to its series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleOutcome {
    /// Initial history stored (bar count after applying).
    SnapshotApplied(usize),
    /// Series already had its initial history.
    SnapshotIgnored,
    /// Last bar replaced in place.
    Replaced,
    /// New bar appended.
    Appended,
    /// Bar older than the last bar, dropped.
    Stale,
}

impl CandleOutcome {
    /// Whether the series changed.
    pub fn changed(&self) -> bool {
        !matches!(self, Self::SnapshotIgnored | Self::Stale)
    }
}

#[derive(Debug, Default)]
struct SeriesEntry {
    bars: Arc<Vec<CandlestickBar>>,
    initial_received: bool,
}

/// Per-series candlestick store.
#[derive(Debug, Default)]
pub struct CandlestickProjector {
    series: DashMap<SeriesKey, SeriesEntry>,
    /// Timeframe of the series each instrument last changed.
    latest: DashMap<String, Timeframe>,
}

impl CandlestickProjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `data` and apply it to the series. A payload that fails to parse
    /// leaves the series untouched.
    pub fn apply(&self, key: &SeriesKey, data: &serde_json::Value) -> FeedResult<CandleOutcome> {
        match parse_candles(data) {
            Ok(CandlePayload::Snapshot(bars)) => Ok(self.apply_snapshot(key, bars)),
            Ok(CandlePayload::Incremental(bar)) => Ok(self.apply_bar(key, bar)),
            Err(e) => {
                Metrics::feed_rejected("candle");
                Err(e)
            }
        }
    }

    /// Store the initial history for a series, once.
    ///
    /// Bars that do not strictly increase in time are dropped. Bars already
    /// appended by incremental updates and newer than the history are kept.
    pub fn apply_snapshot(&self, key: &SeriesKey, bars: Vec<CandlestickBar>) -> CandleOutcome {
        let mut entry = self.series.entry(key.clone()).or_default();
        if entry.initial_received {
            debug!(%key, "Candlestick snapshot already applied, ignoring");
            return CandleOutcome::SnapshotIgnored;
        }

        let received = bars.len();
        let mut history: Vec<CandlestickBar> = Vec::with_capacity(received);
        for bar in bars {
            match history.last() {
                Some(last) if bar.time <= last.time => {
                    warn!(%key, time = bar.time, last = last.time, "Out-of-order bar in snapshot dropped");
                }
                _ => history.push(bar),
            }
        }

        let newest = history.last().map(|b| b.time);
        history.extend(
            entry
                .bars
                .iter()
                .filter(|b| newest.map_or(true, |t| b.time > t))
                .copied(),
        );

        let len = history.len();
        entry.bars = Arc::new(history);
        entry.initial_received = true;
        self.touch(key);
        Metrics::feed_update("candle_snapshot");
        info!(%key, received, stored = len, "Candlestick snapshot applied");
        CandleOutcome::SnapshotApplied(len)
    }

    /// Upsert one bar at the end of the series.
    pub fn apply_bar(&self, key: &SeriesKey, bar: CandlestickBar) -> CandleOutcome {
        let mut entry = self.series.entry(key.clone()).or_default();
        let last_time = entry.bars.last().map(|b| b.time);

        let outcome = match last_time {
            Some(last) if bar.time == last => {
                let bars = Arc::make_mut(&mut entry.bars);
                if let Some(slot) = bars.last_mut() {
                    *slot = bar;
                }
                CandleOutcome::Replaced
            }
            Some(last) if bar.time < last => {
                warn!(%key, time = bar.time, last, "Stale candlestick update dropped");
                return CandleOutcome::Stale;
            }
            _ => {
                Arc::make_mut(&mut entry.bars).push(bar);
                CandleOutcome::Appended
            }
        };

        self.touch(key);
        Metrics::feed_update("candle_update");
        debug!(%key, time = bar.time, close = bar.close, ?outcome, "Candlestick update");
        outcome
    }

    /// Series for `key`, empty if unseen.
    pub fn series(&self, key: &SeriesKey) -> Arc<Vec<CandlestickBar>> {
        self.series
            .get(key)
            .map(|entry| entry.bars.clone())
            .unwrap_or_default()
    }

    /// Series for `instrument`: the default timeframe when it exists,
    /// otherwise the instrument's most recently changed series. Empty if the
    /// instrument is unseen.
    pub fn instrument_series(&self, instrument: &str) -> Arc<Vec<CandlestickBar>> {
        let default = SeriesKey::new(instrument, Timeframe::default());
        if self.series.contains_key(&default) {
            return self.series(&default);
        }
        let latest = self.latest.get(instrument).map(|tf| *tf.value());
        latest
            .map(|tf| self.series(&SeriesKey::new(instrument, tf)))
            .unwrap_or_default()
    }

    fn touch(&self, key: &SeriesKey) {
        self.latest.insert(key.instrument.clone(), key.timeframe);
    }

    pub fn last_bar(&self, key: &SeriesKey) -> Option<CandlestickBar> {
        self.series.get(key).and_then(|entry| entry.bars.last().copied())
    }

    /// Whether the series has received its initial history.
    pub fn has_snapshot(&self, key: &SeriesKey) -> bool {
        self.series
            .get(key)
            .is_some_and(|entry| entry.initial_received)
    }

    /// Known series keys, sorted by display name.
    pub fn keys(&self) -> Vec<SeriesKey> {
        let mut keys: Vec<SeriesKey> = self.series.iter().map(|e| e.key().clone()).collect();
        keys.sort_by_key(|k| k.to_string());
        keys
    }
}

//! Application configuration.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use tickstream_core::{book_channel, candlestick_channel, Timeframe};
use tickstream_ws::ConnectionConfig;

/// One instrument to follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Instrument name (e.g., "BTC_USDT").
    pub instrument: String,
    /// Book depth requested in the channel name. `None` subscribes to
    /// `book.<instrument>` without a depth suffix.
    #[serde(default = "default_book_depth")]
    pub book_depth: Option<u32>,
    /// Candlestick timeframes to follow (e.g., ["1m", "1h"]).
    #[serde(default)]
    pub timeframes: Vec<Timeframe>,
}

fn default_book_depth() -> Option<u32> {
    Some(10)
}

impl MarketConfig {
    /// Channels this market subscribes to.
    pub fn channels(&self) -> Vec<String> {
        std::iter::once(book_channel(&self.instrument, self.book_depth))
            .chain(
                self.timeframes
                    .iter()
                    .map(|tf| candlestick_channel(&self.instrument, *tf)),
            )
            .collect()
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// WebSocket session settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Markets to subscribe to.
    #[serde(default)]
    pub markets: Vec<MarketConfig>,
    /// Summary log interval (ms). Default: 10,000.
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
}

fn default_report_interval_ms() -> u64 {
    10_000
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config {path}: {e}")))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the session cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        let url = &self.connection.url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(AppError::Config(format!(
                "connection.url must be a ws:// or wss:// URL, got '{url}'"
            )));
        }
        if self.connection.heartbeat_interval_ms == 0 {
            return Err(AppError::Config(
                "connection.heartbeat_interval_ms must be positive".to_string(),
            ));
        }
        if self.report_interval_ms == 0 {
            return Err(AppError::Config(
                "report_interval_ms must be positive".to_string(),
            ));
        }
        if let Some(market) = self.markets.iter().find(|m| m.instrument.trim().is_empty()) {
            return Err(AppError::Config(format!(
                "market with empty instrument name: {market:?}"
            )));
        }
        Ok(())
    }

    /// Every channel the configured markets subscribe to.
    pub fn channels(&self) -> Vec<String> {
        self.markets.iter().flat_map(MarketConfig::channels).collect()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            markets: Vec::new(),
            report_interval_ms: default_report_interval_ms(),
        }
    }
}

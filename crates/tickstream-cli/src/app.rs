//! Main application logic.
//!
//! Owns one [`MarketDataClient`], subscribes the configured markets, and runs
//! the event loop until ctrl-c, an external cancel, or a terminal disconnect.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use std::collections::HashMap;
use std::time::Duration;
use tickstream_core::SeriesKey;
use tickstream_feed::{FeedUpdate, MarketDataClient};
use tickstream_telemetry::Metrics;
use tickstream_ws::ConnectionState;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Main application.
pub struct Application {
    config: AppConfig,
    shutdown: CancellationToken,
}

impl Application {
    /// Create a new application. Fails on invalid configuration.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            shutdown: CancellationToken::new(),
        })
    }

    /// Cancelling this token stops [`Application::run`] as ctrl-c would.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Connect to the configured endpoint and run until stopped.
    pub async fn run(&self) -> AppResult<()> {
        let client = MarketDataClient::spawn(self.config.connection.clone());
        self.run_with_client(client).await
    }

    /// Run the event loop on an existing client. The client is shut down
    /// before this returns.
    pub async fn run_with_client(&self, client: MarketDataClient) -> AppResult<()> {
        let channels = self.config.channels();
        info!(
            url = %self.config.connection.url,
            markets = self.config.markets.len(),
            channels = channels.len(),
            "Starting application"
        );

        let result = self.event_loop(&client, &channels).await;

        self.report(&client);
        client.shutdown().await;

        match Metrics::gather_text() {
            Ok(text) => debug!(metrics = %text, "Final metrics"),
            Err(e) => warn!(error = %e, "Failed to gather metrics"),
        }
        result
    }

    async fn event_loop(&self, client: &MarketDataClient, channels: &[String]) -> AppResult<()> {
        let mut state_rx = client.state_receiver();
        let mut updates = client.updates();

        client.subscribe(channels)?;
        client.connect()?;

        let mut report_interval =
            tokio::time::interval(Duration::from_millis(self.config.report_interval_ms));
        // First tick completes immediately.
        report_interval.tick().await;

        let mut update_counts: HashMap<String, u64> = HashMap::new();
        state_rx.borrow_and_update();

        info!("Entering main event loop");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    return Ok(());
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    return Ok(());
                }

                changed = state_rx.changed() => {
                    if changed.is_err() {
                        warn!("Connection task stopped");
                        return Ok(());
                    }
                    let state = *state_rx.borrow_and_update();
                    debug!(%state, "Observed connection state");
                    // Only the connection task disconnects on its own, and only
                    // once reconnects are exhausted.
                    if state == ConnectionState::Disconnected {
                        let attempts = client.handle().reconnect_attempts();
                        error!(attempts, "Reconnect attempts exhausted, giving up");
                        return Err(AppError::ConnectionLost(attempts));
                    }
                }

                update = updates.recv() => match update {
                    Ok(update) => {
                        let instrument = match &update {
                            FeedUpdate::OrderBook(instrument) => instrument,
                            FeedUpdate::Candles(key) => &key.instrument,
                        };
                        *update_counts.entry(instrument.clone()).or_default() += 1;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Update receiver lagged");
                    }
                    Err(RecvError::Closed) => {
                        warn!("Update channel closed");
                        return Ok(());
                    }
                },

                _ = report_interval.tick() => {
                    info!(
                        state = %client.state(),
                        subscriptions = client.handle().active_subscriptions().len(),
                        ?update_counts,
                        "Periodic summary"
                    );
                    self.report(client);
                    update_counts.clear();
                }
            }
        }
    }

    /// Log the projected state of every configured market.
    fn report(&self, client: &MarketDataClient) {
        for market in &self.config.markets {
            let instrument = market.instrument.as_str();
            let book = client.order_book(instrument);
            info!(
                instrument,
                best_bid = ?book.best_bid().map(|l| l.price),
                best_ask = ?book.best_ask().map(|l| l.price),
                spread = ?book.spread(),
                age_ms = ?client.feed().books().book_age_ms(instrument),
                "Order book"
            );

            for timeframe in &market.timeframes {
                let key = SeriesKey::new(instrument, *timeframe);
                let bars = client.feed().candles().series(&key);
                info!(
                    instrument,
                    timeframe = %timeframe.as_str(),
                    bars = bars.len(),
                    last_close = ?bars.last().map(|b| b.close),
                    "Candlesticks"
                );
            }
        }
    }
}

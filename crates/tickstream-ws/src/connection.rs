//! WebSocket connection manager.
//!
//! Handles connection lifecycle, automatic reconnection with exponential backoff,
//! heartbeats, and subscription restoration after reconnection.
//!
//! A single [`ConnectionManager`] task owns the transport and every timer. The
//! cloneable [`ConnectionHandle`] queues commands to it and reads the state it
//! publishes. Timers and transport events carry the connection epoch they were
//! created under; [`ConnectionHandle::disconnect`] bumps the epoch before the
//! task sees the command, so nothing scheduled earlier can fire afterwards.

use crate::error::{WsError, WsResult};
use crate::heartbeat::{HeartbeatManager, HeartbeatStats};
use crate::message::{decode, RequestIdGenerator, Route, WsMessage, WsRequest};
use crate::subscription::SubscriptionManager;
use crate::transport::{Connector, TransportEvent, TransportLink};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tickstream_core::SeriesKey;
use tickstream_telemetry::Metrics;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_URL: &str = "wss://stream.crypto.com/exchange/v1/market";

/// Timer ceiling for backoff delays too large to schedule.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(365 * 24 * 3600);

/// Connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// WebSocket URL.
    #[serde(default = "default_url")]
    pub url: String,
    /// Reconnects scheduled after a loss before giving up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Client heartbeat interval.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Upper bound on opening the transport.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_url() -> String {
    DEFAULT_URL.to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_base_delay_ms() -> u64 {
    5_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delay before reconnect number `attempt + 1`: `base_ms * 2^attempt`.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.min(63);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

/// Receives decoded market data. Called on the connection task, so
/// implementations must not block.
pub trait FeedSink: Send + Sync + 'static {
    fn on_order_book(&self, instrument: &str, data: &serde_json::Value);
    fn on_candlestick(&self, key: &SeriesKey, data: &serde_json::Value);
}

/// Sink that discards market data.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl FeedSink for NoopSink {
    fn on_order_book(&self, _instrument: &str, _data: &serde_json::Value) {}
    fn on_candlestick(&self, _key: &SeriesKey, _data: &serde_json::Value) {}
}

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Send(WsRequest),
}

#[derive(Debug, Clone, Copy)]
struct PendingReconnect {
    at: Instant,
    epoch: u64,
}

/// State shared between the task and its handles.
struct Shared {
    state: watch::Sender<ConnectionState>,
    last_message: watch::Sender<Option<WsMessage>>,
    subscriptions: SubscriptionManager,
    heartbeat: HeartbeatManager,
    ids: RequestIdGenerator,
    attempts: AtomicU32,
    epoch: AtomicU64,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}

/// Cloneable control surface of a running [`ConnectionManager`].
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    shutdown_token: CancellationToken,
}

impl ConnectionHandle {
    /// Open the connection. No-op while connecting or connected.
    pub fn connect(&self) -> WsResult<()> {
        self.send(Command::Connect)
    }

    /// Close the connection without reconnecting.
    ///
    /// Pending reconnect and heartbeat timers are invalidated before this
    /// returns.
    pub fn disconnect(&self) -> WsResult<()> {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        self.send(Command::Disconnect)
    }

    /// Disconnect, forget every subscription, and stop the task.
    pub fn shutdown(&self) {
        info!("Connection shutdown requested");
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        self.shared.subscriptions.clear();
        self.shutdown_token.cancel();
    }

    /// Add channels to the subscription set.
    ///
    /// A subscribe frame carrying exactly these channels is sent if connected;
    /// otherwise they go out with the replay on the next connect.
    pub fn subscribe(&self, channels: &[String]) -> WsResult<()> {
        let frame = self.shared.subscriptions.add(channels);
        if frame.is_empty() {
            return Ok(());
        }
        if !self.is_connected() {
            warn!(?frame, "Not connected, subscription deferred until connect");
            return Ok(());
        }
        let request = WsRequest::subscribe(self.shared.ids.next_id(), frame);
        self.send(Command::Send(request))
    }

    /// Remove channels from the subscription set, sending an unsubscribe frame
    /// if connected.
    pub fn unsubscribe(&self, channels: &[String]) -> WsResult<()> {
        let frame = self.shared.subscriptions.remove(channels);
        if frame.is_empty() {
            return Ok(());
        }
        if !self.is_connected() {
            warn!(?frame, "Not connected, unsubscribe recorded locally only");
            return Ok(());
        }
        let request = WsRequest::unsubscribe(self.shared.ids.next_id(), frame);
        self.send(Command::Send(request))
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Most recently accepted inbound message (including the synthetic
    /// decode-failure message).
    pub fn last_message(&self) -> Option<WsMessage> {
        self.shared.last_message.borrow().clone()
    }

    pub fn last_message_receiver(&self) -> watch::Receiver<Option<WsMessage>> {
        self.shared.last_message.subscribe()
    }

    /// Reconnects scheduled since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Current subscription set, sorted.
    pub fn active_subscriptions(&self) -> Vec<String> {
        self.shared.subscriptions.active_subscriptions()
    }

    /// Subscribed channels with no data since the last connect.
    pub fn pending_channels(&self) -> Vec<String> {
        self.shared.subscriptions.pending_channels()
    }

    pub fn heartbeat_stats(&self) -> HeartbeatStats {
        self.shared.heartbeat.stats()
    }

    /// Whether the connection task has stopped.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    fn send(&self, command: Command) -> WsResult<()> {
        self.commands
            .send(command)
            .map_err(|_| WsError::SessionStopped)
    }
}

/// WebSocket connection manager.
pub struct ConnectionManager<C: Connector> {
    config: ConnectionConfig,
    connector: C,
    sink: Arc<dyn FeedSink>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    shutdown_token: CancellationToken,
    link: Option<TransportLink>,
    /// Epoch the current link was opened under.
    link_epoch: u64,
    heartbeat_timer: Option<Interval>,
    reconnect_at: Option<PendingReconnect>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a new connection manager and its handle. Nothing happens until
    /// [`run`](Self::run) is polled and `connect()` is called.
    pub fn new(
        config: ConnectionConfig,
        connector: C,
        sink: Arc<dyn FeedSink>,
    ) -> (Self, ConnectionHandle) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let shutdown_token = CancellationToken::new();
        let shared = Arc::new(Shared {
            state: watch::Sender::new(ConnectionState::Disconnected),
            last_message: watch::Sender::new(None),
            subscriptions: SubscriptionManager::new(),
            heartbeat: HeartbeatManager::new(config.heartbeat_interval_ms),
            ids: RequestIdGenerator::new(),
            attempts: AtomicU32::new(0),
            epoch: AtomicU64::new(0),
        });

        let handle = ConnectionHandle {
            commands: commands_tx,
            shared: shared.clone(),
            shutdown_token: shutdown_token.clone(),
        };

        let manager = Self {
            config,
            connector,
            sink,
            shared,
            commands: commands_rx,
            shutdown_token,
            link: None,
            link_epoch: 0,
            heartbeat_timer: None,
            reconnect_at: None,
        };

        (manager, handle)
    }

    /// Run until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        info!(url = %self.config.url, "Connection manager started");
        Metrics::ws_state_set(ConnectionState::Disconnected.as_str());

        loop {
            tokio::select! {
                biased;

                () = self.shutdown_token.cancelled() => {
                    self.close_session();
                    break;
                }

                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            info!("All connection handles dropped");
                            self.shared.subscriptions.clear();
                            self.close_session();
                            break;
                        }
                    }
                }

                event = next_event(self.link.as_mut()) => {
                    self.handle_event(event).await;
                }

                () = sleep_until(self.reconnect_at.map(|r| r.at)) => {
                    self.handle_reconnect_timer().await;
                }

                _ = tick(self.heartbeat_timer.as_mut()) => {
                    self.send_heartbeat().await;
                }
            }
        }

        info!("Connection manager stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                let state = self.shared.state();
                if matches!(
                    state,
                    ConnectionState::Connecting | ConnectionState::Connected
                ) {
                    debug!(%state, "Connect ignored");
                    return;
                }
                // A user connect starts a fresh retry budget.
                self.reconnect_at = None;
                self.shared.attempts.store(0, Ordering::SeqCst);
                self.open().await;
            }
            Command::Disconnect => {
                info!("Disconnect requested");
                self.close_session();
            }
            Command::Send(request) => {
                if self.shared.state() != ConnectionState::Connected {
                    debug!(method = %request.method, "Not connected, frame left to replay");
                    return;
                }
                if let Err(e) = self.send_request(&request).await {
                    warn!(error = %e, method = %request.method, "Failed to send request");
                }
            }
        }
    }

    async fn open(&mut self) {
        let epoch = self.shared.epoch();
        self.set_state(ConnectionState::Connecting);
        info!(url = %self.config.url, "Connecting to WebSocket");

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let result = tokio::select! {
            result = tokio::time::timeout(timeout, self.connector.connect(&self.config.url)) => {
                result.unwrap_or(Err(WsError::ConnectTimeout(self.config.connect_timeout_ms)))
            }
            () = self.shutdown_token.cancelled() => return,
        };

        if self.shared.epoch() != epoch {
            debug!("Connect superseded by disconnect, discarding");
            return;
        }

        match result {
            Ok(link) => self.on_open(link, epoch).await,
            Err(e) => {
                error!(error = %e, "WebSocket connect failed");
                self.on_lost("connect_failed");
            }
        }
    }

    async fn on_open(&mut self, link: TransportLink, epoch: u64) {
        self.link = Some(link);
        self.link_epoch = epoch;
        self.shared.attempts.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);
        Metrics::ws_connected();
        info!("WebSocket connected");

        self.shared.heartbeat.reset();
        self.heartbeat_timer = Some(self.shared.heartbeat.start_timer());

        // State is Connected before the snapshot, so a concurrent subscribe
        // either lands in the replay or sends its own frame.
        self.shared.subscriptions.reset_ready_state();
        if let Some(channels) = self.shared.subscriptions.replay_channels() {
            info!(count = channels.len(), "Restoring subscriptions");
            let request = WsRequest::subscribe(self.shared.ids.next_id(), channels);
            if let Err(e) = self.send_request(&request).await {
                warn!(error = %e, "Failed to restore subscriptions");
            }
        }
    }

    /// Transport failed or closed: schedule a reconnect or give up.
    fn on_lost(&mut self, reason: &str) {
        self.link = None;
        self.heartbeat_timer = None;
        Metrics::ws_disconnected();
        self.set_state(ConnectionState::Reconnecting);

        let attempt = self.shared.attempts.load(Ordering::SeqCst);
        if attempt < self.config.max_reconnect_attempts {
            let delay = backoff_delay(self.config.reconnect_base_delay_ms, attempt);
            warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                reason,
                "Reconnecting"
            );
            let now = Instant::now();
            self.reconnect_at = Some(PendingReconnect {
                at: now.checked_add(delay).unwrap_or(now + MAX_RECONNECT_DELAY),
                epoch: self.shared.epoch(),
            });
            self.shared.attempts.store(attempt + 1, Ordering::SeqCst);
            Metrics::ws_reconnect(reason);
        } else {
            error!(attempts = attempt, "Max reconnection attempts reached");
            self.reconnect_at = None;
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Tear down everything without scheduling a reconnect.
    fn close_session(&mut self) {
        self.reconnect_at = None;
        self.heartbeat_timer = None;
        if self.link.take().is_some() {
            info!("Closing WebSocket");
        }
        self.shared.attempts.store(0, Ordering::SeqCst);
        Metrics::ws_disconnected();
        self.set_state(ConnectionState::Disconnected);
    }

    async fn handle_reconnect_timer(&mut self) {
        let Some(pending) = self.reconnect_at.take() else {
            return;
        };
        if pending.epoch != self.shared.epoch() {
            debug!("Stale reconnect timer ignored");
            return;
        }
        self.open().await;
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        if self.link_epoch != self.shared.epoch() {
            debug!("Event from superseded connection dropped");
            self.link = None;
            self.heartbeat_timer = None;
            return;
        }

        match event {
            TransportEvent::Message(text) => self.handle_text(&text).await,
            TransportEvent::Closed { code, reason } => {
                warn!(code, %reason, "WebSocket closed by server");
                self.on_lost("closed");
            }
            TransportEvent::Error(e) => {
                error!(error = %e, "WebSocket error");
                self.on_lost("error");
            }
        }
    }

    async fn handle_text(&mut self, text: &str) {
        self.shared.heartbeat.record_message();
        let msg = decode(text);

        if msg.is_invalid_format() {
            Metrics::decode_error();
        } else {
            let route = msg.route();
            Metrics::frame_received(route.label());

            match route {
                Route::Heartbeat { id: Some(id) } => {
                    let reply = self.shared.heartbeat.reply(id);
                    match self.send_request(&reply).await {
                        Ok(()) => Metrics::heartbeat_replied(),
                        Err(e) => warn!(error = %e, id, "Failed to answer heartbeat"),
                    }
                }
                Route::Heartbeat { id: None } => {
                    warn!("Heartbeat challenge without id, ignoring");
                }
                Route::OrderBook { instrument, data } => {
                    self.sink.on_order_book(&instrument, data);
                }
                Route::Candlestick { key, data } => {
                    self.sink.on_candlestick(&key, data);
                }
                Route::Other => {}
            }

            if let Some(channel) = msg.channel_name() {
                self.shared.subscriptions.handle_message(channel);
            }
            if let Some(code) = msg.error_code() {
                error!(
                    code,
                    id = ?msg.id,
                    method = ?msg.method,
                    message = ?msg.message,
                    "Error response from server"
                );
            }
        }

        self.shared.last_message.send_replace(Some(msg));
    }

    async fn send_heartbeat(&mut self) {
        if self.shared.state() != ConnectionState::Connected
            || self.link_epoch != self.shared.epoch()
        {
            self.heartbeat_timer = None;
            return;
        }
        let ping = self.shared.heartbeat.ping(&self.shared.ids);
        match self.send_request(&ping).await {
            Ok(()) => Metrics::heartbeat_sent(),
            Err(e) => warn!(error = %e, "Failed to send heartbeat"),
        }
    }

    async fn send_request(&self, request: &WsRequest) -> WsResult<()> {
        let link = self.link.as_ref().ok_or(WsError::NotConnected)?;
        let text = request.to_text()?;
        debug!(id = request.id, method = %request.method, "Sending request");
        link.send(text).await
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.shared.state.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "Connection state changed");
            Metrics::ws_state_set(state.as_str());
        }
    }
}

async fn next_event(link: Option<&mut TransportLink>) -> TransportEvent {
    match link {
        Some(link) => link.next_event().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn tick(timer: Option<&mut Interval>) -> Instant {
    match timer {
        Some(timer) => timer.tick().await,
        None => std::future::pending().await,
    }
}

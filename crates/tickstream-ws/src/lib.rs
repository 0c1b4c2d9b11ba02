//! WebSocket session for the tickstream market-data feed.
//!
//! Provides a resilient connection with:
//! - Automatic reconnection with exponential backoff (5 attempts by default)
//! - Subscription registry replayed after every connect
//! - Client heartbeats and immediate replies to server challenges
//! - Message decoding and routing to a [`FeedSink`]

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod subscription;
pub mod transport;

pub use connection::{
    backoff_delay, ConnectionConfig, ConnectionHandle, ConnectionManager, ConnectionState,
    FeedSink, NoopSink, DEFAULT_URL,
};
pub use error::{WsError, WsResult};
pub use heartbeat::{HeartbeatManager, HeartbeatStats};
pub use message::{decode, RequestIdGenerator, ResultPayload, Route, WsMessage, WsRequest};
pub use subscription::{ChannelStatus, SubscriptionManager};
pub use transport::{Connector, TransportEvent, TransportLink, TransportPeer, TungsteniteConnector};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

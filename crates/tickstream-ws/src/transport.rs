//! Transport abstraction.
//!
//! The session only needs four capabilities from a transport: send a text
//! frame, receive a text frame, learn that the peer closed, learn that the
//! connection errored. A [`TransportLink`] carries exactly that over two
//! channels, so the session works the same against a real socket and an
//! in-memory peer.

use crate::error::{WsError, WsResult};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

/// Outbound queue depth per connection.
const OUTBOUND_BUFFER: usize = 100;
/// Inbound event queue depth per connection.
const EVENT_BUFFER: usize = 1024;

/// Something the transport reports to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame arrived.
    Message(String),
    /// The peer closed the connection.
    Closed { code: u16, reason: String },
    /// The connection failed.
    Error(String),
}

/// Session side of an open connection.
///
/// Dropping the link closes the connection.
#[derive(Debug)]
pub struct TransportLink {
    outbound: mpsc::Sender<String>,
    events: mpsc::Receiver<TransportEvent>,
}

/// Transport side of an open connection.
#[derive(Debug)]
pub struct TransportPeer {
    /// Frames the session wants sent.
    pub outbound: mpsc::Receiver<String>,
    /// Events to report to the session.
    pub events: mpsc::Sender<TransportEvent>,
}

impl TransportLink {
    /// Create a connected link/peer pair.
    pub fn pair() -> (TransportLink, TransportPeer) {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        (
            TransportLink {
                outbound: outbound_tx,
                events: events_rx,
            },
            TransportPeer {
                outbound: outbound_rx,
                events: events_tx,
            },
        )
    }

    /// Queue a text frame.
    pub async fn send(&self, text: String) -> WsResult<()> {
        self.outbound
            .send(text)
            .await
            .map_err(|_| WsError::SendFailed("transport closed".to_string()))
    }

    /// Wait for the next transport event. A vanished peer reads as a close.
    pub async fn next_event(&mut self) -> TransportEvent {
        self.events
            .recv()
            .await
            .unwrap_or_else(|| TransportEvent::Closed {
                code: 1006,
                reason: "Transport dropped".to_string(),
            })
    }
}

/// Opens transports.
pub trait Connector: Send + Sync + 'static {
    /// Open a connection to `url`.
    fn connect(&self, url: &str) -> impl Future<Output = WsResult<TransportLink>> + Send;
}

/// WebSocket transport over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    fn connect(&self, url: &str) -> impl Future<Output = WsResult<TransportLink>> + Send {
        let url = url.to_string();
        async move {
            info!(url = %url, "Opening WebSocket");
            // TCP_NODELAY for lower latency (disable Nagle's algorithm)
            let (ws_stream, _response) =
                connect_async_tls_with_config(url.as_str(), None, true, None).await?;
            let (link, peer) = TransportLink::pair();
            tokio::spawn(pump(ws_stream, peer));
            Ok(link)
        }
    }
}

/// Shuttle frames between the socket and the session until either side ends.
async fn pump(ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>, mut peer: TransportPeer) {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            outbound = peer.outbound.recv() => {
                match outbound {
                    Some(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            error!(?e, "WebSocket write error");
                            let _ = peer.events.send(TransportEvent::Error(e.to_string())).await;
                            return;
                        }
                    }
                    None => {
                        debug!("Link dropped, sending Close frame");
                        if let Err(e) = write.send(Message::Close(None)).await {
                            warn!(?e, "Failed to send Close frame");
                        }
                        return;
                    }
                }
            }

            msg = read.next() => {
                let event = match msg {
                    Some(Ok(Message::Text(text))) => TransportEvent::Message(text),
                    Some(Ok(Message::Ping(data))) => {
                        debug!("Received ping, sending pong");
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            let _ = peer.events.send(TransportEvent::Error(e.to_string())).await;
                            return;
                        }
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (f.code.into(), f.reason.to_string()))
                            .unwrap_or((1000, "Normal close".to_string()));
                        warn!(code, %reason, "WebSocket closed by server");
                        let _ = peer.events.send(TransportEvent::Closed { code, reason }).await;
                        return;
                    }
                    Some(Err(e)) => {
                        error!(?e, "WebSocket read error");
                        let _ = peer.events.send(TransportEvent::Error(e.to_string())).await;
                        return;
                    }
                    None => {
                        warn!("WebSocket stream ended");
                        let _ = peer
                            .events
                            .send(TransportEvent::Closed {
                                code: 1006,
                                reason: "Stream ended".to_string(),
                            })
                            .await;
                        return;
                    }
                    _ => continue,
                };

                if peer.events.send(event).await.is_err() {
                    debug!("Session dropped the link");
                    return;
                }
            }
        }
    }
}

// WebSocket transport for the realtime channel
//
// The transport only moves text frames. Framing and the handshake belong to
// the connection manager.

use crate::error::{ChatError, ChatResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};

pub use self::config::TransportConfig;

mod config;

/// What the transport delivers upward
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Frame(String),
    Closed { reason: Option<String> },
}

/// An open transport.
///
/// Dropping `outbound` closes the underlying connection; `inbound` ends with
/// a single [`TransportEvent::Closed`].
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens realtime transports
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn open(&self, config: &TransportConfig) -> ChatResult<TransportLink>;
}

/// `tokio-tungstenite` WebSocket transport
#[derive(Debug, Default, Clone)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChannelTransport for WebSocketTransport {
    async fn open(&self, config: &TransportConfig) -> ChatResult<TransportLink> {
        let url = config.websocket_url();
        info!("Connecting to WebSocket: {}", url);

        let (ws_stream, _response) = tokio::time::timeout(config.connection_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| ChatError::timeout(format!("WebSocket connect timed out: {}", url)))?
            .map_err(|e| {
                error!("Failed to connect WebSocket: {}", e);
                ChatError::network_with_source("WebSocket connection failed", e)
            })?;

        info!("WebSocket connected successfully");
        let (mut sink, mut stream) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    warn!("WebSocket send failed: {}", e);
                    break;
                }
            }
            debug!("Outbound side closed, closing WebSocket");
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            let reason = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if in_tx.send(TransportEvent::Frame(text)).is_err() {
                            break None;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("WebSocket closed by server");
                        break frame.map(|f| f.reason.to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break Some(e.to_string());
                    }
                    None => {
                        warn!("WebSocket stream ended");
                        break None;
                    }
                }
            };
            let _ = in_tx.send(TransportEvent::Closed { reason });
        });

        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

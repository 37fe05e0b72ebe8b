//! Transport - single-attempt bidirectional text channel
//!
//! A [`Transport`] opens one [`TransportLink`] per connect call. Links are
//! never reused: the client drops the old link and asks for a new one on
//! every reconnect. No retry logic lives here.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// Buffer for inbound frames not yet consumed by the client
const INBOUND_CAPACITY: usize = 1024;

/// Notification from the far side of a link
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Text frame
    Message(String),
    /// Orderly close
    Closed { reason: Option<String> },
    /// Network or protocol failure; the link is dead afterwards
    Error(String),
}

/// Instruction for the link writer
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// One open connection
pub struct TransportLink {
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: mpsc::Receiver<TransportEvent>,
}

impl TransportLink {
    /// Wrap the two halves of a link
    pub fn new(
        outbound: mpsc::UnboundedSender<Outbound>,
        inbound: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        TransportLink { outbound, inbound }
    }

    /// Queue a text frame
    pub fn send(&self, text: String) -> Result<()> {
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| Error::NotConnected)
    }

    /// Ask the writer to close the connection
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    /// Next inbound notification; `None` once the reader is gone
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }
}

/// Something that can open links to a gateway endpoint
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a link to `url`
    async fn connect(&self, url: &str) -> Result<TransportLink>;
}

/// WebSocket transport on tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connect_timeout: Option<Duration>,
}

impl WebSocketTransport {
    /// Create a transport with the given connect timeout
    pub fn new(connect_timeout: Duration) -> Self {
        WebSocketTransport {
            connect_timeout: Some(connect_timeout),
        }
    }

    /// Transport that leaves connect deadlines to the caller
    pub fn without_timeout() -> Self {
        WebSocketTransport {
            connect_timeout: None,
        }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<TransportLink> {
        let parsed = url::Url::parse(url)?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(Error::InvalidInput(format!(
                "unsupported gateway scheme '{}'",
                parsed.scheme()
            )));
        }

        debug!("Opening WebSocket to {}", url);
        let (ws_stream, _) = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect_async(url))
                .await
                .map_err(|_| {
                    Error::Transport(format!(
                        "connect to {} timed out after {}ms",
                        url,
                        limit.as_millis()
                    ))
                })??,
            None => connect_async(url).await?,
        };
        let (mut write, mut read) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (in_tx, in_rx) = mpsc::channel::<TransportEvent>(INBOUND_CAPACITY);

        // Writer: drains the outbound queue until Close or the link is dropped
        let writer_events = in_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                match frame {
                    Outbound::Text(text) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            let _ = writer_events.send(TransportEvent::Error(e.to_string())).await;
                            break;
                        }
                    }
                    Outbound::Close => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            let _ = write.close().await;
        });

        // Reader: forwards frames in arrival order
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let event = match msg {
                    Ok(Message::Text(text)) => TransportEvent::Message(text.to_string()),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => TransportEvent::Message(text),
                        Err(_) => {
                            warn!("Dropping non-UTF-8 binary frame ({} bytes)", bytes.len());
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty());
                        let _ = in_tx.send(TransportEvent::Closed { reason }).await;
                        break;
                    }
                    Ok(Message::Ping(data)) => {
                        trace!("Received ping: {:?}", data);
                        continue;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = in_tx.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                };

                if in_tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(TransportLink::new(out_tx, in_rx))
    }
}

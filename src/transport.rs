//! Transport seam between the connection manager and the network
//!
//! The connection manager only needs "open", "send text", "next event" and
//! "close". `WsConnector` provides them over tokio-tungstenite; tests plug in
//! scripted connectors.

use crate::error::{ChannelError, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

/// Close code for a normal, intentional shutdown
pub const CLEAN_CLOSE_CODE: u16 = 1000;

/// Close code used when the peer vanished without a close frame
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;

/// Close code reported for a close frame that carried no status
pub const NO_STATUS_CLOSE_CODE: u16 = 1005;

/// Something the transport observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame
    Text(String),
    /// A binary frame
    Binary(Vec<u8>),
    /// The transport is closed; no further events follow
    Closed { code: u16, reason: String },
}

impl TransportEvent {
    pub fn abnormal(reason: impl Into<String>) -> Self {
        TransportEvent::Closed {
            code: ABNORMAL_CLOSE_CODE,
            reason: reason.into(),
        }
    }
}

/// An open, full-duplex connection
#[async_trait]
pub trait Transport: Send {
    /// Write one text frame
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Wait for the next inbound event
    async fn next_event(&mut self) -> TransportEvent;

    /// Close with the given code and reason
    async fn close(&mut self, code: u16, reason: &str) -> Result<()>;
}

/// Opens transports to an endpoint
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Resolves once the transport is open; errors are pre-open failures
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>>;
}

/// WebSocket connector (ws:// and wss://)
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
        debug!(endpoint = %url, "Opening WebSocket");
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| ChannelError::Connect(format!("WebSocket connection error: {}", e)))?;
        trace!(status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ChannelError::Transport(format!("Send error: {}", e)))
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Text(text.as_str().to_owned()),
                Some(Ok(Message::Binary(data))) => return TransportEvent::Binary(data.to_vec()),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_owned()),
                        None => (NO_STATUS_CLOSE_CODE, String::new()),
                    };
                    debug!(code, reason = %reason, "Server closed the connection");
                    return TransportEvent::Closed { code, reason };
                }
                // tungstenite answers pings itself
                Some(Ok(Message::Ping(_)))
                | Some(Ok(Message::Pong(_)))
                | Some(Ok(Message::Frame(_))) => continue,
                Some(Err(e)) => return TransportEvent::abnormal(e.to_string()),
                None => return TransportEvent::abnormal("stream ended"),
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.stream
            .close(Some(frame))
            .await
            .map_err(|e| ChannelError::Transport(format!("Close error: {}", e)))
    }
}

//! Subscriber transport
//!
//! The connection manager only sees a [`Connector`] that hands out a fresh
//! ([`ChannelWriter`], [`ChannelReader`]) pair per attempt. [`WsConnector`]
//! is the production implementation over `tokio-tungstenite`; tests plug in
//! in-memory channels.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::tungstenite;

use crate::protocol::{RelayError, RelayResult};

/// Concrete WebSocket stream type
type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Write half of a subscriber channel
#[async_trait]
pub trait ChannelWriter: Send {
    /// Send one UTF-8 text payload
    async fn send_text(&mut self, text: String) -> RelayResult<()>;

    /// Flush pending writes and close the channel
    async fn close(&mut self) -> RelayResult<()>;
}

/// Read half of a subscriber channel
#[async_trait]
pub trait ChannelReader: Send {
    /// Next text payload, or `None` once the channel has closed
    ///
    /// Must be cancel safe: the connection loop polls it inside `select!`.
    async fn recv(&mut self) -> Option<RelayResult<String>>;
}

/// An open subscriber channel
pub struct Channel {
    pub writer: Box<dyn ChannelWriter>,
    pub reader: Box<dyn ChannelReader>,
}

impl Channel {
    pub fn new(writer: impl ChannelWriter + 'static, reader: impl ChannelReader + 'static) -> Self {
        Self {
            writer: Box::new(writer),
            reader: Box::new(reader),
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").finish_non_exhaustive()
    }
}

/// Opens a new channel with the same configuration on every call
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> RelayResult<Channel>;
}

/// Default bound on TCP connect plus WebSocket handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket connector for a relay's `/ws` endpoint
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Fail an attempt that has not completed the handshake within `timeout`
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> RelayResult<Channel> {
        tracing::debug!(url = %self.url, "Connecting to relay");

        let handshake = tokio_tungstenite::connect_async(self.url.as_str());
        let (ws_stream, _response) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| {
                RelayError::Transport(format!(
                    "WebSocket connect timed out after {:?}",
                    self.connect_timeout
                ))
            })?
            .map_err(|e| RelayError::Transport(format!("WebSocket connect failed: {e}")))?;

        let (sink, stream) = ws_stream.split();
        Ok(Channel::new(WsWriter { sink }, WsReader { stream }))
    }
}

struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

#[async_trait]
impl ChannelWriter for WsWriter {
    async fn send_text(&mut self, text: String) -> RelayResult<()> {
        self.sink
            .send(tungstenite::Message::Text(text))
            .await
            .map_err(|e| RelayError::Transport(format!("WebSocket send failed: {e}")))
    }

    async fn close(&mut self) -> RelayResult<()> {
        self.sink
            .close()
            .await
            .map_err(|e| RelayError::Transport(format!("WebSocket close failed: {e}")))
    }
}

struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

#[async_trait]
impl ChannelReader for WsReader {
    async fn recv(&mut self) -> Option<RelayResult<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => return Some(Ok(text)),
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    if let Some(frame) = frame {
                        tracing::debug!(code = %frame.code, reason = %frame.reason, "Relay closed channel");
                    }
                    return None;
                }
                // Pongs are queued by tungstenite and flushed on the next write
                Some(Ok(tungstenite::Message::Ping(_)))
                | Some(Ok(tungstenite::Message::Pong(_)))
                | Some(Ok(tungstenite::Message::Frame(_))) => continue,
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    tracing::debug!(bytes = data.len(), "Ignoring binary frame");
                    continue;
                }
                Some(Err(e)) => {
                    return Some(Err(RelayError::Transport(format!(
                        "WebSocket read error: {e}"
                    ))));
                }
                None => return None,
            }
        }
    }
}

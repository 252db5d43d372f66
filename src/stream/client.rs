//! WebSocket client for one connection generation
//!
//! Handles the dial, outbound text frames and message reception. The write
//! half lives behind a mutex so the heartbeat task can ping concurrently
//! with the read loop.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::error::{MarketDataError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Shared write half of a connection
pub type WsWriter = Arc<Mutex<SplitSink<WsStream, Message>>>;

/// WebSocket client for a single connection
pub struct WebSocketClient {
    endpoint: String,
    writer: Option<WsWriter>,
    reader: Option<SplitStream<WsStream>>,
}

impl WebSocketClient {
    /// Create a new, unconnected client
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            writer: None,
            reader: None,
        }
    }

    /// Dial the endpoint, giving up after `dial_timeout`
    pub async fn connect(&mut self, dial_timeout: Duration) -> Result<()> {
        info!(url = %self.endpoint, "Connecting to WebSocket");

        let dialed = timeout(dial_timeout, connect_async(self.endpoint.as_str()))
            .await
            .map_err(|_| MarketDataError::Dial {
                endpoint: self.endpoint.clone(),
                reason: format!("handshake timed out after {}ms", dial_timeout.as_millis()),
            })?;

        let (ws_stream, response) = dialed.map_err(|e| MarketDataError::Dial {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        })?;

        debug!(status = ?response.status(), "WebSocket connected");
        let (writer, reader) = ws_stream.split();
        self.writer = Some(Arc::new(Mutex::new(writer)));
        self.reader = Some(reader);

        Ok(())
    }

    /// Send a text frame
    pub async fn send_text(&self, text: String) -> Result<()> {
        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| MarketDataError::ConnectionClosed("Not connected".to_string()))?;
        writer.lock().await.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Receive the next message.
    ///
    /// `Ok(None)` means a control frame was consumed; any terminal condition
    /// is an error.
    pub async fn recv(&mut self) -> Result<Option<String>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| MarketDataError::ConnectionClosed("Not connected".to_string()))?;

        match reader.next().await {
            Some(Ok(Message::Text(text))) => Ok(Some(text)),
            Some(Ok(Message::Binary(data))) => Ok(Some(String::from_utf8_lossy(&data).to_string())),
            Some(Ok(Message::Ping(data))) => {
                debug!("Received ping, sending pong");
                if let Some(writer) = self.writer.as_ref() {
                    let _ = writer.lock().await.send(Message::Pong(data)).await;
                }
                Ok(None)
            }
            Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => Ok(None),
            Some(Ok(Message::Close(frame))) => {
                warn!(frame = ?frame, "Received close frame");
                Err(MarketDataError::ConnectionClosed("Connection closed by peer".to_string()))
            }
            Some(Err(e)) => Err(e.into()),
            None => Err(MarketDataError::ConnectionClosed("Stream ended".to_string())),
        }
    }

    /// Write half, for the heartbeat task
    pub fn writer(&self) -> Option<WsWriter> {
        self.writer.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    /// Close the connection. Returns `true` only for the call that actually
    /// released the socket.
    pub async fn close(&mut self) -> bool {
        self.reader = None;
        match self.writer.take() {
            Some(writer) => {
                let mut writer = writer.lock().await;
                let _ = writer.close().await;
                true
            }
            None => false,
        }
    }
}

/// Send a ping control frame on a shared writer
pub async fn ping(writer: &WsWriter) -> Result<()> {
    writer.lock().await.send(Message::Ping(Vec::new())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconnected_client() {
        let mut client = WebSocketClient::new("ws://127.0.0.1:1");
        assert!(!client.is_connected());
        assert!(client.send_text("{}".to_string()).await.is_err());
        assert!(client.recv().await.is_err());
        assert!(!client.close().await);
    }

    #[tokio::test]
    async fn test_refused_dial_is_dial_error() {
        let mut client = WebSocketClient::new("ws://127.0.0.1:1");
        let err = client.connect(Duration::from_secs(1)).await.unwrap_err();
        assert!(err.is_dial());
        assert!(!client.is_connected());
    }
}

//! Realtime socket client backed by `tokio-tungstenite`.

use async_trait::async_trait;
use cloud_actions_core::traits::{SocketConnection, SocketTransport, TransportError};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

/// Socket transport that opens `wss://` connections with `connect_async`.
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for TungsteniteTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SocketTransport for TungsteniteTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn SocketConnection>, TransportError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))?;
        Ok(Box::new(WsConnection { inner: stream }))
    }
}

struct WsConnection {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl SocketConnection for WsConnection {
    async fn next_message(&mut self) -> Option<Result<Value, TransportError>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => {
                    // Non-JSON frames are surfaced as plain strings.
                    let value = serde_json::from_str(&text)
                        .unwrap_or_else(|_| Value::String(text.to_string()));
                    return Some(Ok(value));
                }
                Ok(Message::Binary(data)) => match serde_json::from_slice(&data) {
                    Ok(value) => return Some(Ok(value)),
                    Err(e) => {
                        tracing::warn!("Dropping undecodable binary frame: {e}");
                    }
                },
                Ok(Message::Close(_)) => return None,
                // Ping/pong handled by tungstenite itself.
                Ok(_) => {}
                Err(e) => return Some(Err(TransportError::Socket(e.to_string()))),
            }
        }
    }

    async fn send(&mut self, message: &Value) -> Result<(), TransportError> {
        let text = serde_json::to_string(message)
            .map_err(|e| TransportError::Socket(e.to_string()))?;
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.inner.close(None).await;
    }
}

//! Message transport between a replica and the sync server.
//!
//! The synchronizer talks to a [`Connector`] so it can run over a real
//! WebSocket or over an in-process channel in tests.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use listsync_engine::{ClientMessage, ServerMessage};
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

/// One open, bidirectional message stream.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, message: &ClientMessage) -> Result<()>;

    /// Next message from the server, or `None` once the stream is closed.
    ///
    /// Must be cancel safe: dropping the future loses no message.
    async fn recv(&mut self) -> Option<Result<ServerMessage>>;

    async fn close(&mut self);
}

/// Opens connections to a sync endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>>;
}

/// JSON text frames over a WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>> {
        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        Ok(Box::new(WebSocketConnection { socket }))
    }
}

struct WebSocketConnection {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.socket.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<ServerMessage>> {
        loop {
            match self.socket.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(serde_json::from_str(&text).map_err(SyncError::from));
                }
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "Server closed the connection");
                    return None;
                }
                Ok(Message::Binary(_)) => {
                    return Some(Err(SyncError::Protocol(
                        "unexpected binary frame".to_string(),
                    )));
                }
                // Control frames are answered by tungstenite itself
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.socket.close(None).await {
            tracing::debug!("Error closing WebSocket: {}", e);
        }
    }
}

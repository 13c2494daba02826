//! Shared helpers for server integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use listsync_engine::{ClientMessage, ServerMessage};
use listsync_server::{app, config::Config, AppState};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub const SECRET: &str = "s3cret";

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a server on an ephemeral port.
pub async fn spawn_server(secret: Option<&str>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = app(AppState::new(Config::local(secret)));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn ws_url(addr: SocketAddr, group_id: &str, token: &str) -> String {
    format!("ws://{addr}/sync/{group_id}?token={token}")
}

pub async fn connect(addr: SocketAddr, group_id: &str) -> Ws {
    let (ws, _) = tokio_tungstenite::connect_async(ws_url(addr, group_id, SECRET))
        .await
        .unwrap();
    ws
}

pub async fn send(ws: &mut Ws, message: &ClientMessage) {
    let text = serde_json::to_string(message).unwrap();
    ws.send(Message::Text(text)).await.unwrap();
}

/// Next server message, or `None` if nothing arrives within `wait`.
pub async fn try_recv(ws: &mut Ws, wait: Duration) -> Option<ServerMessage> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let frame = tokio::time::timeout_at(deadline, ws.next()).await.ok()??;
        if let Message::Text(text) = frame.unwrap() {
            return Some(serde_json::from_str(&text).unwrap());
        }
    }
}

pub async fn recv(ws: &mut Ws) -> ServerMessage {
    try_recv(ws, Duration::from_secs(5))
        .await
        .expect("no message from server")
}

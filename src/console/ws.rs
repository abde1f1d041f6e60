//! WebSocket front end for console sessions.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt as _, StreamExt as _};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use super::bridge::{ChannelReceiver, ChannelSender, ConsoleSession, ConsoleSpawner};
use crate::error::{AppError, Result};

type Socket = WebSocketStream<TcpStream>;

struct WsSender {
    sink: SplitSink<Socket, Message>,
}

#[async_trait]
impl ChannelSender for WsSender {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| AppError::console(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            log::debug!("WebSocket close failed: {}", e);
        }
    }
}

struct WsReceiver {
    stream: SplitStream<Socket>,
}

#[async_trait]
impl ChannelReceiver for WsReceiver {
    async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(text),
                Ok(Message::Binary(data)) => {
                    return Some(String::from_utf8_lossy(&data).into_owned())
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => {
                    log::debug!("WebSocket receive failed: {}", e);
                    return None;
                }
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, spawner: Arc<dyn ConsoleSpawner>) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_default();

    let socket = match tokio_tungstenite::accept_async(stream).await {
        Ok(socket) => socket,
        Err(e) => {
            log::warn!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
    };
    let (sink, stream) = socket.split();
    let mut sender = WsSender { sink };

    let process = match spawner.spawn() {
        Ok(process) => process,
        Err(e) => {
            log::error!("Failed to start console for {}: {}", peer, e);
            let _ = sender.send_text(format!("[ERROR] {}\r\n", e)).await;
            sender.close().await;
            return;
        }
    };

    log::info!("Console session opened for {}", peer);
    let end = ConsoleSession::new(process, sender, WsReceiver { stream })
        .run()
        .await;
    log::info!("Console session for {} closed: {:?}", peer, end);
}

/// Accept WebSocket connections on `listener`, one console per connection.
pub async fn serve_listener(listener: TcpListener, spawner: Arc<dyn ConsoleSpawner>) -> Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        tokio::spawn(handle_connection(stream, Arc::clone(&spawner)));
    }
}

/// Bind `listen_addr` and serve console sessions until the process exits.
pub async fn serve(listen_addr: &str, spawner: Arc<dyn ConsoleSpawner>) -> Result<()> {
    let listener = TcpListener::bind(listen_addr)
        .await
        .map_err(|e| AppError::console(format!("无法监听 {}: {}", listen_addr, e)))?;
    log::info!("Console bridge listening on ws://{}", listen_addr);
    serve_listener(listener, spawner).await
}

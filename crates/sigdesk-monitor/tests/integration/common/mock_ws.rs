//! Mock push server for integration tests.
//!
//! Provides a WebSocket server that can:
//! - Record each handshake (request URI, arrival time)
//! - Push text frames to every open connection
//! - Close connections with a chosen code, or drop them without a frame
//! - Refuse the handshake with an HTTP status

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Push endpoint path served by the mock.
pub const PUSH_PATH: &str = "/api/signals/ws/signals";

/// What the server does with the next handshakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Keep the connection open.
    Accept,
    /// Complete the handshake, then close the TCP stream without a frame.
    DropAfterOpen,
    /// Complete the handshake, then send a Close frame with this code.
    CloseAfterOpen(u16),
    /// Refuse the handshake with this HTTP status.
    RejectHandshake(u16),
}

/// A recorded handshake.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub uri: String,
    pub at: Instant,
}

enum Control {
    Text(String),
    Close(u16, String),
    Drop,
}

#[derive(Default)]
struct Shared {
    mode: Mutex<Option<Mode>>,
    handshakes: Mutex<Vec<Handshake>>,
    live: Mutex<Vec<mpsc::UnboundedSender<Control>>>,
    client_closes: Mutex<u32>,
}

/// A mock push server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    shared: Arc<Shared>,
}

impl MockWsServer {
    /// Start a new mock server on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared::default());
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let shared_clone = shared.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(stream, shared_clone.clone()));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            shared,
        }
    }

    /// Push endpoint URL.
    pub fn url(&self) -> String {
        format!("ws://{}{}", self.addr, PUSH_PATH)
    }

    pub async fn set_mode(&self, mode: Mode) {
        *self.shared.mode.lock().await = Some(mode);
    }

    /// Number of handshakes received (including refused ones).
    pub async fn connection_count(&self) -> usize {
        self.shared.handshakes.lock().await.len()
    }

    pub async fn handshakes(&self) -> Vec<Handshake> {
        self.shared.handshakes.lock().await.clone()
    }

    /// Close frames received from clients.
    pub async fn client_closes(&self) -> u32 {
        *self.shared.client_closes.lock().await
    }

    /// Wait until `count` handshakes were received.
    pub async fn wait_for_connections(&self, count: usize, timeout: Duration) -> bool {
        eventually(timeout, || async move { self.connection_count().await >= count }).await
    }

    /// Wait until `count` connections are open and can receive pushes.
    pub async fn wait_for_live(&self, count: usize, timeout: Duration) -> bool {
        eventually(timeout, || async move {
            let mut live = self.shared.live.lock().await;
            live.retain(|tx| !tx.is_closed());
            live.len() >= count
        })
        .await
    }

    /// Send a text frame to every open connection.
    pub async fn push_text(&self, text: &str) {
        for tx in self.shared.live.lock().await.iter() {
            let _ = tx.send(Control::Text(text.to_string()));
        }
    }

    /// Send a Close frame on every open connection.
    pub async fn close_all(&self, code: u16, reason: &str) {
        for tx in self.shared.live.lock().await.drain(..) {
            let _ = tx.send(Control::Close(code, reason.to_string()));
        }
    }

    /// Drop every open connection without a Close frame.
    pub async fn drop_all(&self) {
        for tx in self.shared.live.lock().await.drain(..) {
            let _ = tx.send(Control::Drop);
        }
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        self.drop_all().await;
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn handle_connection(stream: TcpStream, shared: Arc<Shared>) {
    let mode = shared.mode.lock().await.unwrap_or(Mode::Accept);
    let mut uri = String::new();

    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        uri = req.uri().to_string();
        match mode {
            Mode::RejectHandshake(status) => Err(http::Response::builder()
                .status(status)
                .body(None)
                .unwrap()),
            _ => Ok(resp),
        }
    };
    let accepted = accept_hdr_async(stream, callback).await;

    shared.handshakes.lock().await.push(Handshake {
        uri,
        at: Instant::now(),
    });

    let ws_stream = match accepted {
        Ok(ws) => ws,
        Err(_) => return,
    };
    let (mut write, mut read) = ws_stream.split();

    match mode {
        Mode::DropAfterOpen | Mode::RejectHandshake(_) => return,
        Mode::CloseAfterOpen(code) => {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: "closed by test".into(),
            };
            let _ = write.send(Message::Close(Some(frame))).await;
            return;
        }
        Mode::Accept => {}
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    shared.live.lock().await.push(tx);

    loop {
        tokio::select! {
            control = rx.recv() => match control {
                Some(Control::Text(text)) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Control::Close(code, reason)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    break;
                }
                Some(Control::Drop) | None => break,
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) => {
                    *shared.client_closes.lock().await += 1;
                    break;
                }
                Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let server = MockWsServer::start().await;
        assert!(server.url().starts_with("ws://127.0.0.1:"));
        assert!(server.url().ends_with(PUSH_PATH));
        server.shutdown().await;
    }
}

//! Push connection manager.
//!
//! Owns one logical connection to the signal push endpoint. Handles the
//! connection lifecycle and automatic reconnection with exponential backoff.
//! Frames are decoded and forwarded as [`PushEvent`]s; the manager itself
//! attaches no business meaning to them.
//!
//! ```text
//! idle -> connecting -> open
//!            ^            |  transport failure / remote close
//!            |            v
//!            +---- closed_pending_retry
//!
//! close() or auth rejection -> closed_final (sticky)
//! ```

use crate::backoff::Backoff;
use crate::error::{WsError, WsResult};
use crate::message::{decode, PushEvent};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use sigdesk_core::CredentialSource;
use sigdesk_telemetry::Metrics;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::connect_async_tls_with_config;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// Close code the signal server uses for a missing or invalid token.
pub const AUTH_CLOSE_CODE: u16 = 4001;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Push endpoint URL (e.g., "wss://host/api/signals/ws/signals").
    pub url: String,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    pub reconnect_max_delay_ms: u64,
    /// Close codes that mean the credential was refused.
    pub auth_close_codes: Vec<u16>,
    /// Query parameter carrying the credential.
    pub credential_param: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 30_000,
            auth_close_codes: vec![AUTH_CLOSE_CODE],
            credential_param: "token".to_string(),
        }
    }
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    ClosedPendingRetry,
    /// Terminal. No further transitions.
    ClosedFinal,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::ClosedPendingRetry => "closed_pending_retry",
            Self::ClosedFinal => "closed_final",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::ClosedFinal)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Push connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    credentials: Arc<dyn CredentialSource>,
    event_tx: mpsc::Sender<PushEvent>,
    state_tx: watch::Sender<ConnectionState>,
    backoff: Mutex<Backoff>,
    /// Underlying connections attempted so far.
    connect_attempts: AtomicU64,
    started: AtomicBool,
    /// Cancellation token for close().
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    /// Create a new connection manager in the idle state.
    pub fn new(
        config: ConnectionConfig,
        credentials: Arc<dyn CredentialSource>,
        event_tx: mpsc::Sender<PushEvent>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let backoff = Backoff::new(config.reconnect_base_delay_ms, config.reconnect_max_delay_ms);
        Self {
            config,
            credentials,
            event_tx,
            state_tx,
            backoff: Mutex::new(backoff),
            connect_attempts: AtomicU64::new(0),
            started: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Current backoff attempt counter.
    pub fn attempt(&self) -> u32 {
        self.backoff.lock().attempt()
    }

    /// Number of underlying connections attempted.
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Check if close() was called or the credential was refused.
    pub fn is_closed(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Permanently tear down the connection.
    ///
    /// Cancels any pending retry timer and stops event forwarding. The
    /// running `open()` future returns promptly.
    pub fn close(&self) {
        if !self.is_closed() {
            info!("ConnectionManager close requested");
        }
        self.shutdown_token.cancel();
        self.set_state(ConnectionState::ClosedFinal);
    }

    /// Run the connection lifecycle until close() or an auth rejection.
    ///
    /// A manager may be opened once.
    pub async fn open(&self) -> WsResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(WsError::AlreadyStarted);
        }
        if let Err(e) = self.endpoint_url() {
            error!(error = %e, "Push endpoint is unusable");
            self.close();
            return Err(e);
        }
        self.connect_with_retry().await
    }

    /// Endpoint URL with the current credential appended.
    pub fn endpoint_url(&self) -> WsResult<Url> {
        let mut url = Url::parse(&self.config.url)
            .map_err(|e| WsError::InvalidEndpoint(format!("{}: {e}", self.config.url)))?;
        if let Some(token) = self.credentials.credential() {
            url.query_pairs_mut()
                .append_pair(&self.config.credential_param, &token);
        }
        Ok(url)
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if current.is_final() || *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            debug!(state = %next, "Push connection state changed");
            Metrics::ws_state_set(next.as_str());
        }
    }

    async fn connect_with_retry(&self) -> WsResult<()> {
        loop {
            if self.is_closed() {
                info!("Close requested, exiting connect loop");
                self.set_state(ConnectionState::ClosedFinal);
                return Ok(());
            }

            self.set_state(ConnectionState::Connecting);

            let reason = match self.try_connect().await {
                Ok(()) => {
                    info!("Push connection closed");
                    "stream_ended"
                }
                Err(e @ WsError::AuthRejected { .. }) => {
                    error!(error = %e, "Push credential rejected, not reconnecting");
                    self.shutdown_token.cancel();
                    self.set_state(ConnectionState::ClosedFinal);
                    return Err(e);
                }
                Err(WsError::ConnectionClosed { code, reason }) => {
                    warn!(code, %reason, "Push connection closed by server");
                    "remote_close"
                }
                Err(e) => {
                    warn!(error = %e, "Push connection error");
                    "transport_error"
                }
            };

            if self.is_closed() {
                info!("Close requested after disconnect, not reconnecting");
                self.set_state(ConnectionState::ClosedFinal);
                return Ok(());
            }

            self.set_state(ConnectionState::ClosedPendingRetry);

            let (delay, attempt) = {
                let mut backoff = self.backoff.lock();
                let attempt = backoff.attempt();
                (backoff.next_delay(), attempt)
            };
            Metrics::ws_reconnect(reason);
            warn!(attempt, delay_ms = delay.as_millis() as u64, reason, "Reconnecting");

            // At most one pending timer; close() cancels it.
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!("Close requested during backoff, exiting");
                    self.set_state(ConnectionState::ClosedFinal);
                    return Ok(());
                }
            }
        }
    }

    async fn try_connect(&self) -> WsResult<()> {
        let url = self.endpoint_url()?;
        info!(url = %self.config.url, "Connecting to push endpoint");
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);

        let handshake = tokio::select! {
            () = self.shutdown_token.cancelled() => return Ok(()),
            result = connect_async_tls_with_config(url.as_str(), None, true, None) => result,
        };

        let (ws_stream, _response) = match handshake {
            Ok(pair) => pair,
            Err(tungstenite::Error::Http(response))
                if matches!(response.status().as_u16(), 401 | 403) =>
            {
                let code = response.status().as_u16();
                return Err(WsError::AuthRejected {
                    code,
                    reason: "handshake rejected".to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let (mut write, mut read) = ws_stream.split();

        self.backoff.lock().reset();
        self.set_state(ConnectionState::Open);
        info!("Push connection open");

        loop {
            tokio::select! {
                biased;

                () = self.shutdown_token.cancelled() => {
                    info!("Close signal received in message loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(?e, "Failed to send Close frame during shutdown");
                    }
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.forward(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            debug!("Received ping, sending pong");
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1005, String::new()));
                            if self.config.auth_close_codes.contains(&code) {
                                return Err(WsError::AuthRejected { code, reason });
                            }
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            return Err(e.into());
                        }
                        None => {
                            warn!("Push stream ended");
                            return Ok(());
                        }
                        // Binary and pong frames carry nothing for us.
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    async fn forward(&self, text: &str) {
        if self.is_closed() {
            return;
        }
        let Some(event) = decode(text) else {
            return;
        };
        tokio::select! {
            result = self.event_tx.send(event) => {
                if result.is_err() {
                    warn!("Push event receiver dropped");
                }
            }
            () = self.shutdown_token.cancelled() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigdesk_core::StaticCredential;
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn manager(url: &str, token: Option<&str>) -> (ConnectionManager, mpsc::Receiver<PushEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let credentials = Arc::new(StaticCredential::new(token.map(str::to_string)));
        let config = ConnectionConfig {
            reconnect_base_delay_ms: 10,
            reconnect_max_delay_ms: 40,
            ..ConnectionConfig::new(url)
        };
        (ConnectionManager::new(config, credentials, tx), rx)
    }

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.reconnect_base_delay_ms, 1000);
        assert_eq!(config.reconnect_max_delay_ms, 30_000);
        assert_eq!(config.auth_close_codes, vec![4001]);
        assert_eq!(config.credential_param, "token");
    }

    #[test]
    fn test_endpoint_url_appends_token() {
        let (mgr, _rx) = manager("ws://localhost:8000/api/signals/ws/signals", Some("a b&c"));
        let url = assert_ok!(mgr.endpoint_url());
        assert_eq!(
            url.as_str(),
            "ws://localhost:8000/api/signals/ws/signals?token=a+b%26c"
        );
    }

    #[test]
    fn test_endpoint_url_without_credential() {
        let (mgr, _rx) = manager("ws://localhost:8000/api/signals/ws/signals", None);
        let url = assert_ok!(mgr.endpoint_url());
        assert_eq!(url.query(), None);
    }

    #[test]
    fn test_closed_final_is_sticky() {
        let (mgr, _rx) = manager("ws://localhost:1/ws", None);
        assert_eq!(mgr.state(), ConnectionState::Idle);

        mgr.close();
        assert_eq!(mgr.state(), ConnectionState::ClosedFinal);

        mgr.set_state(ConnectionState::Connecting);
        mgr.set_state(ConnectionState::Open);
        assert_eq!(mgr.state(), ConnectionState::ClosedFinal);
    }

    #[tokio::test]
    async fn test_open_after_close_returns_immediately() {
        let (mgr, _rx) = manager("ws://127.0.0.1:1/ws", None);
        mgr.close();

        assert_ok!(mgr.open().await);
        assert_eq!(mgr.state(), ConnectionState::ClosedFinal);
        assert_eq!(mgr.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_second_open_is_rejected() {
        let (mgr, _rx) = manager("ws://127.0.0.1:1/ws", None);
        let mgr = Arc::new(mgr);

        let runner = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.open().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(matches!(mgr.open().await, Err(WsError::AlreadyStarted)));

        mgr.close();
        let result = tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .expect("open() should return after close")
            .unwrap();
        assert_ok!(result);
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_final() {
        let (mgr, _rx) = manager("not a url", None);

        let result = mgr.open().await;
        assert!(matches!(result, Err(WsError::InvalidEndpoint(_))));
        assert_eq!(mgr.state(), ConnectionState::ClosedFinal);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_backs_off_until_closed() {
        // Port 1 is closed on any sane test host; every attempt fails fast.
        let (mgr, _rx) = manager("ws://127.0.0.1:1/ws", None);
        let mgr = Arc::new(mgr);
        let mut states = mgr.subscribe_state();

        let runner = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.open().await })
        };

        states
            .wait_for(|s| *s == ConnectionState::ClosedPendingRetry)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(mgr.attempt() >= 2, "attempt counter should advance");

        mgr.close();
        let result = tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .expect("open() should return after close")
            .unwrap();
        assert_ok!(result);
        assert_eq!(mgr.state(), ConnectionState::ClosedFinal);

        let attempts = mgr.connect_attempts();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mgr.connect_attempts(), attempts, "no attempts after close");
    }
}

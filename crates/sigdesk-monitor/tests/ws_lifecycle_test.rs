//! Push connection lifecycle integration tests.
//!
//! Tests the connection lifecycle against a live WebSocket server:
//! - Connection establishment and credential passing
//! - Reconnection with exponential backoff and reset after open
//! - Authentication rejection (close code 4001, HTTP 401)
//! - Close during backoff and close while open

mod integration;
use integration::common::mock_ws::{eventually, Mode, MockWsServer, PUSH_PATH};

use sigdesk_core::{SignalId, StaticCredential};
use sigdesk_ws::{ConnectionConfig, ConnectionManager, ConnectionState, PushEvent, WsError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(3);

fn manager(
    url: String,
    token: Option<&str>,
    base_ms: u64,
    max_ms: u64,
) -> (Arc<ConnectionManager>, mpsc::Receiver<PushEvent>) {
    let (event_tx, event_rx) = mpsc::channel::<PushEvent>(100);
    let config = ConnectionConfig {
        reconnect_base_delay_ms: base_ms,
        reconnect_max_delay_ms: max_ms,
        ..ConnectionConfig::new(url)
    };
    let credentials = Arc::new(StaticCredential::new(token.map(str::to_string)));
    (
        Arc::new(ConnectionManager::new(config, credentials, event_tx)),
        event_rx,
    )
}

fn spawn_open(manager: &Arc<ConnectionManager>) -> JoinHandle<Result<(), WsError>> {
    let manager = manager.clone();
    tokio::spawn(async move { manager.open().await })
}

async fn wait_for_state(manager: &ConnectionManager, target: ConnectionState) -> bool {
    let mut rx = manager.subscribe_state();
    timeout(WAIT, rx.wait_for(|state| *state == target))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}

/// Test that the credential travels as the `token` query parameter.
#[tokio::test]
async fn test_connects_with_token_query() {
    let server = MockWsServer::start().await;
    let (manager, _rx) = manager(server.url(), Some("s3cret"), 50, 200);

    let handle = spawn_open(&manager);

    assert!(server.wait_for_live(1, WAIT).await, "Should connect within timeout");
    assert!(wait_for_state(&manager, ConnectionState::Open).await);
    let handshakes = server.handshakes().await;
    assert_eq!(handshakes[0].uri, format!("{PUSH_PATH}?token=s3cret"));

    manager.close();
    assert!(timeout(WAIT, handle).await.unwrap().unwrap().is_ok());
    server.shutdown().await;
}

/// Test that pushed frames are decoded and forwarded, and bad frames are
/// skipped without dropping the connection.
#[tokio::test]
async fn test_malformed_frames_do_not_terminate() {
    let server = MockWsServer::start().await;
    let (manager, mut rx) = manager(server.url(), None, 50, 200);
    let handle = spawn_open(&manager);
    assert!(server.wait_for_live(1, WAIT).await);

    server.push_text("not json at all").await;
    server.push_text(r#"{"type": "leaderboard", "rows": []}"#).await;
    server
        .push_text(r#"{"type": "signal_status", "signal_id": 7, "status": "pending"}"#)
        .await;
    server
        .push_text(r#"{"type": "signal_status", "signal_id": 7, "status": "expired"}"#)
        .await;

    let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        event,
        PushEvent::StatusChanged {
            id: SignalId::new(7),
            status: sigdesk_core::SignalStatus::Expired,
        }
    );
    assert_eq!(manager.state(), ConnectionState::Open);
    assert_eq!(server.connection_count().await, 1);

    manager.close();
    let _ = timeout(WAIT, handle).await;
    server.shutdown().await;
}

/// Test the backoff schedule grows on failed opens and resets after a
/// successful one.
#[tokio::test]
async fn test_backoff_grows_then_resets_after_open() {
    let server = MockWsServer::start().await;
    server.set_mode(Mode::RejectHandshake(503)).await;
    let (manager, _rx) = manager(server.url(), None, 40, 2_000);
    let handle = spawn_open(&manager);

    assert!(server.wait_for_connections(4, WAIT).await);
    let at: Vec<_> = server.handshakes().await.iter().map(|h| h.at).collect();
    for (i, expected_ms) in [40u64, 80, 160].into_iter().enumerate() {
        let gap = at[i + 1].duration_since(at[i]);
        assert!(
            gap >= Duration::from_millis(expected_ms - 5),
            "gap {i} was {gap:?}, expected at least {expected_ms}ms"
        );
    }

    server.set_mode(Mode::Accept).await;
    assert!(server.wait_for_live(1, WAIT).await);
    assert!(wait_for_state(&manager, ConnectionState::Open).await);
    assert_eq!(manager.attempt(), 0);

    // Lost after a successful open: the next delay is the base again,
    // well under the 320ms the failed streak had reached.
    let count = server.connection_count().await;
    server.drop_all().await;
    assert!(server.wait_for_connections(count + 1, WAIT).await);
    let handshakes = server.handshakes().await;
    let gap = handshakes[count].at.duration_since(handshakes[count - 1].at);
    assert!(gap < Duration::from_millis(300), "reconnect gap was {gap:?}");
    assert!(server.wait_for_live(1, WAIT).await);
    assert!(wait_for_state(&manager, ConnectionState::Open).await);
    assert_eq!(manager.attempt(), 0);

    manager.close();
    let _ = timeout(WAIT, handle).await;
    server.shutdown().await;
}

/// Test that a non-auth close code from the server leads to a reconnect.
#[tokio::test]
async fn test_remote_close_reconnects() {
    let server = MockWsServer::start().await;
    let (manager, _rx) = manager(server.url(), None, 20, 100);
    let handle = spawn_open(&manager);
    assert!(server.wait_for_live(1, WAIT).await);

    server.close_all(1011, "server restart").await;

    assert!(server.wait_for_connections(2, WAIT).await);
    assert!(server.wait_for_live(1, WAIT).await);
    assert!(!manager.is_closed());

    manager.close();
    let _ = timeout(WAIT, handle).await;
    server.shutdown().await;
}

/// Test that close code 4001 ends the lifecycle without reconnecting.
#[tokio::test]
async fn test_auth_close_code_is_final() {
    let server = MockWsServer::start().await;
    server.set_mode(Mode::CloseAfterOpen(4001)).await;
    let (manager, _rx) = manager(server.url(), Some("expired"), 20, 100);

    let result = timeout(WAIT, spawn_open(&manager)).await.unwrap().unwrap();

    match result {
        Err(WsError::AuthRejected { code, .. }) => assert_eq!(code, 4001),
        other => panic!("Expected AuthRejected, got {other:?}"),
    }
    assert_eq!(manager.state(), ConnectionState::ClosedFinal);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.connection_count().await, 1);
    server.shutdown().await;
}

/// Test that an HTTP 401 handshake is an authentication rejection.
#[tokio::test]
async fn test_handshake_401_is_final() {
    let server = MockWsServer::start().await;
    server.set_mode(Mode::RejectHandshake(401)).await;
    let (manager, _rx) = manager(server.url(), None, 20, 100);

    let result = timeout(WAIT, spawn_open(&manager)).await.unwrap().unwrap();

    assert!(result.as_ref().is_err_and(|e| e.is_auth_rejected()), "{result:?}");
    assert_eq!(manager.state(), ConnectionState::ClosedFinal);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.connection_count().await, 1);
    server.shutdown().await;
}

/// Test that close() during a backoff wait ends the lifecycle promptly.
#[tokio::test]
async fn test_close_during_backoff() {
    let server = MockWsServer::start().await;
    server.set_mode(Mode::DropAfterOpen).await;
    let (manager, _rx) = manager(server.url(), None, 10_000, 30_000);
    let handle = spawn_open(&manager);

    assert!(server.wait_for_connections(1, WAIT).await);
    assert!(wait_for_state(&manager, ConnectionState::ClosedPendingRetry).await);

    manager.close();

    let result = timeout(Duration::from_secs(1), handle).await;
    assert!(result.is_ok(), "open() should return promptly after close()");
    assert_eq!(manager.state(), ConnectionState::ClosedFinal);
    assert_eq!(server.connection_count().await, 1);
    server.shutdown().await;
}

/// Test that close() while open sends a Close frame to the server.
#[tokio::test]
async fn test_close_while_open_sends_close_frame() {
    let server = MockWsServer::start().await;
    let (manager, mut rx) = manager(server.url(), None, 50, 200);
    let handle = spawn_open(&manager);
    assert!(server.wait_for_live(1, WAIT).await);

    manager.close();

    assert!(timeout(WAIT, handle).await.unwrap().unwrap().is_ok());
    let server_ref = &server;
    assert!(eventually(WAIT, || async move { server_ref.client_closes().await == 1 }).await);
    assert_eq!(manager.state(), ConnectionState::ClosedFinal);

    // Nothing is forwarded after close.
    server.push_text(r#"{"type": "signal_status", "signal_id": 1, "status": "skipped"}"#).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());

    server.shutdown().await;
}

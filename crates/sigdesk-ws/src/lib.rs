//! Push channel client for the signal desk.
//!
//! Provides:
//! - Automatic reconnection with exponential backoff (no jitter)
//! - Authentication rejection detection (close code 4001, HTTP 401/403)
//! - Frame decoding into typed push events; bad frames are dropped
//! - Channel-based event routing

pub mod backoff;
pub mod connection;
pub mod error;
pub mod message;

pub use backoff::Backoff;
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState, AUTH_CLOSE_CODE};
pub use error::{DecodeError, WsError, WsResult};
pub use message::{decode, try_decode, ExecutionReport, PushEvent};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any `wss://` connection is made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

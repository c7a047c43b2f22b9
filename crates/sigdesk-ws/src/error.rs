//! Push channel error types.

use sigdesk_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    /// The server refused the credential. Not retried.
    #[error("Authentication rejected: code={code}, reason={reason}")]
    AuthRejected { code: u16, reason: String },

    #[error("Connection manager already started")]
    AlreadyStarted,

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WsError {
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, Self::AuthRejected { .. })
    }
}

pub type WsResult<T> = Result<T, WsError>;

/// Reasons a push frame is dropped by the decoder.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Frame is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Frame has no type field")]
    MissingType,

    #[error("Unknown frame type: {0}")]
    UnknownType(String),

    #[error("Invalid {kind} payload: {message}")]
    InvalidPayload { kind: &'static str, message: String },

    #[error("Invalid signal record: {0}")]
    InvalidSignal(#[from] CoreError),

    #[error("Status {0} cannot be pushed")]
    NonTerminalStatus(String),
}

impl DecodeError {
    /// Metric label for the drop reason.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "invalid_json",
            Self::MissingType => "missing_type",
            Self::UnknownType(_) => "unknown_type",
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::InvalidSignal(_) => "invalid_signal",
            Self::NonTerminalStatus(_) => "non_terminal_status",
        }
    }
}

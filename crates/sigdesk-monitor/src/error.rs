//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<sigdesk_ws::WsError>),

    #[error("API error: {0}")]
    Api(#[from] sigdesk_api::ApiError),

    #[error("Sync error: {0}")]
    Sync(#[from] sigdesk_sync::SyncError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] sigdesk_telemetry::TelemetryError),

    #[error("Signal {0} not actionable: {1}")]
    NotActionable(sigdesk_core::SignalId, String),
}

impl AppError {
    /// The server refused the credential; re-authentication is required.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::WebSocket(e) => e.is_auth_rejected(),
            Self::Api(e) => e.is_unauthorized(),
            Self::Sync(e) => e.is_unauthorized(),
            _ => false,
        }
    }
}

impl From<sigdesk_ws::WsError> for AppError {
    fn from(e: sigdesk_ws::WsError) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

pub type AppResult<T> = Result<T, AppError>;

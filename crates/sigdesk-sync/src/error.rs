//! Synchronization error types.

use sigdesk_api::ApiError;
use sigdesk_core::SignalId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The signal book actor is gone.
    #[error("Signal book engine stopped")]
    EngineStopped,

    #[error("Action coordinator closed")]
    CoordinatorClosed,

    /// Snapshot fetch failed. The collection was left unchanged.
    #[error("Snapshot fetch failed: {0}")]
    FetchFailed(#[source] ApiError),

    /// Remote command failed. The optimistic status was rolled back.
    #[error("{action} of signal {id} failed: {source}")]
    CommandFailed {
        id: SignalId,
        action: &'static str,
        #[source]
        source: ApiError,
    },
}

impl SyncError {
    /// Whether the underlying API error was an authentication failure.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Self::FetchFailed(e) | Self::CommandFailed { source: e, .. } => e.is_unauthorized(),
            _ => false,
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

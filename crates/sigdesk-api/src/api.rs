//! Remote command interface.
//!
//! Provides a trait-based abstraction over the signal server so the
//! synchronization core can be driven by a test double.

use crate::error::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sigdesk_core::{MarginMode, Signal, SignalFilter, SignalId, TradingFlag};
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Default leverage for confirm.
pub const DEFAULT_LEVERAGE: u32 = 3;

/// Confirm command parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmRequest {
    pub leverage: u32,
    pub margin_mode: MarginMode,
    /// Omitted: the server uses its configured trading mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<TradingFlag>,
}

impl Default for ConfirmRequest {
    fn default() -> Self {
        Self {
            leverage: DEFAULT_LEVERAGE,
            margin_mode: MarginMode::Isolated,
            flag: None,
        }
    }
}

impl ConfirmRequest {
    pub fn with_leverage(leverage: u32) -> Self {
        Self {
            leverage,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> ApiResult<()> {
        if self.leverage == 0 {
            return Err(ApiError::InvalidRequest(
                "leverage must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Server reply to a confirm.
///
/// The server records `confirmed` before placing the order, so `success`
/// only reports the order execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmAck {
    pub signal_id: SignalId,
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Execution details (order ids, sizes), kept opaque.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl ConfirmAck {
    pub fn executed(signal_id: SignalId) -> Self {
        Self {
            signal_id,
            success: true,
            error: None,
            details: Map::new(),
        }
    }

    pub fn execution_failed(signal_id: SignalId, error: impl Into<String>) -> Self {
        Self {
            signal_id,
            success: false,
            error: Some(error.into()),
            details: Map::new(),
        }
    }
}

/// Server reply to a skip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipAck {
    pub signal_id: SignalId,
    pub status: String,
}

/// Trait for the signal server's command interface.
pub trait SignalApi: Send + Sync {
    /// Fetch the signals matching `filter`.
    fn fetch_signals<'a>(&'a self, filter: &'a SignalFilter) -> BoxFuture<'a, ApiResult<Vec<Signal>>>;

    /// Fetch a single signal.
    fn fetch_signal(&self, id: SignalId) -> BoxFuture<'_, ApiResult<Signal>>;

    /// Confirm a signal and request order execution.
    fn confirm(&self, id: SignalId, request: ConfirmRequest) -> BoxFuture<'_, ApiResult<ConfirmAck>>;

    /// Skip a signal.
    fn skip(&self, id: SignalId) -> BoxFuture<'_, ApiResult<SkipAck>>;
}

/// Arc wrapper for SignalApi trait objects.
pub type DynSignalApi = Arc<dyn SignalApi>;

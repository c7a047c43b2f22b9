//! Error types for sigdesk-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid strength: {0} (expected 1-3)")]
    InvalidStrength(u8),

    #[error("Invalid signal id: {0}")]
    InvalidSignalId(u64),

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

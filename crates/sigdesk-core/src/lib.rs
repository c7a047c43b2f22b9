//! Core domain types for the signal desk client.
//!
//! This crate provides fundamental types used throughout the workspace:
//! - `Signal`, `SignalId`, `SignalStatus`: the signal entity and its state machine
//! - `Price`: precision-safe price levels
//! - `SignalFilter`: fetch and view scoping
//! - `CredentialSource`: opaque bearer credential supply

pub mod command;
pub mod credential;
pub mod decimal;
pub mod error;
pub mod filter;
pub mod signal;

pub use command::{MarginMode, TradingFlag};
pub use credential::{CredentialSource, SharedCredential, StaticCredential};
pub use decimal::Price;
pub use error::{CoreError, Result};
pub use filter::{SignalFilter, DEFAULT_LIMIT};
pub use signal::{parse_timestamp, Direction, Signal, SignalId, SignalStatus, Strength};

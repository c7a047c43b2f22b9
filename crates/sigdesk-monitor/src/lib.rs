//! Signal desk monitor.
//!
//! Wires the synchronization core into a command-line client:
//! - Push channel with automatic reconnection
//! - Snapshot loading (initial, periodic, after reconnect)
//! - Change notification logging
//! - One-shot list, confirm and skip commands

pub mod app;
pub mod config;
pub mod error;

pub use app::{Application, Session};
pub use config::AppConfig;
pub use error::{AppError, AppResult};

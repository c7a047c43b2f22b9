//! Prometheus metrics and structured logging for the signal desk client.
//!
//! - Prometheus metrics for the push channel, fetches and operator actions
//! - Structured JSON logging with tracing

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;

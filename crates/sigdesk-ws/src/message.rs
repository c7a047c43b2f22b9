//! Push frame decoding.
//!
//! Frames are JSON text objects discriminated by `type`:
//!
//! ```text
//! { "type": "new_signal",      "signal": <Signal> }
//! { "type": "signal_status",   "signal_id": 1, "status": "confirmed" }   (any non-pending status)
//! { "type": "signal_executed", "signal_id": 1, "result": { "success": true, ... } }
//! { "type": "signal_error",    "signal_id": 1, "result": { "success": false, "error": "..." } }
//! ```
//!
//! Anything else is dropped. A bad frame never affects the connection.

use crate::error::DecodeError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sigdesk_core::{Signal, SignalId, SignalStatus};
use sigdesk_telemetry::Metrics;
use tracing::{trace, warn};

// ============================================================================
// Events
// ============================================================================

/// Order execution outcome reported after a confirm.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub signal_id: SignalId,
    pub success: bool,
    pub error: Option<String>,
    /// Remaining result fields, kept opaque.
    pub details: Map<String, Value>,
}

/// Typed event decoded from a push frame.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// A signal was created server-side.
    NewSignal(Signal),
    /// A signal reached a terminal status.
    StatusChanged { id: SignalId, status: SignalStatus },
    /// Execution result for a confirmed signal. Carries no status change.
    Execution(ExecutionReport),
}

impl PushEvent {
    /// Metric label for the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewSignal(_) => "new_signal",
            Self::StatusChanged { .. } => "signal_status",
            Self::Execution(_) => "execution",
        }
    }

    pub fn signal_id(&self) -> SignalId {
        match self {
            Self::NewSignal(signal) => signal.id,
            Self::StatusChanged { id, .. } => *id,
            Self::Execution(report) => report.signal_id,
        }
    }
}

// ============================================================================
// Wire payloads
// ============================================================================

#[derive(Debug, Deserialize)]
struct NewSignalPayload {
    signal: Signal,
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    signal_id: SignalId,
    status: SignalStatus,
}

#[derive(Debug, Deserialize)]
struct ExecutionPayload {
    signal_id: SignalId,
    #[serde(default)]
    result: ExecutionResult,
}

#[derive(Debug, Default, Deserialize)]
struct ExecutionResult {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    details: Map<String, Value>,
}

fn payload<T: DeserializeOwned>(
    kind: &'static str,
    frame: Value,
) -> Result<T, DecodeError> {
    serde_json::from_value(frame).map_err(|e| DecodeError::InvalidPayload {
        kind,
        message: e.to_string(),
    })
}

// ============================================================================
// Decoder
// ============================================================================

/// Decode a text frame, reporting why it was rejected.
pub fn try_decode(text: &str) -> Result<PushEvent, DecodeError> {
    let frame: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

    let frame_type = frame
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?
        .to_string();

    match frame_type.as_str() {
        "new_signal" => {
            let NewSignalPayload { signal } = payload("new_signal", frame)?;
            signal.validate()?;
            Ok(PushEvent::NewSignal(signal))
        }
        "signal_status" => {
            let StatusPayload { signal_id, status } = payload("signal_status", frame)?;
            if !status.is_terminal() {
                return Err(DecodeError::NonTerminalStatus(status.to_string()));
            }
            Ok(PushEvent::StatusChanged {
                id: signal_id,
                status,
            })
        }
        "signal_executed" | "signal_error" => {
            let kind = if frame_type == "signal_executed" {
                "signal_executed"
            } else {
                "signal_error"
            };
            let ExecutionPayload { signal_id, result } = payload(kind, frame)?;
            let success = kind == "signal_executed" && result.success.unwrap_or(true);
            Ok(PushEvent::Execution(ExecutionReport {
                signal_id,
                success,
                error: result.error,
                details: result.details,
            }))
        }
        _ => Err(DecodeError::UnknownType(frame_type)),
    }
}

/// Decode a text frame. Rejected frames are logged, counted and dropped.
pub fn decode(text: &str) -> Option<PushEvent> {
    match try_decode(text) {
        Ok(event) => {
            trace!(kind = event.kind(), id = %event.signal_id(), "Decoded push frame");
            Metrics::push_frame(event.kind());
            Some(event)
        }
        Err(e) => {
            warn!(reason = e.reason(), error = %e, "Dropping push frame");
            Metrics::push_frame_dropped(e.reason());
            None
        }
    }
}

//! Prometheus metrics for the signal desk client.
//!
//! Covers:
//! - Push connection state and reconnects
//! - Push frame decoding
//! - Snapshot fetches
//! - Operator actions and rollbacks
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A failure means duplicate metric
//! names, which must crash at startup rather than fail silently. These
//! panics only occur during static initialization, never at runtime.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_int_gauge, CounterVec, Encoder, GaugeVec,
    IntGauge, TextEncoder,
};

/// Connection states, in lifecycle order.
const WS_STATES: [&str; 5] = [
    "idle",
    "connecting",
    "open",
    "closed_pending_retry",
    "closed_final",
];

/// Push connection state (1 = active, 0 = inactive).
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "sigdesk_ws_state",
        "Push connection state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Scheduled reconnection attempts.
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sigdesk_ws_reconnect_total",
        "Total push connection reconnection attempts scheduled",
        &["reason"]
    )
    .unwrap()
});

/// Push frames decoded into events.
pub static PUSH_FRAMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sigdesk_push_frames_total",
        "Total push frames decoded by event type",
        &["kind"]
    )
    .unwrap()
});

/// Push frames dropped by the decoder.
pub static PUSH_FRAMES_DROPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sigdesk_push_frames_dropped_total",
        "Total push frames dropped by the decoder",
        &["reason"]
    )
    .unwrap()
});

/// Snapshot fetch outcomes.
pub static FETCH_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sigdesk_fetch_total",
        "Total snapshot fetches by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Operator action outcomes.
pub static ACTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sigdesk_actions_total",
        "Total confirm/skip actions by outcome",
        &["action", "outcome"]
    )
    .unwrap()
});

/// Optimistic updates rolled back.
pub static ROLLBACK_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sigdesk_rollback_total",
        "Total optimistic status updates rolled back",
        &["action"]
    )
    .unwrap()
});

/// Entries in the visible collection.
pub static VISIBLE_SIGNALS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "sigdesk_visible_signals",
        "Number of signals in the visible collection"
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Set the active connection state. All other states are zeroed.
    pub fn ws_state_set(state: &str) {
        for s in WS_STATES {
            WS_STATE.with_label_values(&[s]).set(0.0);
        }
        WS_STATE.with_label_values(&[state]).set(1.0);
    }

    pub fn ws_reconnect(reason: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn push_frame(kind: &str) {
        PUSH_FRAMES_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn push_frame_dropped(reason: &str) {
        PUSH_FRAMES_DROPPED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn fetch(outcome: &str) {
        FETCH_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn action(action: &str, outcome: &str) {
        ACTIONS_TOTAL.with_label_values(&[action, outcome]).inc();
    }

    pub fn rollback(action: &str) {
        ROLLBACK_TOTAL.with_label_values(&[action]).inc();
    }

    pub fn visible_signals(count: usize) {
        VISIBLE_SIGNALS.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Render the default registry in Prometheus text format.
    pub fn gather_text() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let families = prometheus::gather();
        let mut buf = Vec::new();
        encoder
            .encode(&families, &mut buf)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

//! In-process signal server double.
//!
//! Keeps a server-side signal list, records every call, and can be told to
//! fail or to hold requests in flight until released.

use crate::api::{BoxFuture, ConfirmAck, ConfirmRequest, SignalApi, SkipAck};
use crate::client::error_from_status;
use crate::error::{ApiError, ApiResult};
use parking_lot::Mutex;
use sigdesk_core::{Signal, SignalFilter, SignalId, SignalStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// A recorded call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    FetchSignals(SignalFilter),
    FetchSignal(SignalId),
    Confirm(SignalId, ConfirmRequest),
    Skip(SignalId),
}

/// Failure to inject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    /// Non-success HTTP status with a `detail` message.
    Status(u16, String),
    /// Transport failure.
    Transport(String),
}

impl MockFailure {
    fn to_error(&self) -> ApiError {
        match self {
            Self::Status(status, detail) => {
                error_from_status(*status, &serde_json::json!({ "detail": detail }).to_string())
            }
            Self::Transport(message) => ApiError::HttpClient(message.clone()),
        }
    }
}

/// Mock signal server for testing.
#[derive(Debug, Default)]
pub struct MockSignalApi {
    /// Server-side signals, newest first.
    signals: Mutex<Vec<Signal>>,
    calls: Mutex<Vec<MockCall>>,
    fetch_failure: Mutex<Option<MockFailure>>,
    command_failure: Mutex<Option<MockFailure>>,
    /// Error reported in confirm acks (server accepted, order failed).
    execution_error: Mutex<Option<String>>,
    fetch_gate: Mutex<Option<Arc<Notify>>>,
    command_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockSignalApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signals(signals: Vec<Signal>) -> Self {
        let mock = Self::default();
        mock.set_signals(signals);
        mock
    }

    /// Replace the server-side signal list.
    pub fn set_signals(&self, signals: Vec<Signal>) {
        *self.signals.lock() = signals;
    }

    /// Add a signal on the server side (newest first).
    pub fn insert_signal(&self, signal: Signal) {
        self.signals.lock().insert(0, signal);
    }

    /// Change a status on the server side.
    pub fn set_status(&self, id: SignalId, status: SignalStatus) {
        if let Some(signal) = self.signals.lock().iter_mut().find(|s| s.id == id) {
            signal.status = status;
        }
    }

    pub fn server_status(&self, id: SignalId) -> Option<SignalStatus> {
        self.signals
            .lock()
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.status)
    }

    /// Fail every fetch until cleared with `None`.
    pub fn set_fetch_failure(&self, failure: Option<MockFailure>) {
        *self.fetch_failure.lock() = failure;
    }

    /// Fail every confirm/skip until cleared with `None`.
    pub fn set_command_failure(&self, failure: Option<MockFailure>) {
        *self.command_failure.lock() = failure;
    }

    /// Report an execution failure in confirm acks.
    pub fn set_execution_error(&self, error: Option<String>) {
        *self.execution_error.lock() = error;
    }

    /// Hold fetches until `notify_one()` is called on the returned gate.
    ///
    /// The fetch result is captured when the call arrives, before the hold.
    pub fn hold_fetches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.fetch_gate.lock() = Some(gate.clone());
        gate
    }

    /// Hold confirm/skip until `notify_one()` is called on the returned gate.
    pub fn hold_commands(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.command_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn release_holds(&self) {
        *self.fetch_gate.lock() = None;
        *self.command_gate.lock() = None;
    }

    /// Get recorded calls.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Wait until at least `count` calls were recorded.
    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.calls.lock().len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.calls.lock().len() >= count
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().push(call);
    }

    async fn pass_gate(gate: &Mutex<Option<Arc<Notify>>>) {
        let gate = gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }

    fn command_error(&self) -> Option<ApiError> {
        self.command_failure.lock().as_ref().map(MockFailure::to_error)
    }

    fn find(&self, id: SignalId) -> ApiResult<Signal> {
        self.signals
            .lock()
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| ApiError::Rejected {
                status: 404,
                detail: "Signal not found".to_string(),
            })
    }
}

impl SignalApi for MockSignalApi {
    fn fetch_signals<'a>(&'a self, filter: &'a SignalFilter) -> BoxFuture<'a, ApiResult<Vec<Signal>>> {
        Box::pin(async move {
            self.record(MockCall::FetchSignals(filter.clone()));
            let snapshot: Vec<Signal> = self
                .signals
                .lock()
                .iter()
                .filter(|s| filter.matches(s))
                .take(filter.limit as usize)
                .cloned()
                .collect();
            let failure = self.fetch_failure.lock().clone();

            Self::pass_gate(&self.fetch_gate).await;

            match failure {
                Some(failure) => Err(failure.to_error()),
                None => Ok(snapshot),
            }
        })
    }

    fn fetch_signal(&self, id: SignalId) -> BoxFuture<'_, ApiResult<Signal>> {
        Box::pin(async move {
            self.record(MockCall::FetchSignal(id));
            let result = match self.fetch_failure.lock().clone() {
                Some(failure) => Err(failure.to_error()),
                None => self.find(id),
            };

            Self::pass_gate(&self.fetch_gate).await;
            result
        })
    }

    fn confirm(&self, id: SignalId, request: ConfirmRequest) -> BoxFuture<'_, ApiResult<ConfirmAck>> {
        Box::pin(async move {
            self.record(MockCall::Confirm(id, request));
            Self::pass_gate(&self.command_gate).await;

            if let Some(e) = self.command_error() {
                return Err(e);
            }
            self.find(id)?;
            self.set_status(id, SignalStatus::Confirmed);

            Ok(match self.execution_error.lock().clone() {
                Some(error) => ConfirmAck::execution_failed(id, error),
                None => ConfirmAck::executed(id),
            })
        })
    }

    fn skip(&self, id: SignalId) -> BoxFuture<'_, ApiResult<SkipAck>> {
        Box::pin(async move {
            self.record(MockCall::Skip(id));
            Self::pass_gate(&self.command_gate).await;

            if let Some(e) = self.command_error() {
                return Err(e);
            }
            self.find(id)?;
            self.set_status(id, SignalStatus::Skipped);

            Ok(SkipAck {
                signal_id: id,
                status: SignalStatus::Skipped.to_string(),
            })
        })
    }
}

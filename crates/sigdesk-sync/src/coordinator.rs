//! Action coordinator: confirm and skip.
//!
//! ```text
//! pending --confirm--> confirmed   (optimistic, then command)
//! pending --skip-----> skipped     (optimistic, then command)
//!           command error -> rolled back to the exact prior status
//! ```
//!
//! Actions on non-pending signals are no-ops. A confirm the server
//! accepted but whose order failed (`success: false`) stays confirmed;
//! the server has already recorded it.
//!
//! While a command is in flight the entry is pinned against baseline
//! status writes. The pin is released on every exit path, including a
//! result arriving after `close()` and a cancelled call.

use crate::book::{ActionRejected, OptimisticTicket};
use crate::engine::SignalBookHandle;
use crate::error::{SyncError, SyncResult};
use sigdesk_api::{ApiResult, ConfirmAck, ConfirmRequest, DynSignalApi, SkipAck};
use sigdesk_core::{SignalId, SignalStatus};
use sigdesk_telemetry::Metrics;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Operator action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Confirm,
    Skip,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirm => "confirm",
            Self::Skip => "skip",
        }
    }

    /// Status applied optimistically.
    pub fn target_status(&self) -> SignalStatus {
        match self {
            Self::Confirm => SignalStatus::Confirmed,
            Self::Skip => SignalStatus::Skipped,
        }
    }
}

/// Server acknowledgement of an applied action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionAck {
    Confirmed(ConfirmAck),
    Skipped(SkipAck),
}

impl ActionAck {
    /// Order execution error reported alongside an accepted confirm.
    pub fn execution_error(&self) -> Option<&str> {
        match self {
            Self::Confirmed(ack) if !ack.success => {
                Some(ack.error.as_deref().unwrap_or("order execution failed"))
            }
            _ => None,
        }
    }
}

/// Result of a confirm/skip request.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// The server accepted the command; the optimistic status stands.
    Applied(ActionAck),
    /// The signal was not pending (or unknown). Nothing was sent.
    Ignored(ActionRejected),
}

impl ActionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Keeps an optimistic transition pinned until disarmed or dropped.
struct InFlight {
    book: SignalBookHandle,
    ticket: OptimisticTicket,
    armed: bool,
}

impl InFlight {
    fn new(book: SignalBookHandle, ticket: OptimisticTicket) -> Self {
        Self {
            book,
            ticket,
            armed: true,
        }
    }

    /// Hand the ticket to an explicit settle or rollback.
    fn disarm(mut self) -> OptimisticTicket {
        self.armed = false;
        self.ticket
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.armed {
            self.book.release(self.ticket);
        }
    }
}

/// Issues confirm/skip commands with optimistic local transitions.
#[derive(Clone)]
pub struct ActionCoordinator {
    api: DynSignalApi,
    book: SignalBookHandle,
    /// Parameters used by `confirm_default`.
    defaults: ConfirmRequest,
    closed: Arc<AtomicBool>,
}

impl ActionCoordinator {
    pub fn new(api: DynSignalApi, book: SignalBookHandle, defaults: ConfirmRequest) -> Self {
        Self {
            api,
            book,
            defaults,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Confirm with the configured defaults.
    pub async fn confirm_default(&self, id: SignalId) -> SyncResult<ActionOutcome> {
        self.confirm(id, self.defaults.clone()).await
    }

    /// Confirm a pending signal and request order execution.
    pub async fn confirm(&self, id: SignalId, request: ConfirmRequest) -> SyncResult<ActionOutcome> {
        let api = self.api.clone();
        self.execute(ActionKind::Confirm, id, async move {
            api.confirm(id, request).await.map(ActionAck::Confirmed)
        })
        .await
    }

    /// Skip a pending signal.
    pub async fn skip(&self, id: SignalId) -> SyncResult<ActionOutcome> {
        let api = self.api.clone();
        self.execute(ActionKind::Skip, id, async move {
            api.skip(id).await.map(ActionAck::Skipped)
        })
        .await
    }

    /// Refuse new actions and ignore results still in flight.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("ActionCoordinator closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn execute<F>(&self, kind: ActionKind, id: SignalId, command: F) -> SyncResult<ActionOutcome>
    where
        F: Future<Output = ApiResult<ActionAck>>,
    {
        let action = kind.as_str();
        if self.is_closed() {
            return Err(SyncError::CoordinatorClosed);
        }

        let in_flight = match self.book.apply_optimistic(id, kind.target_status()).await? {
            Ok(ticket) => InFlight::new(self.book.clone(), ticket),
            Err(rejected) => {
                debug!(%id, action, reason = %rejected, "Action ignored");
                Metrics::action(action, "ignored");
                return Ok(ActionOutcome::Ignored(rejected));
            }
        };

        let result = command.await;

        if self.is_closed() {
            // Released without rollback; the next fresh baseline decides.
            debug!(%id, action, "Ignoring command result after close");
            return Err(SyncError::CoordinatorClosed);
        }
        let ticket = in_flight.disarm();

        match result {
            Ok(ack) => {
                self.book.settle(ticket).await?;
                match ack.execution_error() {
                    Some(error) => {
                        warn!(%id, action, error, "Server accepted action but execution failed");
                        Metrics::action(action, "execution_failed");
                    }
                    None => {
                        info!(%id, action, "Action applied");
                        Metrics::action(action, "ok");
                    }
                }
                Ok(ActionOutcome::Applied(ack))
            }
            Err(e) => {
                let restored = self.book.rollback(ticket).await?;
                Metrics::action(action, "failed");
                if restored.is_some() {
                    Metrics::rollback(action);
                }
                warn!(
                    %id,
                    action,
                    error = %e,
                    rolled_back = restored.is_some(),
                    "Action failed"
                );
                Err(SyncError::CommandFailed {
                    id,
                    action,
                    source: e,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_signal_book;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use sigdesk_api::{MockCall, MockFailure, MockSignalApi};
    use sigdesk_core::{Direction, Price, Signal, SignalFilter, Strength};
    use sigdesk_ws::PushEvent;
    use std::time::Duration;

    fn signal(id: u64) -> Signal {
        Signal::new(
            SignalId::new(id),
            "BTC-USDT-SWAP",
            "4H",
            Direction::Long,
            Strength::new(2).unwrap(),
            Price::new(dec!(64000)),
            Price::new(dec!(62500)),
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        )
    }

    async fn setup(signals: Vec<Signal>) -> (Arc<MockSignalApi>, SignalBookHandle, ActionCoordinator) {
        let api = Arc::new(MockSignalApi::with_signals(signals.clone()));
        let (book, _join) = spawn_signal_book(16, SignalFilter::default());
        let ticket = book.begin_fetch().await.unwrap();
        book.apply_baseline(ticket, signals).await.unwrap();
        let coordinator = ActionCoordinator::new(api.clone(), book.clone(), ConfirmRequest::default());
        (api, book, coordinator)
    }

    fn status_of(book: &SignalBookHandle, id: u64) -> SignalStatus {
        book.get(SignalId::new(id)).map(|s| s.status).unwrap()
    }

    #[tokio::test]
    async fn test_confirm_success_keeps_status() {
        let (api, book, coordinator) = setup(vec![signal(1)]).await;

        let outcome = coordinator
            .confirm(SignalId::new(1), ConfirmRequest::with_leverage(5))
            .await
            .unwrap();

        assert!(outcome.is_applied());
        assert_eq!(status_of(&book, 1), SignalStatus::Confirmed);
        assert_eq!(
            api.calls(),
            vec![MockCall::Confirm(SignalId::new(1), ConfirmRequest::with_leverage(5))]
        );
    }

    #[tokio::test]
    async fn test_confirm_failure_rolls_back() {
        let (api, book, coordinator) = setup(vec![signal(1)]).await;
        api.set_command_failure(Some(MockFailure::Status(502, "exchange unavailable".into())));

        let err = coordinator.confirm_default(SignalId::new(1)).await.unwrap_err();

        assert!(matches!(
            err,
            SyncError::CommandFailed { action: "confirm", .. }
        ));
        assert_eq!(status_of(&book, 1), SignalStatus::Pending);
    }

    #[tokio::test]
    async fn test_optimistic_status_visible_while_in_flight() {
        let (api, book, coordinator) = setup(vec![signal(1)]).await;
        let gate = api.hold_commands();
        api.set_command_failure(Some(MockFailure::Transport("timeout".into())));

        let pending = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.skip(SignalId::new(1)).await })
        };
        assert!(api.wait_for_calls(1, Duration::from_secs(1)).await);
        assert_eq!(status_of(&book, 1), SignalStatus::Skipped);

        gate.notify_one();
        assert!(pending.await.unwrap().is_err());
        assert_eq!(status_of(&book, 1), SignalStatus::Pending);
    }

    #[tokio::test]
    async fn test_action_on_non_pending_is_ignored() {
        let (api, book, coordinator) = setup(vec![signal(1).with_status(SignalStatus::Expired)]).await;

        let outcome = coordinator.skip(SignalId::new(1)).await.unwrap();

        assert!(matches!(
            outcome,
            ActionOutcome::Ignored(ActionRejected::NotPending { .. })
        ));
        assert!(api.calls().is_empty());
        assert_eq!(status_of(&book, 1), SignalStatus::Expired);

        let outcome = coordinator.skip(SignalId::new(77)).await.unwrap();
        assert!(matches!(
            outcome,
            ActionOutcome::Ignored(ActionRejected::UnknownSignal(_))
        ));
    }

    #[tokio::test]
    async fn test_execution_failure_is_not_rolled_back() {
        let (api, book, coordinator) = setup(vec![signal(1)]).await;
        api.set_execution_error(Some("Insufficient balance".into()));

        let outcome = coordinator.confirm_default(SignalId::new(1)).await.unwrap();

        match outcome {
            ActionOutcome::Applied(ack) => {
                assert_eq!(ack.execution_error(), Some("Insufficient balance"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(status_of(&book, 1), SignalStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_rollback_yields_to_push_during_flight() {
        let (api, book, coordinator) = setup(vec![signal(1)]).await;
        let gate = api.hold_commands();
        api.set_command_failure(Some(MockFailure::Status(409, "conflict".into())));

        let pending = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.confirm_default(SignalId::new(1)).await })
        };
        assert!(api.wait_for_calls(1, Duration::from_secs(1)).await);

        book.apply_push(PushEvent::StatusChanged {
            id: SignalId::new(1),
            status: SignalStatus::Expired,
        })
        .await
        .unwrap();
        gate.notify_one();

        assert!(pending.await.unwrap().is_err());
        assert_eq!(status_of(&book, 1), SignalStatus::Expired);
    }

    #[tokio::test]
    async fn test_closed_coordinator_refuses_and_ignores_late_results() {
        let (api, book, coordinator) = setup(vec![signal(1), signal(2)]).await;
        let gate = api.hold_commands();
        api.set_command_failure(Some(MockFailure::Transport("reset".into())));

        let pending = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.skip(SignalId::new(1)).await })
        };
        assert!(api.wait_for_calls(1, Duration::from_secs(1)).await);

        coordinator.close();
        gate.notify_one();

        assert!(matches!(
            pending.await.unwrap(),
            Err(SyncError::CoordinatorClosed)
        ));
        // Late failure ignored: no rollback.
        assert_eq!(status_of(&book, 1), SignalStatus::Skipped);

        assert!(matches!(
            coordinator.skip(SignalId::new(2)).await,
            Err(SyncError::CoordinatorClosed)
        ));
        assert_eq!(api.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_fresh_baseline_corrects_status_after_close() {
        let (api, book, coordinator) = setup(vec![signal(1)]).await;
        let gate = api.hold_commands();
        api.set_command_failure(Some(MockFailure::Status(500, "database locked".into())));

        let pending = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.skip(SignalId::new(1)).await })
        };
        assert!(api.wait_for_calls(1, Duration::from_secs(1)).await);
        coordinator.close();
        gate.notify_one();
        assert!(pending.await.unwrap().is_err());
        assert_eq!(status_of(&book, 1), SignalStatus::Skipped);

        // The server still has it pending.
        let ticket = book.begin_fetch().await.unwrap();
        book.apply_baseline(ticket, vec![signal(1)]).await.unwrap();
        assert_eq!(status_of(&book, 1), SignalStatus::Pending);

        api.release_holds();
        api.set_command_failure(None);
        let replacement = ActionCoordinator::new(api.clone(), book.clone(), ConfirmRequest::default());
        let outcome = replacement.skip(SignalId::new(1)).await.unwrap();
        assert!(outcome.is_applied());
        assert_eq!(status_of(&book, 1), SignalStatus::Skipped);
    }

    #[tokio::test]
    async fn test_cancelled_action_releases_pin() {
        let (api, book, coordinator) = setup(vec![signal(1)]).await;
        let _gate = api.hold_commands();

        let pending = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.confirm_default(SignalId::new(1)).await })
        };
        assert!(api.wait_for_calls(1, Duration::from_secs(1)).await);
        assert_eq!(status_of(&book, 1), SignalStatus::Confirmed);

        pending.abort();
        assert!(pending.await.unwrap_err().is_cancelled());

        let ticket = book.begin_fetch().await.unwrap();
        book.apply_baseline(ticket, vec![signal(1)]).await.unwrap();
        assert_eq!(status_of(&book, 1), SignalStatus::Pending);
    }
}

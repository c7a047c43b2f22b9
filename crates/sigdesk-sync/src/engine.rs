//! Signal book actor.
//!
//! The book is owned by a single task; every mutation goes through its
//! channel, so inputs from the loader, the push channel and the action
//! coordinator are applied one at a time in arrival order. Each request
//! carries a oneshot reply so callers observe their own writes.
//!
//! Changes are published as [`BookNotification`]s on one broadcast
//! channel. The visible projection is mirrored into a shared cache for
//! synchronous reads.

use crate::book::{ActionRejected, FetchTicket, OptimisticTicket, SignalBook, SignalChange};
use crate::error::{SyncError, SyncResult};
use parking_lot::RwLock;
use serde::Serialize;
use sigdesk_core::{Signal, SignalFilter, SignalId, SignalStatus};
use sigdesk_telemetry::Metrics;
use sigdesk_ws::PushEvent;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Capacity of the notification channel.
const NOTIFICATION_CAPACITY: usize = 256;

/// Changes produced by one mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookNotification {
    /// Book revision after the mutation.
    pub version: u64,
    pub changes: Vec<SignalChange>,
}

// ============================================================================
// BookMsg
// ============================================================================

/// Messages for the signal book actor.
#[derive(Debug)]
pub enum BookMsg {
    BeginFetch {
        reply: oneshot::Sender<FetchTicket>,
    },
    ApplyBaseline {
        ticket: FetchTicket,
        signals: Vec<Signal>,
        reply: oneshot::Sender<Vec<SignalChange>>,
    },
    Push {
        event: PushEvent,
        reply: oneshot::Sender<Vec<SignalChange>>,
    },
    ApplyOptimistic {
        id: SignalId,
        status: SignalStatus,
        reply: oneshot::Sender<Result<OptimisticTicket, ActionRejected>>,
    },
    Rollback {
        ticket: OptimisticTicket,
        reply: oneshot::Sender<Option<SignalChange>>,
    },
    Settle {
        ticket: OptimisticTicket,
        reply: oneshot::Sender<()>,
    },
    /// Settle without a reply. Sent from `Drop`.
    Release { ticket: OptimisticTicket },
    SetFilter {
        filter: SignalFilter,
        reply: oneshot::Sender<()>,
    },
    /// Graceful shutdown.
    Shutdown,
}

// ============================================================================
// SignalBookTask
// ============================================================================

/// Snapshot mirrored for synchronous reads.
#[derive(Debug, Default)]
struct ViewCache {
    visible: Vec<Signal>,
    total: usize,
    filter: SignalFilter,
}

/// Signal book actor task.
pub struct SignalBookTask {
    rx: mpsc::Receiver<BookMsg>,
    book: SignalBook,
    notify_tx: broadcast::Sender<BookNotification>,
    view: Arc<RwLock<ViewCache>>,
}

impl SignalBookTask {
    /// Run the actor until Shutdown is received or every handle is dropped.
    pub async fn run(mut self) {
        debug!("SignalBookTask started");

        while let Some(msg) = self.rx.recv().await {
            if matches!(msg, BookMsg::Shutdown) {
                debug!("SignalBookTask shutting down");
                break;
            }
            self.handle_message(msg);
        }

        debug!("SignalBookTask terminated");
    }

    fn handle_message(&mut self, msg: BookMsg) {
        match msg {
            BookMsg::BeginFetch { reply } => {
                let _ = reply.send(self.book.begin_fetch());
            }
            BookMsg::ApplyBaseline {
                ticket,
                signals,
                reply,
            } => {
                trace!(rev = ticket.revision(), count = signals.len(), "Applying baseline");
                let changes = self.book.apply_baseline(ticket, signals);
                self.publish(&changes);
                let _ = reply.send(changes);
            }
            BookMsg::Push { event, reply } => {
                let changes = self.on_push(event);
                self.publish(&changes);
                let _ = reply.send(changes);
            }
            BookMsg::ApplyOptimistic { id, status, reply } => {
                let result = self
                    .book
                    .apply_optimistic(id, status)
                    .map(|(ticket, change)| {
                        self.publish(std::slice::from_ref(&change));
                        ticket
                    });
                let _ = reply.send(result);
            }
            BookMsg::Rollback { ticket, reply } => {
                let change = self.book.rollback(ticket);
                if let Some(change) = &change {
                    self.publish(std::slice::from_ref(change));
                }
                let _ = reply.send(change);
            }
            BookMsg::Settle { ticket, reply } => {
                self.book.settle(ticket);
                let _ = reply.send(());
            }
            BookMsg::Release { ticket } => {
                trace!(id = %ticket.id, "Releasing optimistic transition");
                self.book.settle(ticket);
            }
            BookMsg::SetFilter { filter, reply } => {
                debug!(?filter, "View filter changed");
                self.book.set_filter(filter);
                self.refresh_view();
                let _ = reply.send(());
            }
            BookMsg::Shutdown => {}
        }
    }

    fn on_push(&mut self, event: PushEvent) -> Vec<SignalChange> {
        let change = match event {
            PushEvent::NewSignal(signal) => self.book.apply_push_insert(signal),
            PushEvent::StatusChanged { id, status } => self.book.apply_push_status(id, status),
            PushEvent::Execution(report) => Some(SignalChange::ExecutionReported(report)),
        };
        change.into_iter().collect()
    }

    fn publish(&mut self, changes: &[SignalChange]) {
        if changes.is_empty() {
            return;
        }
        self.refresh_view();
        let notification = BookNotification {
            version: self.book.revision(),
            changes: changes.to_vec(),
        };
        // No receivers is fine.
        let _ = self.notify_tx.send(notification);
    }

    fn refresh_view(&self) {
        let visible = self.book.visible();
        Metrics::visible_signals(visible.len());
        let mut view = self.view.write();
        view.visible = visible;
        view.total = self.book.len();
        view.filter = self.book.filter().clone();
    }
}

// ============================================================================
// SignalBookHandle
// ============================================================================

/// Handle for interacting with the signal book actor.
#[derive(Clone)]
pub struct SignalBookHandle {
    tx: mpsc::Sender<BookMsg>,
    notify_tx: broadcast::Sender<BookNotification>,
    view: Arc<RwLock<ViewCache>>,
}

impl SignalBookHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> BookMsg) -> SyncResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| SyncError::EngineStopped)?;
        rx.await.map_err(|_| SyncError::EngineStopped)
    }

    /// Take a ticket for a fetch about to be issued.
    pub async fn begin_fetch(&self) -> SyncResult<FetchTicket> {
        self.request(|reply| BookMsg::BeginFetch { reply }).await
    }

    pub async fn apply_baseline(
        &self,
        ticket: FetchTicket,
        signals: Vec<Signal>,
    ) -> SyncResult<Vec<SignalChange>> {
        self.request(|reply| BookMsg::ApplyBaseline {
            ticket,
            signals,
            reply,
        })
        .await
    }

    pub async fn apply_push(&self, event: PushEvent) -> SyncResult<Vec<SignalChange>> {
        self.request(|reply| BookMsg::Push { event, reply }).await
    }

    pub async fn apply_optimistic(
        &self,
        id: SignalId,
        status: SignalStatus,
    ) -> SyncResult<Result<OptimisticTicket, ActionRejected>> {
        self.request(|reply| BookMsg::ApplyOptimistic { id, status, reply })
            .await
    }

    pub async fn rollback(&self, ticket: OptimisticTicket) -> SyncResult<Option<SignalChange>> {
        self.request(|reply| BookMsg::Rollback { ticket, reply }).await
    }

    pub async fn settle(&self, ticket: OptimisticTicket) -> SyncResult<()> {
        self.request(|reply| BookMsg::Settle { ticket, reply }).await
    }

    /// Settle without waiting for the actor.
    ///
    /// Usable from synchronous code such as `Drop`. If the channel is full
    /// the message is handed to a spawned task.
    pub fn release(&self, ticket: OptimisticTicket) {
        match self.tx.try_send(BookMsg::Release { ticket }) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(msg)) => {
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    let tx = self.tx.clone();
                    runtime.spawn(async move {
                        let _ = tx.send(msg).await;
                    });
                }
            }
        }
    }

    pub async fn set_filter(&self, filter: SignalFilter) -> SyncResult<()> {
        self.request(|reply| BookMsg::SetFilter { filter, reply }).await
    }

    /// Request graceful shutdown.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(BookMsg::Shutdown).await;
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<BookNotification> {
        self.notify_tx.subscribe()
    }

    // === Sync methods (cache reads) ===

    /// Visible projection: filtered, in collection order.
    pub fn view(&self) -> Vec<Signal> {
        self.view.read().visible.clone()
    }

    /// Visible entry by id.
    pub fn get(&self, id: SignalId) -> Option<Signal> {
        self.view.read().visible.iter().find(|s| s.id == id).cloned()
    }

    /// Number of entries held, including those filtered out of view.
    pub fn total(&self) -> usize {
        self.view.read().total
    }

    pub fn filter(&self) -> SignalFilter {
        self.view.read().filter.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

// ============================================================================
// Spawn function
// ============================================================================

/// Spawn the signal book actor.
#[must_use]
pub fn spawn_signal_book(
    capacity: usize,
    filter: SignalFilter,
) -> (SignalBookHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity);
    let (notify_tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);
    let view = Arc::new(RwLock::new(ViewCache {
        filter: filter.clone(),
        ..ViewCache::default()
    }));

    let task = SignalBookTask {
        rx,
        book: SignalBook::with_filter(filter),
        notify_tx: notify_tx.clone(),
        view: view.clone(),
    };

    let handle = SignalBookHandle {
        tx,
        notify_tx,
        view,
    };

    let join_handle = tokio::spawn(task.run());

    (handle, join_handle)
}

// ============================================================================
// Tests
// ============================================================================

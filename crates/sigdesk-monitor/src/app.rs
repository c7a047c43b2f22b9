//! Main application orchestration.
//!
//! ```text
//! ConnectionManager --PushEvent--> push pump --+
//!                                              v
//! SnapshotLoader ------baseline-------> SignalBookHandle --notifications--> logger
//!                                              ^
//! ActionCoordinator ---optimistic/rollback-----+
//! ```
//!
//! `watch` runs every component until ctrl-c, until the push channel is
//! closed for good, or until a background fetch is refused for lack of a
//! valid credential. `list`, `confirm` and `skip` run a book without a push
//! connection and stop when the command completes.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use sigdesk_api::{ConfirmRequest, DynSignalApi, RestSignalApi};
use sigdesk_core::{CredentialSource, SharedCredential, Signal, SignalId};
use sigdesk_sync::{
    spawn_signal_book, ActionCoordinator, ActionOutcome, BookNotification, SignalBookHandle,
    SignalChange, SnapshotLoader, SyncError,
};
use sigdesk_ws::{ConnectionManager, ConnectionState, PushEvent, WsResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Push event channel capacity.
const PUSH_CHANNEL_CAPACITY: usize = 1000;

/// Time allowed for the push connection to send its Close frame.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Main application.
pub struct Application {
    config: AppConfig,
    credentials: Arc<SharedCredential>,
    api: DynSignalApi,
    /// Set when talking to a real server; used to read the server trading mode.
    rest: Option<Arc<RestSignalApi>>,
}

impl Application {
    /// Create an application backed by the REST API.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let credentials = Arc::new(SharedCredential::new(config.credential.clone()));
        let rest = Arc::new(RestSignalApi::new(
            config.api_url.clone(),
            credentials.clone(),
            config.request_timeout(),
        )?);

        Ok(Self {
            config,
            credentials,
            api: rest.clone(),
            rest: Some(rest),
        })
    }

    /// Create an application backed by another `SignalApi` implementation.
    pub fn with_api(config: AppConfig, api: DynSignalApi) -> Self {
        let credentials = Arc::new(SharedCredential::new(config.credential.clone()));
        Self {
            config,
            credentials,
            api,
            rest: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Credential shared by the REST client and the push connection.
    ///
    /// A session manager replaces it here after re-authentication.
    pub fn credentials(&self) -> Arc<SharedCredential> {
        self.credentials.clone()
    }

    /// Start every component and load the initial snapshot.
    ///
    /// The push connection is opened before the first fetch so no event is
    /// missed between the two. A failed initial fetch is logged and left to
    /// the periodic refresh, unless the credential was refused.
    pub async fn start(&self) -> AppResult<Session> {
        let core = self.spawn_core();

        let (event_tx, event_rx) = mpsc::channel::<PushEvent>(PUSH_CHANNEL_CAPACITY);
        // First refusal wins.
        let (auth_tx, auth_rx) = mpsc::channel::<SyncError>(1);
        let credentials: Arc<dyn CredentialSource> = self.credentials.clone();
        let connection = Arc::new(ConnectionManager::new(
            self.config.connection_config(),
            credentials,
            event_tx,
        ));
        info!(url = %self.config.ws_url, "Opening push channel");

        let mut tasks = vec![
            tokio::spawn(pump_push_events(
                event_rx,
                core.book.clone(),
                core.loader.clone(),
                auth_tx.clone(),
            )),
            tokio::spawn(watch_connection(
                connection.subscribe_state(),
                core.loader.clone(),
                auth_tx.clone(),
            )),
            tokio::spawn(log_notifications(core.book.subscribe())),
        ];
        if let Some(period) = self.config.refresh_interval() {
            tasks.push(tokio::spawn(refresh_periodically(
                core.loader.clone(),
                period,
                auth_tx,
            )));
        }

        let connection_task = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.open().await })
        };

        let session = Session {
            core,
            connection,
            connection_task: Some(connection_task),
            auth_rx,
            tasks,
        };

        match session.core.loader.refresh().await {
            Ok(count) => info!(count, "Initial snapshot loaded"),
            Err(e) if e.is_unauthorized() => {
                error!(error = %e, "Credential rejected by the signal server");
                session.shutdown().await;
                return Err(e.into());
            }
            Err(e) => warn!(error = %e, "Initial snapshot failed, waiting for the next refresh"),
        }

        Ok(session)
    }

    /// Run until ctrl-c or until the push channel closes for good.
    pub async fn run(self) -> AppResult<()> {
        if let Some(rest) = &self.rest {
            match rest.trading_mode().await {
                Ok(mode) => info!(flag = %mode.flag, mode = %mode.mode, "Server trading mode"),
                Err(e) => warn!(error = %e, "Could not read server trading mode"),
            }
        }

        let mut session = self.start().await?;

        info!("Entering main loop");
        let result = tokio::select! {
            result = session.closed() => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                Ok(())
            }
        };

        info!(
            visible = session.book().view().len(),
            total = session.book().total(),
            "Shutting down"
        );
        session.shutdown().await;

        if let Err(e) = &result {
            if e.is_auth_failure() {
                error!(error = %e, "Signal server refused the credential, re-authentication required");
            }
        }
        result
    }

    /// Fetch the signals matching the configured filter.
    pub async fn list(&self) -> AppResult<Vec<Signal>> {
        let core = self.spawn_core();
        let result = core.loader.refresh().await;
        let view = core.book.view();
        core.stop().await;

        result?;
        Ok(view)
    }

    /// Confirm one signal.
    pub async fn confirm(&self, id: SignalId, request: ConfirmRequest) -> AppResult<ActionOutcome> {
        request.validate()?;
        let core = self.spawn_core();
        let result = match core.loader.refresh_one(id).await {
            Ok(_) => core.coordinator.confirm(id, request).await,
            Err(e) => Err(e),
        };
        core.stop().await;
        Ok(result?)
    }

    /// Skip one signal.
    pub async fn skip(&self, id: SignalId) -> AppResult<ActionOutcome> {
        let core = self.spawn_core();
        let result = match core.loader.refresh_one(id).await {
            Ok(_) => core.coordinator.skip(id).await,
            Err(e) => Err(e),
        };
        core.stop().await;
        Ok(result?)
    }

    fn spawn_core(&self) -> Core {
        let (book, book_task) =
            spawn_signal_book(self.config.book_capacity, self.config.filter.clone());
        let loader = SnapshotLoader::new(self.api.clone(), book.clone());
        let coordinator =
            ActionCoordinator::new(self.api.clone(), book.clone(), self.config.confirm_request());
        Core {
            book,
            book_task,
            loader,
            coordinator,
        }
    }
}

/// Book, loader and coordinator.
struct Core {
    book: SignalBookHandle,
    book_task: JoinHandle<()>,
    loader: SnapshotLoader,
    coordinator: ActionCoordinator,
}

impl Core {
    async fn stop(self) {
        self.coordinator.close();
        self.book.shutdown().await;
        if let Err(e) = self.book_task.await {
            warn!(error = %e, "Signal book task ended abnormally");
        }
    }
}

/// Running components started by [`Application::start`].
pub struct Session {
    core: Core,
    connection: Arc<ConnectionManager>,
    connection_task: Option<JoinHandle<WsResult<()>>>,
    /// Authentication failures from background fetches.
    auth_rx: mpsc::Receiver<SyncError>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    pub fn book(&self) -> &SignalBookHandle {
        &self.core.book
    }

    pub fn loader(&self) -> &SnapshotLoader {
        &self.core.loader
    }

    pub fn coordinator(&self) -> &ActionCoordinator {
        &self.core.coordinator
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Wait until the push connection stops or a background fetch is
    /// refused.
    ///
    /// Returns the authentication error if the credential was refused by
    /// either channel. Cancel-safe.
    pub async fn closed(&mut self) -> AppResult<()> {
        let Some(task) = self.connection_task.as_mut() else {
            return Ok(());
        };
        let joined = tokio::select! {
            joined = task => joined,
            Some(e) = self.auth_rx.recv() => return Err(e.into()),
        };
        self.connection_task = None;

        match joined {
            Ok(result) => result.map_err(AppError::from),
            Err(e) => {
                error!(error = %e, "Push connection task failed");
                Ok(())
            }
        }
    }

    /// Stop every component.
    ///
    /// Command results still in flight are ignored.
    pub async fn shutdown(mut self) {
        self.core.coordinator.close();
        self.connection.close();

        if let Some(task) = self.connection_task.take() {
            let abort = task.abort_handle();
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await {
                Ok(Ok(Err(e))) => debug!(error = %e, "Push connection ended with error"),
                Ok(_) => {}
                Err(_) => {
                    warn!("Push connection did not stop in time, aborting");
                    abort.abort();
                }
            }
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.core.stop().await;
    }
}

/// Forward push events into the book.
///
/// An execution report triggers a single-signal refresh so the view picks up
/// the status the server recorded.
async fn pump_push_events(
    mut event_rx: mpsc::Receiver<PushEvent>,
    book: SignalBookHandle,
    loader: SnapshotLoader,
    auth_tx: mpsc::Sender<SyncError>,
) {
    while let Some(event) = event_rx.recv().await {
        let executed = match &event {
            PushEvent::Execution(report) => Some(report.signal_id),
            _ => None,
        };

        if let Err(e) = book.apply_push(event).await {
            warn!(error = %e, "Signal book unavailable, stopping push pump");
            break;
        }

        if let Some(id) = executed {
            let loader = loader.clone();
            let auth_tx = auth_tx.clone();
            tokio::spawn(async move {
                match loader.refresh_one(id).await {
                    Ok(_) => {}
                    Err(e) if e.is_unauthorized() => report_refused(&auth_tx, e),
                    Err(e) => debug!(%id, error = %e, "Refresh after execution report failed"),
                }
            });
        }
    }
    debug!("Push pump stopped");
}

/// Log connection transitions; refetch the snapshot after a reconnect.
async fn watch_connection(
    mut state_rx: watch::Receiver<ConnectionState>,
    loader: SnapshotLoader,
    auth_tx: mpsc::Sender<SyncError>,
) {
    let mut opened_before = false;

    while state_rx.changed().await.is_ok() {
        let state = *state_rx.borrow_and_update();
        match state {
            ConnectionState::Open => {
                info!("Push channel open");
                if opened_before {
                    // Events sent while disconnected were lost.
                    match loader.refresh().await {
                        Ok(_) => {}
                        Err(e) if e.is_unauthorized() => {
                            report_refused(&auth_tx, e);
                            break;
                        }
                        Err(e) => warn!(error = %e, "Snapshot refresh after reconnect failed"),
                    }
                }
                opened_before = true;
            }
            ConnectionState::ClosedPendingRetry => warn!("Push channel lost, reconnecting"),
            ConnectionState::ClosedFinal => {
                info!("Push channel closed");
                break;
            }
            ConnectionState::Idle | ConnectionState::Connecting => {
                debug!(state = %state, "Push channel state");
            }
        }
    }
}

/// Refresh on a fixed period. Stops once the credential is refused.
async fn refresh_periodically(
    loader: SnapshotLoader,
    period: Duration,
    auth_tx: mpsc::Sender<SyncError>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; start() already fetched.
    interval.tick().await;

    loop {
        interval.tick().await;
        match loader.refresh().await {
            Ok(count) => debug!(count, "Periodic refresh"),
            Err(SyncError::EngineStopped) => break,
            Err(e) if e.is_unauthorized() => {
                report_refused(&auth_tx, e);
                break;
            }
            Err(_) => {}
        }
    }
}

/// Hand a refused credential to `Session::closed`.
fn report_refused(auth_tx: &mpsc::Sender<SyncError>, e: SyncError) {
    error!(error = %e, "Credential rejected by the signal server");
    // Full means a refusal is already pending.
    let _ = auth_tx.try_send(e);
}

async fn log_notifications(mut rx: broadcast::Receiver<BookNotification>) {
    loop {
        match rx.recv().await {
            Ok(notification) => {
                for change in &notification.changes {
                    log_change(notification.version, change);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Notification log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn log_change(version: u64, change: &SignalChange) {
    match change {
        SignalChange::Inserted { id, source } => {
            info!(version, %id, ?source, "Signal added");
        }
        SignalChange::Refreshed { id } => {
            debug!(version, %id, "Signal refreshed");
        }
        SignalChange::StatusChanged {
            id,
            from,
            to,
            source,
        } => {
            info!(version, %id, %from, %to, ?source, "Signal status changed");
        }
        SignalChange::ExecutionReported(report) if report.success => {
            info!(version, id = %report.signal_id, "Order executed");
        }
        SignalChange::ExecutionReported(report) => {
            warn!(
                version,
                id = %report.signal_id,
                error = report.error.as_deref().unwrap_or("unknown"),
                "Order execution failed"
            );
        }
    }
}

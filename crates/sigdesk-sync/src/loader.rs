//! Snapshot loader.
//!
//! Fetches the authoritative signal set and hands it to the book as a
//! baseline. The fetch ticket is taken before the request goes out, so a
//! slow response cannot undo transitions that happened while it was in
//! flight. A failed fetch leaves the collection untouched.

use crate::engine::SignalBookHandle;
use crate::error::{SyncError, SyncResult};
use sigdesk_api::DynSignalApi;
use sigdesk_core::{Signal, SignalFilter, SignalId};
use sigdesk_telemetry::Metrics;
use tracing::{debug, info, warn};

/// Fetches snapshots and applies them to the signal book.
#[derive(Clone)]
pub struct SnapshotLoader {
    api: DynSignalApi,
    book: SignalBookHandle,
}

impl SnapshotLoader {
    pub fn new(api: DynSignalApi, book: SignalBookHandle) -> Self {
        Self { api, book }
    }

    /// Fetch signals matching `filter` and apply them as a baseline.
    ///
    /// Returns the number of records received.
    pub async fn fetch(&self, filter: &SignalFilter) -> SyncResult<usize> {
        let ticket = self.book.begin_fetch().await?;

        let signals = match self.api.fetch_signals(filter).await {
            Ok(signals) => signals,
            Err(e) => {
                Metrics::fetch("error");
                warn!(error = %e, "Snapshot fetch failed, keeping current collection");
                return Err(SyncError::FetchFailed(e));
            }
        };

        Metrics::fetch("ok");
        let count = signals.len();
        let changes = self.book.apply_baseline(ticket, signals).await?;
        info!(
            count,
            changes = changes.len(),
            rev = ticket.revision(),
            "Snapshot applied"
        );
        Ok(count)
    }

    /// Re-fetch with the book's active filter.
    pub async fn refresh(&self) -> SyncResult<usize> {
        let filter = self.book.filter();
        self.fetch(&filter).await
    }

    /// Change the view filter, then fetch with it.
    ///
    /// The view switches immediately; a failed fetch leaves the entries as
    /// they were.
    pub async fn set_filter(&self, filter: SignalFilter) -> SyncResult<usize> {
        self.book.set_filter(filter.clone()).await?;
        self.fetch(&filter).await
    }

    /// Fetch one signal and apply it as a one-element baseline.
    pub async fn refresh_one(&self, id: SignalId) -> SyncResult<Signal> {
        let ticket = self.book.begin_fetch().await?;

        let signal = match self.api.fetch_signal(id).await {
            Ok(signal) => signal,
            Err(e) => {
                Metrics::fetch("error");
                warn!(%id, error = %e, "Signal refresh failed");
                return Err(SyncError::FetchFailed(e));
            }
        };

        Metrics::fetch("ok");
        let changes = self.book.apply_baseline(ticket, vec![signal.clone()]).await?;
        debug!(%id, changes = changes.len(), "Signal refreshed");
        Ok(signal)
    }
}

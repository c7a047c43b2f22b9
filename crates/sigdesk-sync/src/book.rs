//! Signal book: the merge core.
//!
//! Holds the ordered, de-duplicated signal collection and merges three
//! kinds of input into it: snapshot baselines, push events and local
//! optimistic transitions.
//!
//! Every status write is stamped with a revision from a monotonic counter.
//! A fetch takes its [`FetchTicket`] revision before the request is issued,
//! so the book can tell whether a baseline is older than the last status
//! write it would overwrite:
//!
//! ```text
//! rev 1  begin_fetch()                 ticket = 1
//! rev 2  push: #7 -> confirmed          status_rev(#7) = 2
//!        baseline(ticket 1): #7 pending  status_rev 2 > 1, status kept
//! ```
//!
//! This type is synchronous and single-owner. The engine actor wraps it.

use serde::Serialize;
use sigdesk_core::{Signal, SignalFilter, SignalId, SignalStatus};
use sigdesk_ws::ExecutionReport;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// Statuses remembered for ids pushed before they were seen.
const EARLY_STATUS_CAPACITY: usize = 1024;

/// Revision taken before a fetch is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchTicket {
    rev: u64,
}

impl FetchTicket {
    pub fn revision(&self) -> u64 {
        self.rev
    }
}

/// Handle for an optimistic transition awaiting its command result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimisticTicket {
    pub id: SignalId,
    /// Status before the optimistic write.
    pub previous: SignalStatus,
    pub applied: SignalStatus,
    rev: u64,
}

/// Why an optimistic transition was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionRejected {
    UnknownSignal(SignalId),
    NotPending { id: SignalId, status: SignalStatus },
    /// Only confirmed and skipped may be requested locally.
    InvalidTarget(SignalStatus),
}

impl fmt::Display for ActionRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSignal(id) => write!(f, "signal {id} is not in the collection"),
            Self::NotPending { id, status } => write!(f, "signal {id} is {status}, not pending"),
            Self::InvalidTarget(status) => write!(f, "status {status} cannot be requested"),
        }
    }
}

/// Origin of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    Baseline,
    Push,
    Optimistic,
    Rollback,
}

/// A single change to the collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum SignalChange {
    Inserted {
        id: SignalId,
        source: ChangeSource,
    },
    /// Non-status fields replaced by a baseline.
    Refreshed { id: SignalId },
    StatusChanged {
        id: SignalId,
        from: SignalStatus,
        to: SignalStatus,
        source: ChangeSource,
    },
    ExecutionReported(ExecutionReport),
}

impl SignalChange {
    pub fn signal_id(&self) -> SignalId {
        match self {
            Self::Inserted { id, .. } | Self::Refreshed { id } | Self::StatusChanged { id, .. } => {
                *id
            }
            Self::ExecutionReported(report) => report.signal_id,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    signal: Signal,
    /// Revision of the last status write.
    status_rev: u64,
    /// Revision of the last field write.
    fields_rev: u64,
    /// Optimistic transitions still awaiting a result.
    in_flight: u32,
}

impl Entry {
    fn new(signal: Signal, rev: u64) -> Self {
        Self {
            signal,
            status_rev: rev,
            fields_rev: rev,
            in_flight: 0,
        }
    }
}

/// Ordered, de-duplicated signal collection.
#[derive(Debug, Default)]
pub struct SignalBook {
    order: VecDeque<SignalId>,
    entries: HashMap<SignalId, Entry>,
    /// Pushed status and its revision, for ids not yet in the collection.
    early_status: HashMap<SignalId, (SignalStatus, u64)>,
    revision: u64,
    filter: SignalFilter,
}

impl SignalBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(filter: SignalFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    fn next_rev(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    /// Current revision.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Take a ticket for a fetch about to be issued.
    pub fn begin_fetch(&mut self) -> FetchTicket {
        FetchTicket {
            rev: self.next_rev(),
        }
    }

    /// Merge a snapshot result.
    ///
    /// New ids are appended in baseline order. Existing entries get their
    /// fields replaced unless a newer fetch already did so. Status is
    /// replaced only when nothing wrote it since the fetch began and no
    /// optimistic transition is in flight.
    pub fn apply_baseline(&mut self, ticket: FetchTicket, signals: Vec<Signal>) -> Vec<SignalChange> {
        let mut changes = Vec::new();
        let mut seen = HashSet::with_capacity(signals.len());

        for signal in signals {
            let id = signal.id;
            if !seen.insert(id) {
                continue;
            }

            let Some(entry) = self.entries.get_mut(&id) else {
                let mut entry = Entry::new(signal, ticket.rev);
                if let Some((status, rev)) = self.early_status.remove(&id) {
                    if rev > ticket.rev {
                        entry.signal.status = status;
                        entry.status_rev = rev;
                    }
                }
                self.order.push_back(id);
                self.entries.insert(id, entry);
                changes.push(SignalChange::Inserted {
                    id,
                    source: ChangeSource::Baseline,
                });
                continue;
            };

            let incoming_status = signal.status;

            if entry.fields_rev < ticket.rev {
                entry.fields_rev = ticket.rev;
                let current_status = entry.signal.status;
                let refreshed = signal.with_status(current_status);
                if refreshed != entry.signal {
                    entry.signal = refreshed;
                    changes.push(SignalChange::Refreshed { id });
                }
            }

            if entry.status_rev < ticket.rev && entry.in_flight == 0 {
                entry.status_rev = ticket.rev;
                let from = entry.signal.status;
                if from != incoming_status {
                    entry.signal.status = incoming_status;
                    changes.push(SignalChange::StatusChanged {
                        id,
                        from,
                        to: incoming_status,
                        source: ChangeSource::Baseline,
                    });
                }
            }
        }

        changes
    }

    /// Push `new_signal`: prepend if unseen, otherwise no-op.
    pub fn apply_push_insert(&mut self, signal: Signal) -> Option<SignalChange> {
        let id = signal.id;
        if self.entries.contains_key(&id) {
            return None;
        }
        let rev = self.next_rev();
        let mut entry = Entry::new(signal, rev);
        // Pushed statuses are never pending, so an early one is newer in
        // the lifecycle than the record's default.
        if let Some((status, _)) = self.early_status.remove(&id) {
            entry.signal.status = status;
        }
        self.order.push_front(id);
        self.entries.insert(id, entry);
        Some(SignalChange::Inserted {
            id,
            source: ChangeSource::Push,
        })
    }

    /// Push `signal_status`: overwrite unconditionally.
    ///
    /// For an absent id the status is remembered and applied when the id is
    /// inserted, unless a baseline started after it supplies its own.
    pub fn apply_push_status(&mut self, id: SignalId, status: SignalStatus) -> Option<SignalChange> {
        let rev = self.next_rev();
        if !self.entries.contains_key(&id) {
            self.remember_early_status(id, status, rev);
            return None;
        }
        let entry = self.entries.get_mut(&id)?;
        entry.status_rev = rev;
        let from = entry.signal.status;
        if from == status {
            return None;
        }
        entry.signal.status = status;
        Some(SignalChange::StatusChanged {
            id,
            from,
            to: status,
            source: ChangeSource::Push,
        })
    }

    /// Apply a local transition ahead of the command result.
    ///
    /// Only `pending` entries may move, and only to a client-requestable
    /// status.
    pub fn apply_optimistic(
        &mut self,
        id: SignalId,
        next: SignalStatus,
    ) -> Result<(OptimisticTicket, SignalChange), ActionRejected> {
        if !next.is_client_requestable() {
            return Err(ActionRejected::InvalidTarget(next));
        }
        let previous = match self.entries.get(&id) {
            None => return Err(ActionRejected::UnknownSignal(id)),
            Some(entry) if !entry.signal.status.can_transition_to(next) => {
                return Err(ActionRejected::NotPending {
                    id,
                    status: entry.signal.status,
                })
            }
            Some(entry) => entry.signal.status,
        };

        let rev = self.next_rev();
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(ActionRejected::UnknownSignal(id))?;
        entry.signal.status = next;
        entry.status_rev = rev;
        entry.in_flight += 1;

        let ticket = OptimisticTicket {
            id,
            previous,
            applied: next,
            rev,
        };
        let change = SignalChange::StatusChanged {
            id,
            from: previous,
            to: next,
            source: ChangeSource::Optimistic,
        };
        Ok((ticket, change))
    }

    /// Undo an optimistic transition after its command failed.
    ///
    /// Restores the exact prior status, unless another status write
    /// happened since, in which case the newer value stands.
    pub fn rollback(&mut self, ticket: OptimisticTicket) -> Option<SignalChange> {
        let rev = self.next_rev();
        let entry = self.entries.get_mut(&ticket.id)?;
        entry.in_flight = entry.in_flight.saturating_sub(1);

        if entry.status_rev != ticket.rev {
            return None;
        }
        entry.status_rev = rev;
        let from = entry.signal.status;
        entry.signal.status = ticket.previous;
        Some(SignalChange::StatusChanged {
            id: ticket.id,
            from,
            to: ticket.previous,
            source: ChangeSource::Rollback,
        })
    }

    /// Release an optimistic transition after its command succeeded.
    pub fn settle(&mut self, ticket: OptimisticTicket) {
        if let Some(entry) = self.entries.get_mut(&ticket.id) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
        }
    }

    fn remember_early_status(&mut self, id: SignalId, status: SignalStatus, rev: u64) {
        if self.early_status.len() >= EARLY_STATUS_CAPACITY && !self.early_status.contains_key(&id) {
            let oldest = self
                .early_status
                .iter()
                .min_by_key(|(_, (_, rev))| *rev)
                .map(|(id, _)| *id);
            if let Some(oldest) = oldest {
                self.early_status.remove(&oldest);
            }
        }
        self.early_status.insert(id, (status, rev));
    }

    pub fn filter(&self) -> &SignalFilter {
        &self.filter
    }

    /// Replace the view filter. Entries are kept; only the projection changes.
    pub fn set_filter(&mut self, filter: SignalFilter) {
        self.filter = filter;
    }

    /// Entries matching the active filter, in collection order.
    pub fn visible(&self) -> Vec<Signal> {
        self.iter().filter(|s| self.filter.matches(s)).cloned().collect()
    }

    /// All entries in collection order.
    pub fn iter(&self) -> impl Iterator<Item = &Signal> + '_ {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).map(|e| &e.signal))
    }

    pub fn get(&self, id: SignalId) -> Option<&Signal> {
        self.entries.get(&id).map(|e| &e.signal)
    }

    pub fn contains(&self, id: SignalId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Whether an optimistic transition on `id` awaits its result.
    pub fn is_in_flight(&self, id: SignalId) -> bool {
        self.entries.get(&id).is_some_and(|e| e.in_flight > 0)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

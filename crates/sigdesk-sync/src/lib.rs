//! Signal synchronization for the signal desk.
//!
//! Merges snapshot fetches, push events and optimistic local actions into
//! one ordered, de-duplicated signal collection.
//!
//! # Key Components
//!
//! - [`SignalBook`]: the merge algorithm (pure, synchronous)
//! - [`SignalBookHandle`]: handle to the actor that owns the book
//! - [`SnapshotLoader`]: authoritative fetches applied as baselines
//! - [`ActionCoordinator`]: confirm/skip with optimistic apply and rollback

pub mod book;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod loader;

pub use book::{
    ActionRejected, ChangeSource, FetchTicket, OptimisticTicket, SignalBook, SignalChange,
};
pub use coordinator::{ActionAck, ActionCoordinator, ActionKind, ActionOutcome};
pub use engine::{spawn_signal_book, BookMsg, BookNotification, SignalBookHandle, SignalBookTask};
pub use error::{SyncError, SyncResult};
pub use loader::SnapshotLoader;

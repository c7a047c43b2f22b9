//! Remote command interface for the signal desk.
//!
//! [`SignalApi`] is the seam between the synchronization core and the
//! signal server. [`RestSignalApi`] talks to the real server over HTTP;
//! [`MockSignalApi`] is an in-process double for tests.

pub mod api;
pub mod client;
pub mod error;
pub mod mock;

pub use api::{BoxFuture, ConfirmAck, ConfirmRequest, DynSignalApi, SignalApi, SkipAck};
pub use client::{RestSignalApi, TradingMode};
pub use error::{ApiError, ApiResult};
pub use mock::{MockCall, MockFailure, MockSignalApi};

//! Moves outbox entries to the remote store and merges remote changes back.
//!
//! - [`Pusher`] drains the local outbox in insertion order.
//! - [`Puller`] fetches everything changed since the stored watermark.
//! - [`SyncEngine`] runs both, once or on a background task.
//!
//! All three are generic over the storage traits in [`numbly_core::store`],
//! so the same code drives a SQLite remote in tests and an HTTP remote in the
//! CLI.

pub mod engine;
pub mod error;
pub mod pull;
pub mod push;

pub use engine::{SyncEngine, SyncHandle, SyncReport};
pub use error::{Error, Result};
pub use pull::{PullReport, Puller};
pub use push::{PushFailure, PushReport, Pusher};

#[cfg(test)]
mod testing;

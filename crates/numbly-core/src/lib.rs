//! Core types and trait definitions for Numbly's offline-first sync layer.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! The local store, remote store, sync engine and HTTP surface all depend on
//! it; it depends on nothing of theirs.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod entity;
pub mod error;
pub mod flags;
pub mod mutation;
pub mod pull;
pub mod push;
pub mod store;

pub use error::{Error, Result};

use chrono::{DateTime, SubsecRound as _, Utc};

/// The watermark used when a client has never synced: a full resync.
pub fn epoch() -> DateTime<Utc> { DateTime::<Utc>::UNIX_EPOCH }

/// The current time at the microsecond precision both stores persist.
pub fn now() -> DateTime<Utc> { Utc::now().trunc_subsecs(6) }

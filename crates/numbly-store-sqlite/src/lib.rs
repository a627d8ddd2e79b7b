//! SQLite backends for both ends of Numbly's sync link.
//!
//! - [`SqliteLocalStore`] is the device-local DAO with its outbox and flags.
//! - [`SqliteRemoteStore`] is the server's multi-device source of truth.
//!
//! Both wrap [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime.

mod encode;
mod local;
mod remote;
mod rows;
mod schema;

pub mod error;

pub use encode::content_hash;
pub use error::{Error, Result};
pub use local::SqliteLocalStore;
pub use remote::{ChangeClock, SqliteRemoteStore, SyncState};

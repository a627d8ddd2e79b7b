//! Test doubles wrapping the SQLite stores.

use std::sync::{
  Arc,
  atomic::{AtomicBool, AtomicUsize, Ordering},
};

use numbly_core::{
  mutation::{Applied, Mutation, OutboxEntry},
  pull::{PullBundle, PullRequest},
  store::{Outbox, RemoteStore},
};
use numbly_store_sqlite::{SqliteLocalStore, SqliteRemoteStore};
use uuid::Uuid;

pub async fn stores() -> (Arc<SqliteLocalStore>, Arc<SqliteRemoteStore>) {
  let local = SqliteLocalStore::open_in_memory()
    .await
    .expect("in-memory local store");
  let remote = SqliteRemoteStore::open_in_memory()
    .await
    .expect("in-memory remote store");
  (Arc::new(local), Arc::new(remote))
}

#[derive(Debug, thiserror::Error)]
pub enum DoubleError {
  #[error("remote unreachable")]
  Unreachable,

  #[error("outbox unavailable")]
  OutboxUnavailable,

  #[error(transparent)]
  Store(#[from] numbly_store_sqlite::Error),
}

// ─── Remote ──────────────────────────────────────────────────────────────────

/// A remote that counts calls and goes down once its budget is spent.
pub struct FlakyRemote {
  inner:  Arc<SqliteRemoteStore>,
  budget: AtomicUsize,
  calls:  AtomicUsize,
  down:   AtomicBool,
}

impl FlakyRemote {
  pub fn new(inner: Arc<SqliteRemoteStore>) -> Self {
    Self {
      inner,
      budget: AtomicUsize::new(usize::MAX),
      calls: AtomicUsize::new(0),
      down: AtomicBool::new(false),
    }
  }

  /// Accept `n` more applies, then fail every call.
  pub fn allow(&self, n: usize) { self.budget.store(n, Ordering::SeqCst); }

  /// Fail every call, pulls included.
  pub fn take_down(&self) { self.down.store(true, Ordering::SeqCst); }

  pub fn heal(&self) {
    self.budget.store(usize::MAX, Ordering::SeqCst);
    self.down.store(false, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

impl RemoteStore for FlakyRemote {
  type Error = DoubleError;

  async fn apply(&self, guest_id: Uuid, mutation: Mutation) -> Result<Applied, DoubleError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if self.down.load(Ordering::SeqCst) {
      return Err(DoubleError::Unreachable);
    }
    self
      .budget
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |b| b.checked_sub(1))
      .map_err(|_| DoubleError::Unreachable)?;
    Ok(self.inner.apply(guest_id, mutation).await?)
  }

  async fn pull(&self, request: PullRequest) -> Result<PullBundle, DoubleError> {
    if self.down.load(Ordering::SeqCst) {
      return Err(DoubleError::Unreachable);
    }
    Ok(self.inner.pull(request).await?)
  }
}

// ─── Outbox ──────────────────────────────────────────────────────────────────

/// An outbox whose acks can be made to fail after the remote has applied.
pub struct FlakyOutbox {
  inner:         Arc<SqliteLocalStore>,
  pub fail_acks: AtomicBool,
}

impl FlakyOutbox {
  pub fn new(inner: Arc<SqliteLocalStore>) -> Self {
    Self {
      inner,
      fail_acks: AtomicBool::new(false),
    }
  }
}

impl Outbox for FlakyOutbox {
  type Error = DoubleError;

  async fn pending(&self, limit: Option<usize>) -> Result<Vec<OutboxEntry>, DoubleError> {
    Ok(self.inner.pending(limit).await?)
  }

  async fn ack(&self, seq: i64) -> Result<(), DoubleError> {
    if self.fail_acks.load(Ordering::SeqCst) {
      return Err(DoubleError::OutboxUnavailable);
    }
    Ok(self.inner.ack(seq).await?)
  }

  async fn record_failure(&self, seq: i64, error: String) -> Result<(), DoubleError> {
    Ok(self.inner.record_failure(seq, error).await?)
  }

  async fn outbox_len(&self) -> Result<usize, DoubleError> {
    Ok(self.inner.outbox_len().await?)
  }
}

//! [`Pusher`]: delivers outbox entries to the remote store.

use std::sync::Arc;

use numbly_core::{
  mutation::Applied,
  store::{Outbox, RemoteStore},
};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::{Error, Result};

/// The entry a drain stopped at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushFailure {
  pub seq:   i64,
  pub error: String,
}

/// Outcome of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
  /// Entries the remote wrote.
  pub delivered: usize,
  /// Entries the remote acknowledged as older than its copy.
  pub stale:     usize,
  /// Set when delivery failed; later entries were left untouched.
  pub failed:    Option<PushFailure>,
  /// Entries still queued after the drain.
  pub remaining: usize,
}

impl PushReport {
  pub fn acked(&self) -> usize { self.delivered + self.stale }
}

/// Drains an [`Outbox`] into a [`RemoteStore`].
///
/// Entries are delivered strictly in `seq` order and removed only after the
/// remote accepts them. A failed delivery stops the drain so that no entry
/// overtakes an earlier one; the failed entry is retried on the next drain.
/// Only one drain runs at a time per `Pusher`.
pub struct Pusher<O, R> {
  outbox: Arc<O>,
  remote: Arc<R>,
  batch:  Option<usize>,
  drain:  Mutex<()>,
}

impl<O, R> Pusher<O, R>
where
  O: Outbox,
  R: RemoteStore,
{
  pub fn new(outbox: Arc<O>, remote: Arc<R>) -> Self {
    Self {
      outbox,
      remote,
      batch: None,
      drain: Mutex::new(()),
    }
  }

  /// Deliver at most `limit` entries per drain.
  pub fn with_batch_limit(mut self, limit: usize) -> Self {
    self.batch = Some(limit);
    self
  }

  /// Deliver pending entries until the outbox is empty or one fails.
  ///
  /// Returns `Err` only when the local outbox itself cannot be read or
  /// updated.
  pub async fn drain(&self) -> Result<PushReport> {
    let _guard = self.drain.lock().await;

    let entries = self.outbox.pending(self.batch).await.map_err(Error::local)?;
    let mut report = PushReport::default();

    for entry in entries {
      let delivery = match entry.mutation() {
        Ok(mutation) => self
          .remote
          .apply(mutation.guest_id(), mutation)
          .await
          .map_err(|e| e.to_string()),
        Err(e) => Err(format!("undecodable payload: {e}")),
      };

      match delivery {
        Ok(applied) => {
          self.outbox.ack(entry.seq).await.map_err(Error::local)?;
          match applied {
            Applied::Written => report.delivered += 1,
            Applied::Stale => report.stale += 1,
          }
          tracing::debug!(
            seq = entry.seq,
            table = entry.table.as_str(),
            entity_id = %entry.entity_id,
            ?applied,
            "delivered outbox entry"
          );
        }
        Err(error) => {
          tracing::warn!(
            seq = entry.seq,
            table = entry.table.as_str(),
            entity_id = %entry.entity_id,
            attempts = entry.attempts + 1,
            %error,
            "outbox delivery failed"
          );
          self
            .outbox
            .record_failure(entry.seq, error.clone())
            .await
            .map_err(Error::local)?;
          report.failed = Some(PushFailure {
            seq: entry.seq,
            error,
          });
          break;
        }
      }
    }

    report.remaining = self.outbox.outbox_len().await.map_err(Error::local)?;
    if report.acked() > 0 || report.failed.is_some() {
      tracing::info!(
        delivered = report.delivered,
        stale = report.stale,
        remaining = report.remaining,
        failed = report.failed.is_some(),
        "drained outbox"
      );
    }
    Ok(report)
  }
}

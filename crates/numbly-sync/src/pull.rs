//! [`Puller`]: merges remote changes into the local store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use numbly_core::{
  pull::{MergeReport, PullRequest},
  store::{LocalStore, RemoteStore},
};
use serde::Serialize;

use crate::{Error, Result};

/// Outcome of one pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PullReport {
  /// Rows and tombstones the remote returned.
  pub received:       usize,
  pub merge:          MergeReport,
  /// The watermark stored for the next pull.
  pub sync_timestamp: DateTime<Utc>,
}

pub struct Puller<L, R> {
  local:  Arc<L>,
  remote: Arc<R>,
}

impl<L, R> Puller<L, R>
where
  L: LocalStore,
  R: RemoteStore,
{
  pub fn new(local: Arc<L>, remote: Arc<R>) -> Self { Self { local, remote } }

  /// Pull everything changed since the stored watermark and merge it.
  ///
  /// The watermark only advances after the merge commits, so an interrupted
  /// pull is repeated in full next time.
  pub async fn pull(&self) -> Result<PullReport> {
    let guest_id = self.local.guest_id().await.map_err(Error::local)?;
    let last_sync = self.local.last_sync(guest_id).await.map_err(Error::local)?;

    let bundle = self
      .remote
      .pull(PullRequest {
        guest_id,
        last_sync,
      })
      .await
      .map_err(Error::remote)?;

    let received = bundle.len();
    let sync_timestamp = bundle.sync_timestamp;
    let merge = self
      .local
      .apply_pulled(bundle)
      .await
      .map_err(Error::local)?;
    self
      .local
      .set_last_sync(guest_id, sync_timestamp)
      .await
      .map_err(Error::local)?;

    if received > 0 {
      tracing::info!(
        %guest_id,
        received,
        applied = merge.applied,
        stale = merge.stale,
        deleted = merge.deleted,
        "pulled remote changes"
      );
    }
    Ok(PullReport {
      received,
      merge,
      sync_timestamp,
    })
  }
}

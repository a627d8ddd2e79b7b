//! [`SyncEngine`]: push then pull, on demand or in the background.

use std::{sync::Arc, time::Duration};

use numbly_core::store::{LocalStore, Outbox, RemoteStore};
use serde::Serialize;
use tokio::{
  sync::{Notify, watch},
  task::JoinHandle,
  time::MissedTickBehavior,
};

use crate::{PullReport, Puller, PushReport, Pusher, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
  pub push: PushReport,
  pub pull: PullReport,
}

/// Drives a [`Pusher`] and a [`Puller`] over one local/remote pair.
pub struct SyncEngine<L, R> {
  pusher: Pusher<L, R>,
  puller: Puller<L, R>,
}

impl<L, R> SyncEngine<L, R>
where
  L: LocalStore + Outbox,
  R: RemoteStore,
{
  pub fn new(local: Arc<L>, remote: Arc<R>) -> Self {
    Self {
      pusher: Pusher::new(Arc::clone(&local), Arc::clone(&remote)),
      puller: Puller::new(local, remote),
    }
  }

  pub fn pusher(&self) -> &Pusher<L, R> { &self.pusher }

  pub fn puller(&self) -> &Puller<L, R> { &self.puller }

  /// Drain the outbox, then pull.
  ///
  /// Local edits go out first so the pull cannot hand back an older remote
  /// copy of something still queued; last-writer-wins covers the rest.
  pub async fn sync_once(&self) -> Result<SyncReport> {
    let push = self.pusher.drain().await?;
    let pull = self.puller.pull().await?;
    Ok(SyncReport { push, pull })
  }
}

impl<L, R> SyncEngine<L, R>
where
  L: LocalStore + Outbox + 'static,
  R: RemoteStore + 'static,
{
  /// Run [`Self::sync_once`] every `interval` and whenever
  /// [`SyncHandle::trigger`] is called, until the handle is shut down or
  /// dropped. Failures are logged and retried on the next run.
  pub fn spawn(self: Arc<Self>, interval: Duration) -> SyncHandle {
    let trigger = Arc::new(Notify::new());
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let notified = Arc::clone(&trigger);
    let task = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      tracing::info!(interval_secs = interval.as_secs_f64(), "sync engine started");

      loop {
        tokio::select! {
          biased;
          _ = stop_rx.changed() => break,
          _ = ticker.tick() => {}
          () = notified.notified() => {}
        }

        match self.sync_once().await {
          Ok(report) => tracing::debug!(
            delivered = report.push.delivered,
            remaining = report.push.remaining,
            received = report.pull.received,
            "sync run finished"
          ),
          Err(e) => tracing::warn!(error = %e, "sync run failed"),
        }
      }

      tracing::info!("sync engine stopped");
    });

    SyncHandle {
      trigger,
      stop: stop_tx,
      task,
    }
  }
}

/// Controls a background sync task started by [`SyncEngine::spawn`].
///
/// Dropping the handle stops the task after its current run.
pub struct SyncHandle {
  trigger: Arc<Notify>,
  stop:    watch::Sender<bool>,
  task:    JoinHandle<()>,
}

impl SyncHandle {
  /// Request a run now, typically right after a local write. Triggers that
  /// arrive during a run coalesce into one follow-up run.
  pub fn trigger(&self) { self.trigger.notify_one(); }

  /// Stop the task and wait for its current run to finish.
  pub async fn shutdown(self) {
    let _ = self.stop.send(true);
    if let Err(e) = self.task.await {
      tracing::warn!(error = %e, "sync task ended abnormally");
    }
  }
}

#[cfg(test)]
mod tests {
  use numbly_core::{
    entity::{Clause, Document},
    mutation::{Mutation, Record},
    pull::PullRequest,
  };
  use numbly_store_sqlite::{SqliteLocalStore, SqliteRemoteStore};

  use super::*;
  use crate::testing::{FlakyRemote, stores};

  #[tokio::test]
  async fn create_push_pull_edit_scenario() {
    let (local, remote) = stores().await;
    let engine = SyncEngine::new(local.clone(), remote.clone());
    let g1 = local.guest_id().await.unwrap();

    // Create d1 locally: exactly one queued entry.
    let d1 = local.upsert_document(Document::new(g1, "Draft")).await.unwrap();
    assert_eq!(local.outbox_len().await.unwrap(), 1);

    // Push: outbox drains, remote holds d1.
    let push = engine.pusher().drain().await.unwrap();
    assert_eq!(push.delivered, 1);
    assert_eq!(local.outbox_len().await.unwrap(), 0);
    let full = remote
      .pull(PullRequest {
        guest_id:  g1,
        last_sync: None,
      })
      .await
      .unwrap();
    assert_eq!(full.documents, vec![d1.clone()]);

    // Pull with last_sync = now: nothing.
    let watermark = full.sync_timestamp;
    let empty = remote
      .pull(PullRequest {
        guest_id:  g1,
        last_sync: Some(watermark),
      })
      .await
      .unwrap();
    assert!(empty.is_empty());

    // Edit the title and push again.
    let mut edited = d1.clone();
    edited.title = "Signed lease".into();
    let edited = local.upsert_document(edited).await.unwrap();
    engine.pusher().drain().await.unwrap();

    // Pull with the previous watermark returns the updated d1.
    let delta = remote
      .pull(PullRequest {
        guest_id:  g1,
        last_sync: Some(watermark),
      })
      .await
      .unwrap();
    assert_eq!(delta.documents, vec![edited]);
    assert!(delta.clauses.is_empty());
  }

  #[tokio::test]
  async fn two_devices_converge() {
    let remote = Arc::new(SqliteRemoteStore::open_in_memory().await.unwrap());
    let phone = Arc::new(SqliteLocalStore::open_in_memory().await.unwrap());
    let guest = phone.guest_id().await.unwrap();

    let laptop = Arc::new(SqliteLocalStore::open_in_memory().await.unwrap());

    let phone_sync = SyncEngine::new(phone.clone(), remote.clone());
    let laptop_sync = SyncEngine::new(laptop.clone(), remote.clone());

    let doc = phone.upsert_document(Document::new(guest, "Lease")).await.unwrap();
    let clause = phone
      .upsert_clause(Clause::new(doc.document_id, guest, 0, "Rent", "1000"))
      .await
      .unwrap();
    phone_sync.sync_once().await.unwrap();

    // The laptop has its own guest id, so seed it by hand.
    let bundle = remote
      .pull(PullRequest {
        guest_id:  guest,
        last_sync: None,
      })
      .await
      .unwrap();
    laptop.apply_pulled(bundle).await.unwrap();
    assert_eq!(laptop.list_clauses(doc.document_id).await.unwrap(), vec![clause.clone()]);

    let mut revised = clause.clone();
    revised.body = "1100".into();
    let revised = laptop.upsert_clause(revised).await.unwrap();
    laptop_sync.pusher().drain().await.unwrap();

    let report = phone_sync.sync_once().await.unwrap();
    assert_eq!(report.pull.merge.applied, 1);
    assert_eq!(phone.list_clauses(doc.document_id).await.unwrap(), vec![revised]);
  }

  #[tokio::test]
  async fn sync_once_reports_remote_failure() {
    let (local, remote) = stores().await;
    let guest = local.guest_id().await.unwrap();
    local.upsert_document(Document::new(guest, "Offline")).await.unwrap();

    let flaky = Arc::new(FlakyRemote::new(remote));
    flaky.take_down();
    let engine = SyncEngine::new(local.clone(), flaky.clone());

    assert!(engine.sync_once().await.is_err());
    assert_eq!(local.outbox_len().await.unwrap(), 1);

    flaky.heal();
    let report = engine.sync_once().await.unwrap();
    assert_eq!(report.push.delivered, 1);
    assert_eq!(report.push.remaining, 0);
  }

  #[tokio::test]
  async fn background_task_syncs_on_trigger_and_stops() {
    let (local, remote) = stores().await;
    let guest = local.guest_id().await.unwrap();
    let engine = Arc::new(SyncEngine::new(local.clone(), remote.clone()));

    // Long interval: only the first tick and explicit triggers run.
    let handle = engine.spawn(Duration::from_secs(3600));

    local.upsert_document(Document::new(guest, "Queued")).await.unwrap();
    handle.trigger();

    let mut drained = false;
    for _ in 0..100 {
      if local.outbox_len().await.unwrap() == 0 {
        drained = true;
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(drained, "background sync never drained the outbox");

    handle.shutdown().await;

    local.upsert_document(Document::new(guest, "After stop")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(local.outbox_len().await.unwrap(), 1);

    let remote_docs = remote
      .pull(PullRequest {
        guest_id:  guest,
        last_sync: None,
      })
      .await
      .unwrap()
      .documents;
    assert_eq!(remote_docs.len(), 1);
  }

  #[tokio::test]
  async fn remote_delete_reaches_other_device() {
    let (local, remote) = stores().await;
    let guest = local.guest_id().await.unwrap();
    let engine = SyncEngine::new(local.clone(), remote.clone());

    let doc = local.upsert_document(Document::new(guest, "Gone soon")).await.unwrap();
    engine.sync_once().await.unwrap();

    remote
      .apply(guest, Mutation::Delete {
        table:      numbly_core::mutation::SyncTable::Documents,
        entity_id:  doc.document_id,
        guest_id:   guest,
        deleted_at: numbly_core::now(),
      })
      .await
      .unwrap();

    let report = engine.sync_once().await.unwrap();
    assert_eq!(report.pull.merge.deleted, 1);
    assert!(local.get_document(doc.document_id).await.unwrap().is_none());

    // Re-sending an old upsert cannot resurrect it.
    let applied = remote
      .apply(guest, Mutation::Upsert {
        record: Record::Documents(doc),
      })
      .await
      .unwrap();
    assert_eq!(applied, numbly_core::mutation::Applied::Stale);
  }

  #[tokio::test]
  async fn edit_of_row_from_faster_clock_reaches_remote() {
    let (local, remote) = stores().await;
    let guest = local.guest_id().await.unwrap();
    let engine = SyncEngine::new(local.clone(), remote.clone());

    let mut theirs = Document::new(guest, "Theirs");
    theirs.updated_at += chrono::Duration::hours(1);
    remote
      .apply(guest, Mutation::Upsert {
        record: Record::Documents(theirs.clone()),
      })
      .await
      .unwrap();
    engine.sync_once().await.unwrap();

    let mut mine = local.get_document(theirs.document_id).await.unwrap().unwrap();
    mine.title = "Mine".into();
    local.upsert_document(mine).await.unwrap();

    let report = engine.sync_once().await.unwrap();
    assert_eq!(report.push.delivered, 1);
    assert_eq!(report.push.stale, 0);
    assert_eq!(local.outbox_len().await.unwrap(), 0);

    let on_remote = remote
      .pull(PullRequest {
        guest_id:  guest,
        last_sync: None,
      })
      .await
      .unwrap()
      .documents;
    let on_device = local.get_document(theirs.document_id).await.unwrap();
    assert_eq!(on_remote.len(), 1);
    assert_eq!(on_remote[0].title, "Mine");
    assert_eq!(on_device.as_ref(), on_remote.first());
  }
}

//! Subcommands and their execution against a local store and a remote.

use std::{io::Write, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use clap::Subcommand;
use numbly_core::{
  entity::Document,
  flags::AI_EDIT,
  store::{LocalStore, Outbox, RemoteStore},
};
use numbly_store_sqlite::SqliteLocalStore;
use numbly_sync::{PullReport, PushReport, SyncEngine};
use uuid::Uuid;

// ─── Commands ─────────────────────────────────────────────────────────────────

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Create, edit, delete and list documents.
  #[command(subcommand)]
  Doc(DocCommand),

  /// Deliver queued changes to the server.
  Push,

  /// Fetch changes made elsewhere.
  Pull,

  /// Push, then pull.
  Sync,

  /// Keep syncing in the background until interrupted.
  Watch {
    #[arg(long, default_value_t = 30)]
    interval_secs: u64,
  },

  /// Show the guest id, watermark and queued changes.
  Status,

  /// Check or consume AI access.
  #[command(subcommand)]
  Ai(AiCommand),
}

#[derive(Subcommand, Debug)]
pub enum DocCommand {
  /// Create a document.
  Add { title: String },
  /// Rename a document.
  Title { id: Uuid, title: String },
  /// Delete a document and its clauses.
  Rm { id: Uuid },
  /// List this guest's documents, newest first.
  Ls,
}

#[derive(Subcommand, Debug)]
pub enum AiCommand {
  /// Report whether an AI feature may be used.
  Check {
    #[arg(long, default_value = AI_EDIT)]
    feature: String,
  },
  /// Use an AI feature, consuming the free use if it is not unlocked.
  Use {
    #[arg(long, default_value = AI_EDIT)]
    feature: String,
  },
  /// Record that a feature was unlocked.
  Unlock { feature: String },
}

// ─── App ──────────────────────────────────────────────────────────────────────

pub struct App<R> {
  local:  Arc<SqliteLocalStore>,
  engine: Arc<SyncEngine<SqliteLocalStore, R>>,
}

impl<R> App<R>
where
  R: RemoteStore + 'static,
{
  pub fn new(local: Arc<SqliteLocalStore>, remote: Arc<R>) -> Self {
    let engine = Arc::new(SyncEngine::new(Arc::clone(&local), remote));
    Self { local, engine }
  }

  pub async fn run(&self, command: Command, out: &mut impl Write) -> Result<()> {
    match command {
      Command::Doc(cmd) => self.doc(cmd, out).await,
      Command::Push => {
        let report = self.engine.pusher().drain().await?;
        write_push(out, &report)
      }
      Command::Pull => {
        let report = self.engine.puller().pull().await?;
        write_pull(out, &report)
      }
      Command::Sync => {
        let report = self.engine.sync_once().await?;
        write_push(out, &report.push)?;
        write_pull(out, &report.pull)
      }
      Command::Watch { interval_secs } => self.watch(interval_secs, out).await,
      Command::Status => self.status(out).await,
      Command::Ai(cmd) => self.ai(cmd, out).await,
    }
  }

  async fn doc(&self, cmd: DocCommand, out: &mut impl Write) -> Result<()> {
    let guest = self.local.guest_id().await?;
    match cmd {
      DocCommand::Add { title } => {
        let doc = self.local.upsert_document(Document::new(guest, title)).await?;
        writeln!(out, "{}", doc.document_id)?;
      }
      DocCommand::Title { id, title } => {
        let mut doc = self
          .local
          .get_document(id)
          .await?
          .ok_or_else(|| anyhow!("document {id} not found"))?;
        doc.title = title;
        self.local.upsert_document(doc).await?;
      }
      DocCommand::Rm { id } => {
        self
          .local
          .delete_document(id)
          .await
          .with_context(|| format!("deleting document {id}"))?;
      }
      DocCommand::Ls => {
        for doc in self.local.list_documents(guest).await? {
          writeln!(
            out,
            "{}  {:<8}  {}  {}",
            doc.document_id,
            doc.status.as_str(),
            doc.updated_at.format("%Y-%m-%d %H:%M"),
            doc.title
          )?;
        }
      }
    }
    Ok(())
  }

  async fn watch(&self, interval_secs: u64, out: &mut impl Write) -> Result<()> {
    if interval_secs == 0 {
      bail!("--interval-secs must be at least 1");
    }
    let handle = Arc::clone(&self.engine).spawn(Duration::from_secs(interval_secs));
    writeln!(out, "syncing every {interval_secs}s; press Ctrl-C to stop")?;
    out.flush()?;

    tokio::signal::ctrl_c()
      .await
      .context("waiting for Ctrl-C")?;
    handle.shutdown().await;
    Ok(())
  }

  async fn status(&self, out: &mut impl Write) -> Result<()> {
    let guest = self.local.guest_id().await?;
    let last_sync = self.local.last_sync(guest).await?;
    let pending = self.local.pending(None).await?;

    writeln!(out, "guest:     {guest}")?;
    match last_sync {
      Some(at) => writeln!(out, "last sync: {}", at.to_rfc3339())?,
      None => writeln!(out, "last sync: never")?,
    }
    writeln!(out, "queued:    {}", pending.len())?;
    for entry in pending {
      write!(
        out,
        "  #{:<5} {:<6} {:<18} {}",
        entry.seq,
        entry.operation.as_str(),
        entry.table.as_str(),
        entry.entity_id
      )?;
      if let Some(error) = &entry.last_error {
        write!(out, "  ({} attempts, last error: {error})", entry.attempts)?;
      }
      writeln!(out)?;
    }
    Ok(())
  }

  async fn ai(&self, cmd: AiCommand, out: &mut impl Write) -> Result<()> {
    let guest = self.local.guest_id().await?;
    match cmd {
      AiCommand::Check { feature } => {
        let allowed = self.local.can_use_ai(guest, &feature).await?;
        writeln!(out, "{feature}: {}", if allowed { "allowed" } else { "locked" })?;
      }
      AiCommand::Use { feature } => {
        let flags = self.local.flags(guest).await?;
        if !flags.can_use_ai(&feature) {
          bail!("{feature} is locked: the free AI use has been spent");
        }
        if flags.is_unlocked(&feature) {
          writeln!(out, "{feature}: unlocked")?;
        } else {
          self.local.mark_free_ai_used(guest).await?;
          writeln!(out, "{feature}: free use consumed")?;
        }
      }
      AiCommand::Unlock { feature } => {
        let flags = self.local.unlock_feature(guest, &feature).await?;
        writeln!(out, "unlocked: {}", flags.features_unlocked.join(", "))?;
      }
    }
    Ok(())
  }
}

fn write_push(out: &mut impl Write, report: &PushReport) -> Result<()> {
  writeln!(
    out,
    "pushed {} ({} stale), {} queued",
    report.delivered, report.stale, report.remaining
  )?;
  if let Some(failure) = &report.failed {
    writeln!(out, "stopped at #{}: {}", failure.seq, failure.error)?;
  }
  Ok(())
}

fn write_pull(out: &mut impl Write, report: &PullReport) -> Result<()> {
  writeln!(
    out,
    "pulled {} ({} applied, {} stale, {} deleted) as of {}",
    report.received,
    report.merge.applied,
    report.merge.stale,
    report.merge.deleted,
    report.sync_timestamp.to_rfc3339()
  )?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use numbly_store_sqlite::SqliteRemoteStore;

  use super::*;

  async fn app() -> App<SqliteRemoteStore> {
    let local = Arc::new(SqliteLocalStore::open_in_memory().await.unwrap());
    let remote = Arc::new(SqliteRemoteStore::open_in_memory().await.unwrap());
    App::new(local, remote)
  }

  async fn run(app: &App<SqliteRemoteStore>, command: Command) -> Result<String> {
    let mut out = Vec::new();
    app.run(command, &mut out).await?;
    Ok(String::from_utf8(out).unwrap())
  }

  #[tokio::test]
  async fn doc_lifecycle_queues_changes() {
    let app = app().await;
    let id: Uuid = run(&app, Command::Doc(DocCommand::Add {
      title: "Lease".into(),
    }))
    .await
    .unwrap()
    .trim()
    .parse()
    .unwrap();

    run(&app, Command::Doc(DocCommand::Title {
      id,
      title: "Lease v2".into(),
    }))
    .await
    .unwrap();
    let listing = run(&app, Command::Doc(DocCommand::Ls)).await.unwrap();
    assert!(listing.contains("Lease v2"), "{listing}");
    assert!(listing.contains("draft"), "{listing}");

    let status = run(&app, Command::Status).await.unwrap();
    assert!(status.contains("queued:    2"), "{status}");
    assert!(status.contains("last sync: never"), "{status}");

    run(&app, Command::Doc(DocCommand::Rm { id })).await.unwrap();
    assert!(run(&app, Command::Doc(DocCommand::Rm { id })).await.is_err());
    let missing = run(&app, Command::Doc(DocCommand::Title {
      id,
      title: "x".into(),
    }))
    .await;
    assert!(missing.is_err());
  }

  #[tokio::test]
  async fn sync_empties_the_queue() {
    let app = app().await;
    run(&app, Command::Doc(DocCommand::Add {
      title: "Lease".into(),
    }))
    .await
    .unwrap();

    let out = run(&app, Command::Sync).await.unwrap();
    assert!(out.contains("pushed 1 (0 stale), 0 queued"), "{out}");
    assert!(out.contains("pulled 1"), "{out}");

    let status = run(&app, Command::Status).await.unwrap();
    assert!(status.contains("queued:    0"), "{status}");
    assert!(!status.contains("never"), "{status}");
  }

  #[tokio::test]
  async fn ai_gate_allows_one_free_use() {
    let app = app().await;
    let check = || {
      Command::Ai(AiCommand::Check {
        feature: AI_EDIT.into(),
      })
    };
    let use_ai = || {
      Command::Ai(AiCommand::Use {
        feature: AI_EDIT.into(),
      })
    };

    assert!(run(&app, check()).await.unwrap().contains("allowed"));
    assert!(
      run(&app, use_ai())
        .await
        .unwrap()
        .contains("free use consumed")
    );
    assert!(run(&app, check()).await.unwrap().contains("locked"));
    assert!(run(&app, use_ai()).await.is_err());

    run(&app, Command::Ai(AiCommand::Unlock {
      feature: AI_EDIT.into(),
    }))
    .await
    .unwrap();
    assert!(run(&app, use_ai()).await.unwrap().contains("unlocked"));
  }

  #[tokio::test]
  async fn watch_rejects_zero_interval() {
    let app = app().await;
    let err = run(&app, Command::Watch { interval_secs: 0 })
      .await
      .unwrap_err();
    assert!(err.to_string().contains("interval"));
  }
}
